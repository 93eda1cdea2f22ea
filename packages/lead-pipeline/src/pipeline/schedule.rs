//! Wall-clock schedule: daily times, weekly days and monthly days.
//!
//! Schedules are evaluated in local wall-clock time. The scheduler asks
//! whether any entry fell in `(previous tick, now]`, so a coarse tick never
//! misses a fire time and never fires twice for the same one.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};

/// Longest stretch scanned when looking for the next fire time.
const MAX_SCAN_DAYS: i64 = 62;

/// Hour and minute, written as `"HH:MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn as_time(&self) -> NaiveTime {
        self.0
    }

    pub fn on(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(self.0)
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self(NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default())
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|e| format!("invalid time {s:?} (expected HH:MM): {e}"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailySchedule {
    pub enabled: bool,
    pub times: Vec<TimeOfDay>,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            enabled: true,
            times: vec![TimeOfDay::default()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklySchedule {
    pub enabled: bool,
    pub days: Vec<Weekday>,
    pub time: TimeOfDay,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            days: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
            time: TimeOfDay::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonthlySchedule {
    pub enabled: bool,
    /// Days of the month, 1-31. Months without the day skip it.
    pub days: Vec<u32>,
    pub time: TimeOfDay,
}

impl Default for MonthlySchedule {
    fn default() -> Self {
        Self {
            enabled: false,
            days: vec![1, 15],
            time: TimeOfDay::default(),
        }
    }
}

/// When scheduled runs happen. Each part is enabled independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub daily: DailySchedule,
    pub weekly: WeeklySchedule,
    pub monthly: MonthlySchedule,
}

impl ScheduleConfig {
    /// A schedule that never fires; runs only happen on manual trigger.
    pub fn manual_only() -> Self {
        let mut schedule = Self::default();
        schedule.daily.enabled = false;
        schedule.weekly.enabled = false;
        schedule.monthly.enabled = false;
        schedule
    }

    pub fn daily_at(times: impl IntoIterator<Item = TimeOfDay>) -> Self {
        let mut schedule = Self::manual_only();
        schedule.daily = DailySchedule {
            enabled: true,
            times: times.into_iter().collect(),
        };
        schedule
    }

    pub fn is_enabled(&self) -> bool {
        self.daily.enabled || self.weekly.enabled || self.monthly.enabled
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.daily.enabled && self.daily.times.is_empty() {
            return Err(ConfigError::invalid("schedule.daily.times", "enabled with no times"));
        }
        if self.weekly.enabled && self.weekly.days.is_empty() {
            return Err(ConfigError::invalid("schedule.weekly.days", "enabled with no days"));
        }
        if self.monthly.enabled && self.monthly.days.is_empty() {
            return Err(ConfigError::invalid("schedule.monthly.days", "enabled with no days"));
        }
        if let Some(day) = self.monthly.days.iter().find(|d| !(1..=31).contains(*d)) {
            return Err(ConfigError::invalid(
                "schedule.monthly.days",
                format!("{day} is not a day of the month"),
            ));
        }
        Ok(())
    }

    /// Fire times falling on one date, sorted and deduplicated.
    pub fn fire_times_on(&self, date: NaiveDate) -> Vec<NaiveDateTime> {
        let mut times = Vec::new();
        if self.daily.enabled {
            times.extend(self.daily.times.iter().map(|t| t.on(date)));
        }
        if self.weekly.enabled && self.weekly.days.contains(&date.weekday()) {
            times.push(self.weekly.time.on(date));
        }
        if self.monthly.enabled && self.monthly.days.contains(&date.day()) {
            times.push(self.monthly.time.on(date));
        }
        times.sort();
        times.dedup();
        times
    }

    /// Whether any fire time lies in `(prev, now]`.
    pub fn fires_between(&self, prev: NaiveDateTime, now: NaiveDateTime) -> bool {
        if now <= prev || !self.is_enabled() {
            return false;
        }
        // After a long pause only the most recent stretch matters
        let floor = prev.max(now - Duration::days(MAX_SCAN_DAYS));
        let mut date = floor.date();
        while date <= now.date() {
            if self
                .fire_times_on(date)
                .into_iter()
                .any(|t| t > floor && t <= now)
            {
                return true;
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        false
    }

    /// First fire time strictly after `after`.
    pub fn next_fire_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.is_enabled() {
            return None;
        }
        let mut date = after.date();
        for _ in 0..=MAX_SCAN_DAYS {
            if let Some(t) = self.fire_times_on(date).into_iter().find(|t| *t > after) {
                return Some(t);
            }
            date = date.succ_opt()?;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn time(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn test_defaults_follow_legacy_schedule() {
        let schedule = ScheduleConfig::default();
        assert!(schedule.daily.enabled);
        assert_eq!(schedule.daily.times, vec![time("08:00")]);
        assert_eq!(schedule.weekly.days, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);
        assert_eq!(schedule.monthly.days, vec![1, 15]);
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn test_daily_fires_once_per_window() {
        let schedule = ScheduleConfig::daily_at([time("08:00"), time("17:30")]);

        assert!(schedule.fires_between(at(2025, 3, 3, 7, 59), at(2025, 3, 3, 8, 0)));
        // the boundary belongs to the window that ends on it
        assert!(!schedule.fires_between(at(2025, 3, 3, 8, 0), at(2025, 3, 3, 8, 1)));
        assert!(schedule.fires_between(at(2025, 3, 3, 17, 0), at(2025, 3, 3, 18, 0)));
        assert!(!schedule.fires_between(at(2025, 3, 3, 9, 0), at(2025, 3, 3, 17, 0)));
    }

    #[test]
    fn test_window_across_midnight() {
        let schedule = ScheduleConfig::daily_at([time("00:00")]);
        assert!(schedule.fires_between(at(2025, 3, 3, 23, 59), at(2025, 3, 4, 0, 0)));
    }

    #[test]
    fn test_weekly_and_monthly() {
        let mut schedule = ScheduleConfig::manual_only();
        schedule.weekly.enabled = true;
        schedule.weekly.time = time("09:00");

        // 2025-03-03 is a Monday, 2025-03-04 a Tuesday
        assert!(schedule.fires_between(at(2025, 3, 3, 8, 0), at(2025, 3, 3, 9, 0)));
        assert!(!schedule.fires_between(at(2025, 3, 4, 8, 0), at(2025, 3, 4, 9, 0)));

        let mut monthly = ScheduleConfig::manual_only();
        monthly.monthly.enabled = true;
        monthly.monthly.days = vec![15, 31];
        assert!(monthly.fires_between(at(2025, 3, 15, 7, 0), at(2025, 3, 15, 8, 0)));
        assert!(!monthly.fires_between(at(2025, 3, 14, 7, 0), at(2025, 3, 14, 8, 0)));
        assert_eq!(
            monthly.next_fire_after(at(2025, 4, 15, 9, 0)),
            Some(at(2025, 5, 15, 8, 0))
        );
    }

    #[test]
    fn test_disabled_entries_never_fire() {
        let schedule = ScheduleConfig::manual_only();
        assert!(!schedule.is_enabled());
        assert!(!schedule.fires_between(at(2025, 1, 1, 0, 0), at(2025, 2, 1, 0, 0)));
        assert_eq!(schedule.next_fire_after(at(2025, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_next_fire_after() {
        let schedule = ScheduleConfig::daily_at([time("08:00"), time("17:30")]);
        assert_eq!(
            schedule.next_fire_after(at(2025, 3, 3, 8, 0)),
            Some(at(2025, 3, 3, 17, 30))
        );
        assert_eq!(
            schedule.next_fire_after(at(2025, 3, 3, 18, 0)),
            Some(at(2025, 3, 4, 8, 0))
        );
    }

    #[test]
    fn test_serde_round_trip_of_times() {
        let schedule: ScheduleConfig = serde_json::from_str(
            r#"{"daily": {"times": ["06:15"]}, "weekly": {"enabled": true, "days": ["tuesday"], "time": "10:00"}}"#,
        )
        .unwrap();
        assert_eq!(schedule.daily.times, vec![time("06:15")]);
        assert_eq!(schedule.weekly.days, vec![Weekday::Tue]);
        assert_eq!(serde_json::to_value(time("06:15")).unwrap(), "06:15");

        assert!(serde_json::from_str::<TimeOfDay>(r#""25:00""#).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_days() {
        let mut schedule = ScheduleConfig::manual_only();
        schedule.monthly.days = vec![0];
        assert!(schedule.validate().is_err());

        let mut schedule = ScheduleConfig::manual_only();
        schedule.weekly.enabled = true;
        schedule.weekly.days.clear();
        assert!(schedule.validate().is_err());
    }
}
