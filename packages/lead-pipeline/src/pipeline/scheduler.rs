//! Tick loop that turns schedule fire times into runs.

use chrono::{Local, NaiveDateTime};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pipeline::orchestrator::{Orchestrator, TriggerOutcome};
use crate::types::run::TriggerKind;

/// Evaluates the schedule every `tick_seconds` and triggers runs.
pub struct Scheduler {
    orchestrator: Orchestrator,
}

impl Scheduler {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// One evaluation over `(prev, now]`. Returns the trigger outcome when a
    /// fire time fell in the window.
    pub fn tick(&self, prev: NaiveDateTime, now: NaiveDateTime) -> Option<TriggerOutcome> {
        let schedule = self.orchestrator.config().snapshot().schedule;
        if !schedule.fires_between(prev, now) {
            return None;
        }

        let outcome = self.orchestrator.trigger(TriggerKind::Schedule);
        info!(?outcome, at = %now, "scheduled run triggered");
        Some(outcome)
    }

    /// Tick until `shutdown` is cancelled. Tick length is re-read from the
    /// live config each time.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("scheduler started");
        let mut prev = Local::now().naive_local();

        loop {
            let tick = Duration::from_secs(self.orchestrator.config().snapshot().tick_seconds.max(1));
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(tick) => {}
            }

            let now = Local::now().naive_local();
            if self.tick(prev, now).is_none() {
                debug!(at = %now, "no schedule entry due");
            }
            // A backwards clock jump keeps the old mark so nothing fires twice
            prev = prev.max(now);
        }

        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schedule::{ScheduleConfig, TimeOfDay};
    use crate::sources::SourceRegistry;
    use crate::stores::MemoryStore;
    use crate::types::config::{ConfigHandle, PipelineConfig};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn scheduler(schedule: ScheduleConfig) -> Scheduler {
        let config = PipelineConfig::empty().with_schedule(schedule);
        Scheduler::new(Orchestrator::new(
            ConfigHandle::new(config),
            SourceRegistry::new(),
            Arc::new(MemoryStore::new()),
        ))
    }

    #[tokio::test]
    async fn test_tick_triggers_when_fire_time_in_window() {
        let scheduler = scheduler(ScheduleConfig::daily_at([TimeOfDay::new(8, 0).unwrap()]));

        assert_eq!(scheduler.tick(at(7, 58), at(7, 59)), None);
        assert_eq!(scheduler.tick(at(7, 59), at(8, 0)), Some(TriggerOutcome::Started));
        scheduler.orchestrator.wait_idle().await;
        assert_eq!(scheduler.tick(at(8, 0), at(8, 1)), None);
    }

    #[tokio::test]
    async fn test_manual_only_never_triggers() {
        let scheduler = scheduler(ScheduleConfig::manual_only());
        assert_eq!(scheduler.tick(at(0, 0), at(23, 59)), None);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let scheduler = scheduler(ScheduleConfig::manual_only());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(shutdown.clone()));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
