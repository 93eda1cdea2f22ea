//! Run control: schedule evaluation, triggering and orchestration.
//!
//! - [`schedule`] decides when a run is due
//! - [`scheduler`] ticks and triggers runs
//! - [`orchestrator`] executes one run at a time across all sources

pub mod orchestrator;
pub mod schedule;
pub mod scheduler;

pub use orchestrator::{run_status, Orchestrator, PipelineStatus, TriggerOutcome};
pub use schedule::{DailySchedule, MonthlySchedule, ScheduleConfig, TimeOfDay, WeeklySchedule};
pub use scheduler::Scheduler;
