//! Run history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    PartialFailure,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::PartialFailure => "partial_failure",
        }
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    Manual,
}

/// The run currently holding the store's run lock.
///
/// Shared through the store so separate processes on one database see each
/// other's runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub trigger: TriggerKind,
    pub started_at: DateTime<Utc>,
}

/// How one source ended within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Succeeded,
    Failed,
}

/// Per-source counters and error summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
    /// Fetch attempts made (1 + retries used)
    pub attempts: u32,
    pub documents: usize,
    pub candidates: usize,
    /// Candidates persisted (inserted or merged)
    pub accepted: usize,
    pub rejected: usize,
    pub inserted: usize,
    pub merged: usize,
    pub parse_errors: usize,
    pub store_errors: usize,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: SourceStatus::Succeeded,
            attempts: 0,
            documents: 0,
            candidates: 0,
            accepted: 0,
            rejected: 0,
            inserted: 0,
            merged: 0,
            parse_errors: 0,
            store_errors: 0,
            error: None,
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = SourceStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn is_failed(&self) -> bool {
        self.status == SourceStatus::Failed
    }
}

/// One complete pipeline execution. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub trigger: TriggerKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub leads_generated: usize,
    pub sources: Vec<SourceOutcome>,
    /// Orchestration-level failures not tied to one source
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RunRecord {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|s| s.is_failed())
    }

    pub fn outcome_for(&self, source: &str) -> Option<&SourceOutcome> {
        self.sources.iter().find(|s| s.source == source)
    }
}
