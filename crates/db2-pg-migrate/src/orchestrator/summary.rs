//! Phases, phase outcomes and the run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::MigrationMode;
use crate::error::Result;
use crate::schema::ExcludedObject;
use crate::validate::ValidationReport;

/// Migration phase, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    Convert,
    CreateSchema,
    TransferData,
    Validate,
}

impl Phase {
    /// Phases a mode runs, in order.
    pub fn for_mode(mode: MigrationMode) -> &'static [Phase] {
        match mode {
            MigrationMode::Full => &[
                Phase::Extract,
                Phase::Convert,
                Phase::CreateSchema,
                Phase::TransferData,
                Phase::Validate,
            ],
            MigrationMode::SchemaOnly => &[
                Phase::Extract,
                Phase::Convert,
                Phase::CreateSchema,
                Phase::Validate,
            ],
            MigrationMode::DataOnly => &[Phase::TransferData, Phase::Validate],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Extract => "extract",
            Phase::Convert => "convert",
            Phase::CreateSchema => "create_schema",
            Phase::TransferData => "transfer_data",
            Phase::Validate => "validate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a phase reported when it ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Success,
    /// Finished, but some objects failed or need attention.
    Partial(Vec<String>),
    /// The phase could not finish.
    Failure(String),
    /// Recorded as complete by an earlier run.
    Skipped,
}

impl PhaseOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, PhaseOutcome::Failure(_))
    }
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseOutcome::Success => write!(f, "success"),
            PhaseOutcome::Partial(notes) => write!(f, "partial ({} issue(s))", notes.len()),
            PhaseOutcome::Failure(cause) => write!(f, "failed: {}", cause),
            PhaseOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    #[serde(flatten)]
    pub outcome: PhaseOutcome,
    pub duration_seconds: f64,
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every phase succeeded and validation passed.
    Completed,
    /// The run reached its end with failed objects or failed validation.
    CompletedWithErrors,
    /// A fatal error stopped the run.
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::CompletedWithErrors => write!(f, "completed_with_errors"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a migration run. Produced even when the run aborts.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: MigrationMode,

    /// Final status.
    pub status: RunStatus,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run ended.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Phases in the order they ran.
    pub phases: Vec<PhaseReport>,

    pub objects_succeeded: usize,
    pub objects_warned: usize,
    pub objects_failed: usize,

    /// Tables planned for transfer.
    pub tables_total: usize,

    /// Tables fully transferred, including those from earlier runs.
    pub tables_completed: usize,

    /// Rows committed by this run.
    pub rows_transferred: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: f64,

    /// Object key -> error message.
    pub failed_objects: BTreeMap<String, String>,

    /// Objects left out of the plan.
    pub excluded_objects: Vec<ExcludedObject>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,

    /// The error that stopped the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip)]
    pub(crate) exit_code: u8,
}

impl MigrationSummary {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Process exit code: 0 only for a clean run.
    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}
