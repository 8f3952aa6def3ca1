//! Per-run bookkeeping: lifecycle records and trial outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TrialError;
use crate::params::HyperParams;

/// How a finished trial is classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The trial function returned normally.
    Succeeded,
    /// The trial failed after an explicit stop; not counted as an error.
    Stopped,
    /// The trial failed on its own. Counts toward flapping.
    Errored(TrialError),
}

impl RunOutcome {
    /// Exit code handed to the run finalizer.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Succeeded => 0,
            RunOutcome::Stopped | RunOutcome::Errored(_) => 1,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RunOutcome::Errored(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Stopped,
    Failed,
}

/// History entry for one dispatched trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// 1-based dispatch index.
    pub trial_number: usize,
    pub params: HyperParams,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, trial_number: usize, params: HyperParams) -> Self {
        Self {
            run_id: run_id.into(),
            trial_number,
            params,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_finished(&mut self, outcome: &RunOutcome) {
        self.finished_at = Some(Utc::now());
        match outcome {
            RunOutcome::Succeeded => self.status = RunStatus::Succeeded,
            RunOutcome::Stopped => self.status = RunStatus::Stopped,
            RunOutcome::Errored(err) => {
                self.status = RunStatus::Failed;
                self.error = Some(err.to_string());
            }
        }
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}
