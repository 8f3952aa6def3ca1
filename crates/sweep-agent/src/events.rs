//! Events emitted by the agent for external consumption (UI, tests, alerting).

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::flapping::FlapVerdict;
use sweep_types::RunStatus;

/// Why the agent stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The coordinator sent `exit`.
    ExitCommand,
    /// The configured trial count was reached.
    MaxRunsReached,
    /// Too many failures inside the startup window.
    Flapping,
    /// A trial failed with the disable switch set.
    FailureDisabled,
    /// Operator interrupt.
    Interrupted,
    /// An unexpected error raced with a concurrent exit.
    Killed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentEvent {
    Registered {
        agent_id: String,
        sweep_id: String,
    },
    /// The job queue went idle.
    Waiting,
    /// A job arrived after a waiting period.
    Resumed,
    RunStarted {
        run_id: String,
        trial_number: usize,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        error: Option<String>,
    },
    StopRequested {
        run_id: String,
    },
    FlappingDetected {
        verdict: FlapVerdict,
        errored_runs: usize,
    },
    Exiting {
        reason: Termination,
    },
}

/// Best-effort event sink. A dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<Sender<AgentEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: Option<Sender<AgentEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }
}
