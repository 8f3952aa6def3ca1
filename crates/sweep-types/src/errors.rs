use thiserror::Error;

/// Main error type for the sweep agent
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Sweep path error: {0}")]
    SweepPath(#[from] SweepPathError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file error: {path}: {message}")]
    ConfigFile { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Job queue closed while the agent was still running")]
    QueueClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors returned by the coordination service boundary
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Failed to reach coordinator: {message}")]
    Transport { message: String },

    #[error("Coordinator rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid coordinator response: {message}")]
    InvalidResponse { message: String },

    #[error("Agent is not registered")]
    NotRegistered,
}

/// Malformed sweep identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SweepPathError {
    #[error("Sweep id is empty")]
    Empty,

    #[error("Invalid sweep path {path:?}: expected sweep_id, project/sweep_id or entity/project/sweep_id")]
    TooManyComponents { path: String },

    #[error("Invalid sweep path {path:?}: empty component")]
    EmptyComponent { path: String },
}

/// Failure of a single trial. Never fatal to the agent on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrialError {
    #[error("Trial failed: {message}")]
    Failed { message: String },

    #[error("Trial was stopped")]
    Stopped,

    #[error("Trial process exited with {status}")]
    ExitStatus { status: String },

    #[error("Trial panicked: {message}")]
    Panicked { message: String },

    #[error("Trial setup failed: {message}")]
    Setup { message: String },
}

impl TrialError {
    pub fn failed(message: impl Into<String>) -> Self {
        TrialError::Failed {
            message: message.into(),
        }
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::AgentError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::AgentError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoordinatorError::Rejected {
            status: 503,
            message: "sweep paused".to_string(),
        };

        assert!(error.to_string().contains("503"));
        assert!(error.to_string().contains("sweep paused"));
    }

    #[test]
    fn test_error_conversion() {
        let path_error = SweepPathError::EmptyComponent {
            path: "a//b".to_string(),
        };
        let agent_error: AgentError = path_error.into();

        match agent_error {
            AgentError::SweepPath(_) => (),
            _ => panic!("Expected SweepPath error"),
        }
    }

    #[test]
    fn test_macros() {
        let config_err = config_error!("Invalid value for {}: {}", "SWEEP_AGENT_COUNT", "abc");
        assert!(matches!(config_err, AgentError::Config(_)));

        let internal_err = internal_error!("worker for {} vanished", "r1");
        assert_eq!(internal_err.to_string(), "Internal error: worker for r1 vanished");
    }
}
