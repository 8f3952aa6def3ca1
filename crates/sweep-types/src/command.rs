//! Coordinator commands and the typed jobs derived from them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::params::HyperParams;

/// Raw command kind as sent by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandType {
    Run,
    Stop,
    Exit,
}

/// Raw directive returned from a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub kind: CommandType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<HyperParams>,
}

impl Command {
    pub fn run(run_id: impl Into<String>, args: HyperParams) -> Self {
        Self {
            kind: CommandType::Run,
            run_id: Some(run_id.into()),
            args: Some(args),
        }
    }

    pub fn stop(run_id: impl Into<String>) -> Self {
        Self {
            kind: CommandType::Stop,
            run_id: Some(run_id.into()),
            args: None,
        }
    }

    pub fn exit() -> Self {
        Self {
            kind: CommandType::Exit,
            run_id: None,
            args: None,
        }
    }
}

/// A trial assignment waiting in the job queue.
#[derive(Debug, Clone, PartialEq)]
pub struct RunJob {
    pub run_id: String,
    pub params: HyperParams,
}

/// Typed directive derived from a [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Run(RunJob),
    Stop { run_id: String },
    Exit,
}

impl Job {
    /// Translate a raw command. `run` and `stop` without a usable run id are
    /// rejected; a `run` without args gets an empty assignment.
    pub fn from_command(command: Command) -> Result<Self, String> {
        match command.kind {
            CommandType::Run => {
                let run_id = command
                    .run_id
                    .ok_or_else(|| "run command without run_id".to_string())?;
                check_run_id(&run_id)?;
                Ok(Job::Run(RunJob {
                    run_id,
                    params: command.args.unwrap_or_default(),
                }))
            }
            CommandType::Stop => {
                let run_id = command
                    .run_id
                    .ok_or_else(|| "stop command without run_id".to_string())?;
                check_run_id(&run_id)?;
                Ok(Job::Stop { run_id })
            }
            CommandType::Exit => Ok(Job::Exit),
        }
    }
}

/// Run ids end up in file names, so they must be a single non-empty path
/// component without NUL bytes.
fn check_run_id(run_id: &str) -> Result<(), String> {
    if run_id.is_empty() {
        return Err("empty run_id".to_string());
    }
    if run_id == "." || run_id == ".." || run_id.contains(['/', '\\', '\0']) {
        return Err(format!("invalid run_id {run_id:?}"));
    }
    Ok(())
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Run(job) => {
                write!(f, "run({}", job.run_id)?;
                for (name, value) in job.params.iter() {
                    write!(f, ", {name}={value}")?;
                }
                write!(f, ")")
            }
            Job::Stop { run_id } => write!(f, "stop({run_id})"),
            Job::Exit => write!(f, "exit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterValue;

    #[test]
    fn run_command_from_wire() {
        let json = r#"{"type": "run", "run_id": "abc123", "args": {"lr": {"value": 0.1}, "epochs": {"value": 3}}}"#;
        let command: Command = serde_json::from_str(json).unwrap();
        assert_eq!(command.kind, CommandType::Run);

        let job = Job::from_command(command).unwrap();
        match job {
            Job::Run(run) => {
                assert_eq!(run.run_id, "abc123");
                assert_eq!(run.params.get("epochs"), Some(&ParameterValue::Int(3)));
            }
            other => panic!("expected run job, got {other:?}"),
        }
    }

    #[test]
    fn stop_and_exit_from_wire() {
        let stop: Command = serde_json::from_str(r#"{"type": "stop", "run_id": "r9"}"#).unwrap();
        assert_eq!(
            Job::from_command(stop).unwrap(),
            Job::Stop {
                run_id: "r9".into()
            }
        );

        let exit: Command = serde_json::from_str(r#"{"type": "exit"}"#).unwrap();
        assert_eq!(Job::from_command(exit).unwrap(), Job::Exit);
    }

    #[test]
    fn missing_run_id_is_rejected() {
        let command: Command = serde_json::from_str(r#"{"type": "run"}"#).unwrap();
        assert!(Job::from_command(command).is_err());
    }

    #[test]
    fn unusable_run_ids_are_rejected() {
        for bad in ["", "..", "/../../../x", "a/b", "a\\b", "r\u{0}1"] {
            let id = serde_json::to_string(bad).unwrap();
            let json = format!(r#"{{"type": "run", "run_id": {id}}}"#);
            let command: Command = serde_json::from_str(&json).unwrap();
            assert!(Job::from_command(command).is_err(), "accepted {bad:?}");
        }

        assert!(Job::from_command(Command::stop("r\u{0}1")).is_err());
        assert!(Job::from_command(Command::run("run-7.b", HyperParams::new())).is_ok());
    }

    #[test]
    fn unknown_command_type_fails_to_parse() {
        assert!(serde_json::from_str::<Command>(r#"{"type": "pause"}"#).is_err());
    }

    #[test]
    fn display_lists_params_in_order() {
        let job = Job::Run(RunJob {
            run_id: "r1".into(),
            params: HyperParams::new().with("lr", 0.5).with("depth", 4),
        });
        assert_eq!(job.to_string(), "run(r1, lr=0.5, depth=4)");
        assert_eq!(Job::Exit.to_string(), "exit");
    }
}
