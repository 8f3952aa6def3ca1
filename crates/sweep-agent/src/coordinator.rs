//! Coordinator service boundary.
//!
//! The agent only needs two calls: [`Coordinator::register`] once at startup
//! and [`Coordinator::heartbeat`] on every poll. [`HttpCoordinator`] speaks a
//! small JSON protocol; tests plug in scripted implementations.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use sweep_types::{Command, CoordinatorError};

/// Liveness of each locally tracked run, keyed by run id.
pub type RunStatusMap = HashMap<String, bool>;

/// Client-side view of the coordination service.
pub trait Coordinator: Send + Sync {
    /// Register this agent for a sweep and return the assigned agent id.
    fn register(&self, host: &str, sweep_id: &str) -> Result<String, CoordinatorError>;

    /// Report run liveness and receive pending commands, oldest first. An
    /// empty vector means there is nothing to do.
    fn heartbeat(
        &self,
        agent_id: &str,
        metrics: &serde_json::Map<String, serde_json::Value>,
        run_status: &RunStatusMap,
    ) -> Result<Vec<Command>, CoordinatorError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub host: String,
    pub sweep_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,
    pub metrics: serde_json::Map<String, serde_json::Value>,
    pub run_status: RunStatusMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// Blocking HTTP client for the coordinator.
///
/// `POST {base}/agents` registers, `POST {base}/agents/{id}/heartbeat` polls.
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    base_url: String,
    client: Client,
}

impl HttpCoordinator {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CoordinatorError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CoordinatorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CoordinatorError>
    where
        Req: Serialize,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "coordinator request");

        let response = self.client.post(&url).json(body).send().map_err(transport)?;
        let status = response.status();
        let text = response.text().map_err(transport)?;

        if !status.is_success() {
            return Err(CoordinatorError::Rejected {
                status: status.as_u16(),
                message: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| CoordinatorError::InvalidResponse {
            message: format!("failed to parse response: {e}, body: {text}"),
        })
    }
}

impl Coordinator for HttpCoordinator {
    fn register(&self, host: &str, sweep_id: &str) -> Result<String, CoordinatorError> {
        let request = RegisterRequest {
            host: host.to_string(),
            sweep_id: sweep_id.to_string(),
        };
        let response: RegisterResponse = self.post("/agents", &request)?;
        if response.agent_id.is_empty() {
            return Err(CoordinatorError::InvalidResponse {
                message: "empty agent_id".into(),
            });
        }
        Ok(response.agent_id)
    }

    fn heartbeat(
        &self,
        agent_id: &str,
        metrics: &serde_json::Map<String, serde_json::Value>,
        run_status: &RunStatusMap,
    ) -> Result<Vec<Command>, CoordinatorError> {
        if agent_id.is_empty() {
            return Err(CoordinatorError::NotRegistered);
        }
        let request = HeartbeatRequest {
            agent_id: agent_id.to_string(),
            metrics: metrics.clone(),
            run_status: run_status.clone(),
        };
        let response: HeartbeatResponse =
            self.post(&format!("/agents/{agent_id}/heartbeat"), &request)?;
        Ok(response.commands)
    }
}

fn transport(err: reqwest::Error) -> CoordinatorError {
    CoordinatorError::Transport {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_types::CommandType;

    #[test]
    fn heartbeat_response_parses_commands_in_order() {
        let body = r#"{"commands": [
            {"type": "run", "run_id": "r1", "args": {"lr": {"value": 0.1}}},
            {"type": "stop", "run_id": "r0"}
        ]}"#;
        let response: HeartbeatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.commands.len(), 2);
        assert_eq!(response.commands[0].kind, CommandType::Run);
        assert_eq!(response.commands[1].kind, CommandType::Stop);
    }

    #[test]
    fn heartbeat_response_without_commands_is_empty() {
        let response: HeartbeatResponse = serde_json::from_str("{}").unwrap();
        assert!(response.commands.is_empty());
    }

    #[test]
    fn heartbeat_request_shape() {
        let mut run_status = RunStatusMap::new();
        run_status.insert("r1".into(), true);
        let request = HeartbeatRequest {
            agent_id: "agent-1".into(),
            metrics: serde_json::Map::new(),
            run_status,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["metrics"], serde_json::json!({}));
        assert_eq!(value["run_status"]["r1"], serde_json::json!(true));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let coordinator = HttpCoordinator::new("http://localhost:8080/api/").unwrap();
        assert_eq!(coordinator.base_url(), "http://localhost:8080/api");
    }

    #[test]
    fn unreachable_coordinator_is_transport_error() {
        let coordinator =
            HttpCoordinator::with_timeout("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let err = coordinator.register("host", "q7x2k").unwrap_err();
        assert!(matches!(err, CoordinatorError::Transport { .. }));
    }
}
