//! Agent configuration and the environment keys it reads and exports.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use sweep_types::{config_error, AgentResult};

/// Sweep reference (`sweep_id`, `project/sweep_id` or `entity/project/sweep_id`).
pub const ENV_SWEEP_ID: &str = "SWEEP_ID";
pub const ENV_ENTITY: &str = "SWEEP_ENTITY";
pub const ENV_PROJECT: &str = "SWEEP_PROJECT";
/// Maximum number of trials this agent runs before exiting.
pub const ENV_AGENT_COUNT: &str = "SWEEP_AGENT_COUNT";
/// When `"true"`, any single failed trial stops the sweep.
pub const ENV_DISABLE_FLAPPING: &str = "SWEEP_AGENT_DISABLE_FLAPPING";
pub const ENV_SWEEP_DIR: &str = "SWEEP_DIR";
/// Exported to subprocess trials.
pub const ENV_RUN_ID: &str = "SWEEP_RUN_ID";
pub const ENV_CONFIG_PATHS: &str = "SWEEP_CONFIG_PATHS";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_WAIT: Duration = Duration::from_secs(5);
pub const FLAPPING_MAX_SECONDS: u64 = 60;
pub const FLAPPING_MAX_FAILURES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unparsed sweep reference; validated when the agent starts.
    pub sweep: String,
    pub entity: Option<String>,
    pub project: Option<String>,

    /// Stop after this many dispatched trials. `None` runs until told to exit.
    pub max_runs: Option<usize>,

    /// Delay between heartbeats.
    pub poll_interval: Duration,

    /// How long the dispatch loop waits on the job queue before re-checking
    /// the exit flag.
    pub queue_wait: Duration,

    /// Startup window in which repeated failures kill the sweep.
    pub flapping_window: Duration,
    pub flapping_max_failures: usize,

    /// Treat any single trial error as fatal.
    pub disable_flapping: bool,

    /// Root for per-run config files.
    pub work_dir: PathBuf,

    /// Reported to the coordinator at registration. Defaults to the machine
    /// hostname.
    pub host: Option<String>,
}

impl AgentConfig {
    pub fn new(sweep: impl Into<String>) -> Self {
        Self {
            sweep: sweep.into(),
            entity: None,
            project: None,
            max_runs: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_wait: DEFAULT_QUEUE_WAIT,
            flapping_window: Duration::from_secs(FLAPPING_MAX_SECONDS),
            flapping_max_failures: FLAPPING_MAX_FAILURES,
            disable_flapping: false,
            work_dir: PathBuf::from("sweeps"),
            host: None,
        }
    }

    /// Build a config from `SWEEP_*` environment variables.
    pub fn from_env() -> AgentResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sweep = lookup(ENV_SWEEP_ID)
            .ok_or_else(|| config_error!("{ENV_SWEEP_ID} is not set"))?;
        let mut config = Self::new(sweep);

        config.entity = lookup(ENV_ENTITY).filter(|v| !v.is_empty());
        config.project = lookup(ENV_PROJECT).filter(|v| !v.is_empty());

        if let Some(raw) = lookup(ENV_AGENT_COUNT) {
            let count: usize = raw
                .trim()
                .parse()
                .map_err(|_| config_error!("Invalid value for {ENV_AGENT_COUNT}: {raw:?}"))?;
            config.max_runs = (count > 0).then_some(count);
        }

        config.disable_flapping = lookup(ENV_DISABLE_FLAPPING).as_deref() == Some("true");

        if let Some(dir) = lookup(ENV_SWEEP_DIR) {
            config.work_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn with_entity(mut self, entity: &str) -> Self {
        self.entity = Some(entity.to_string());
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    /// Zero means unlimited.
    pub fn with_max_runs(mut self, n: usize) -> Self {
        self.max_runs = (n > 0).then_some(n);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_queue_wait(mut self, wait: Duration) -> Self {
        self.queue_wait = wait;
        self
    }

    pub fn with_flapping(mut self, window: Duration, max_failures: usize) -> Self {
        self.flapping_window = window;
        self.flapping_max_failures = max_failures;
        self
    }

    pub fn with_disable_flapping(mut self, disabled: bool) -> Self {
        self.disable_flapping = disabled;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }
}
