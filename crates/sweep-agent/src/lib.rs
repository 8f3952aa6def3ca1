//! # sweep-agent
//!
//! Client-side worker for distributed hyperparameter sweeps.
//!
//! Registers with a sweep coordinator, polls it with heartbeats, translates the
//! returned commands into a job queue and runs each trial in a worker thread
//! while honoring stop and exit requests. A flapping guard ends sweeps whose
//! trials keep failing right after start.

pub mod agent;
pub mod config_file;
pub mod coordinator;
pub mod events;
pub mod executor;
pub mod flapping;
pub mod queue;
pub mod run_table;
pub mod settings;

pub use agent::{Agent, AgentHandle, AgentReport, AgentState};
pub use config_file::{
    config_file_path, load_config_file, save_config_file, ConfigWriter, YamlConfigWriter,
};
pub use coordinator::{Coordinator, HttpCoordinator, RunStatusMap};
pub use events::{AgentEvent, Termination};
pub use executor::{CommandTrial, LoggingFinalizer, RunContext, RunExecutor, RunFinalizer, Trial};
pub use flapping::{FlapVerdict, FlappingGuard};
pub use queue::{job_queue, JobConsumer, JobProducer, Pop};
pub use run_table::{RunHandle, RunTable, StopSignal, StoppedSet};
pub use settings::AgentConfig;
