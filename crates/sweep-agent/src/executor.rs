//! Runs a single trial and classifies how it ended.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::{Child, Command as ProcessCommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use sweep_types::{HyperParams, RunJob, RunOutcome, TrialError};

use crate::config_file::{config_file_path, ConfigWriter};
use crate::run_table::{StopSignal, StoppedSet};
use crate::settings::{ENV_CONFIG_PATHS, ENV_RUN_ID, ENV_SWEEP_ID};

/// Everything a trial needs to know about the run it is executing.
///
/// A fresh context is built for every run; nothing carries over from the
/// previous trial.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub sweep_id: String,
    pub config_path: PathBuf,
    pub params: HyperParams,
    pub trial_number: usize,
    signal: StopSignal,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        sweep_id: impl Into<String>,
        config_path: PathBuf,
        params: HyperParams,
        trial_number: usize,
        signal: StopSignal,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            sweep_id: sweep_id.into(),
            config_path,
            params,
            trial_number,
            signal,
        }
    }

    /// Whether the coordinator or operator asked this run to stop.
    pub fn is_stopped(&self) -> bool {
        self.signal.is_stopped()
    }

    /// Sleep up to `timeout`, returning early (with `true`) on stop.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.signal.wait_timeout(timeout)
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.signal.clone()
    }

    /// Variables exported to subprocess trials.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (ENV_SWEEP_ID, self.sweep_id.clone()),
            (ENV_RUN_ID, self.run_id.clone()),
            (ENV_CONFIG_PATHS, self.config_path.display().to_string()),
        ]
    }
}

/// User-supplied trial. Any error is a trial failure.
pub trait Trial: Send + Sync {
    fn run(&self, ctx: &RunContext) -> Result<(), TrialError>;
}

impl<F> Trial for F
where
    F: Fn(&RunContext) -> Result<(), TrialError> + Send + Sync,
{
    fn run(&self, ctx: &RunContext) -> Result<(), TrialError> {
        self(ctx)
    }
}

/// Runs a program per trial with the run environment exported. Stopping the
/// run kills the child process; whatever it left on disk stays there.
#[derive(Debug, Clone)]
pub struct CommandTrial {
    program: String,
    args: Vec<String>,
    poll: Duration,
}

impl CommandTrial {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            poll: Duration::from_millis(100),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    fn spawn(&self, ctx: &RunContext) -> Result<Child, TrialError> {
        ProcessCommand::new(&self.program)
            .args(&self.args)
            .envs(ctx.env_vars())
            .spawn()
            .map_err(|e| TrialError::Setup {
                message: format!("failed to spawn {}: {e}", self.program),
            })
    }
}

impl Trial for CommandTrial {
    fn run(&self, ctx: &RunContext) -> Result<(), TrialError> {
        let mut child = self.spawn(ctx)?;
        debug!(run_id = %ctx.run_id, pid = child.id(), "trial process started");

        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(TrialError::ExitStatus {
                        status: status.to_string(),
                    })
                }
                Ok(None) => {}
                Err(e) => return Err(TrialError::failed(format!("wait failed: {e}"))),
            }

            if ctx.wait_timeout(self.poll) {
                debug!(run_id = %ctx.run_id, pid = child.id(), "killing trial process");
                if let Err(e) = child.kill() {
                    warn!(run_id = %ctx.run_id, error = %e, "failed to kill trial process");
                }
                if let Err(e) = child.wait() {
                    warn!(run_id = %ctx.run_id, error = %e, "failed to reap trial process");
                }
                return Err(TrialError::Stopped);
            }
        }
    }
}

/// Called once per trial regardless of outcome.
pub trait RunFinalizer: Send + Sync {
    fn finish(&self, run_id: &str, exit_code: i32);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFinalizer;

impl RunFinalizer for LoggingFinalizer {
    fn finish(&self, run_id: &str, exit_code: i32) {
        debug!(run_id, exit_code, "run finished");
    }
}

pub struct RunExecutor {
    sweep_id: String,
    work_dir: PathBuf,
    writer: Arc<dyn ConfigWriter>,
    trial: Arc<dyn Trial>,
    finalizer: Arc<dyn RunFinalizer>,
    stopped: Arc<StoppedSet>,
}

impl RunExecutor {
    pub fn new(
        sweep_id: impl Into<String>,
        work_dir: PathBuf,
        writer: Arc<dyn ConfigWriter>,
        trial: Arc<dyn Trial>,
        finalizer: Arc<dyn RunFinalizer>,
        stopped: Arc<StoppedSet>,
    ) -> Self {
        Self {
            sweep_id: sweep_id.into(),
            work_dir,
            writer,
            trial,
            finalizer,
            stopped,
        }
    }

    pub fn context_for(&self, job: &RunJob, trial_number: usize, signal: StopSignal) -> RunContext {
        RunContext::new(
            job.run_id.clone(),
            self.sweep_id.clone(),
            config_file_path(&self.work_dir, &self.sweep_id, &job.run_id),
            job.params.clone(),
            trial_number,
            signal,
        )
    }

    /// Write the run config, run the trial, finalize and classify.
    pub fn execute(&self, job: &RunJob, trial_number: usize, signal: StopSignal) -> RunOutcome {
        let ctx = self.context_for(job, trial_number, signal);
        let result = self.invoke(&ctx);
        self.classify(&ctx.run_id, result)
    }

    fn invoke(&self, ctx: &RunContext) -> Result<(), TrialError> {
        self.writer
            .save(&ctx.config_path, &ctx.params)
            .map_err(|e| TrialError::Setup {
                message: e.to_string(),
            })?;

        info!(run_id = %ctx.run_id, "Agent starting run {} with config:", ctx.run_id);
        for (name, value) in ctx.params.iter() {
            info!(run_id = %ctx.run_id, "\t{name}: {value}");
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.trial.run(ctx))) {
            Ok(result) => result,
            Err(payload) => Err(TrialError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    /// Finalize the run and decide how it counts. A failure of a run that was
    /// explicitly stopped is a cooperative stop, not an error; the stopped
    /// entry is consumed either way.
    pub fn classify(&self, run_id: &str, result: Result<(), TrialError>) -> RunOutcome {
        let outcome = match result {
            Ok(()) => {
                self.stopped.take(run_id);
                RunOutcome::Succeeded
            }
            Err(err) if self.stopped.take(run_id) => {
                debug!(run_id, error = %err, "run stopped");
                RunOutcome::Stopped
            }
            Err(err) => RunOutcome::Errored(err),
        };
        self.finalizer.finish(run_id, outcome.exit_code());
        outcome
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
