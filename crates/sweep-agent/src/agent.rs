//! The sweep agent: a heartbeat thread that turns coordinator commands into
//! jobs, and a dispatch loop that runs those jobs one at a time.
//!
//! ```text
//!   coordinator ──heartbeat──▶ Poller ──RunJob──▶ job queue ──▶ Dispatcher ──spawn/join──▶ worker
//!                                 │                                 │
//!                                 └──── stop / exit ──▶ RunTable ◀──┘
//! ```

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use sweep_types::{
    internal_error, AgentError, AgentResult, Job, RunJob, RunOutcome, RunRecord, SweepPath,
    TrialError,
};

use crate::config_file::{ConfigWriter, YamlConfigWriter};
use crate::coordinator::Coordinator;
use crate::events::{AgentEvent, EventSink, Termination};
use crate::executor::{panic_message, LoggingFinalizer, RunExecutor, RunFinalizer, Trial};
use crate::flapping::{FlapVerdict, FlappingGuard};
use crate::queue::{job_queue, JobConsumer, JobProducer, Pop};
use crate::run_table::{RunHandle, RunTable, StoppedSet};
use crate::settings::AgentConfig;

/// State shared between the heartbeat thread, the dispatch loop and any
/// [`AgentHandle`]s.
#[derive(Debug, Default)]
pub struct AgentState {
    exit_flag: AtomicBool,
    interrupted: AtomicBool,
    runs: RunTable,
    stopped: Arc<StoppedSet>,
    events: RwLock<EventSink>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `run_id` as stopped and cancel its worker if it is running.
    /// Safe to call for unknown or already finished runs.
    pub fn stop_run(&self, run_id: &str) {
        debug!(run_id, "stopping run");
        self.stopped.insert(run_id);
        if let Some(handle) = self.runs.remove(run_id) {
            handle.cancel();
        }
        self.emit(AgentEvent::StopRequested {
            run_id: run_id.to_string(),
        });
    }

    pub fn stop_all(&self) {
        debug!("stopping all runs");
        for run_id in self.runs.run_ids() {
            self.stop_run(&run_id);
        }
    }

    pub fn exit(&self) {
        self.stop_all();
        self.raise_exit_flag();
    }

    /// Stop everything and make the dispatch loop wind down quietly.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.exit();
    }

    pub fn is_exiting(&self) -> bool {
        self.exit_flag.load(Ordering::SeqCst)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> &RunTable {
        &self.runs
    }

    pub fn stopped(&self) -> &StoppedSet {
        &self.stopped
    }

    fn raise_exit_flag(&self) {
        self.exit_flag.store(true, Ordering::SeqCst);
    }

    fn set_events(&self, sink: EventSink) {
        *self.events.write() = sink;
    }

    fn emit(&self, event: AgentEvent) {
        self.events.read().emit(event);
    }
}

/// Cloneable remote control for a running agent.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    state: Arc<AgentState>,
}

impl AgentHandle {
    pub fn stop_run(&self, run_id: &str) {
        self.state.stop_run(run_id);
    }

    pub fn exit(&self) {
        self.state.exit();
    }

    /// Operator abort (Ctrl-C). Not reported as an error.
    pub fn interrupt(&self) {
        info!("interrupt received, stopping sweep");
        self.state.interrupt();
    }

    pub fn is_exiting(&self) -> bool {
        self.state.is_exiting()
    }

    pub fn running(&self) -> Vec<String> {
        self.state.runs.run_ids()
    }
}

/// Summary returned when the agent stops.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub agent_id: String,
    pub sweep: SweepPath,
    /// Completed trials, whatever their outcome.
    pub run_count: usize,
    /// run_id -> failure cause.
    pub errored: HashMap<String, String>,
    pub history: Vec<RunRecord>,
    pub termination: Termination,
}

pub struct Agent {
    config: AgentConfig,
    coordinator: Arc<dyn Coordinator>,
    trial: Arc<dyn Trial>,
    writer: Arc<dyn ConfigWriter>,
    finalizer: Arc<dyn RunFinalizer>,
    state: Arc<AgentState>,
    start_time: Instant,
}

impl Agent {
    pub fn new(config: AgentConfig, coordinator: Arc<dyn Coordinator>, trial: Arc<dyn Trial>) -> Self {
        Self {
            config,
            coordinator,
            trial,
            writer: Arc::new(YamlConfigWriter),
            finalizer: Arc::new(LoggingFinalizer),
            state: Arc::new(AgentState::new()),
            start_time: Instant::now(),
        }
    }

    pub fn with_config_writer(mut self, writer: Arc<dyn ConfigWriter>) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_finalizer(mut self, finalizer: Arc<dyn RunFinalizer>) -> Self {
        self.finalizer = finalizer;
        self
    }

    pub fn with_events(self, tx: Sender<AgentEvent>) -> Self {
        self.state.set_events(EventSink::new(Some(tx)));
        self
    }

    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn state(&self) -> &Arc<AgentState> {
        &self.state
    }

    /// Register with the coordinator, then poll and dispatch until the sweep
    /// ends. Blocks the calling thread.
    pub fn run(self) -> AgentResult<AgentReport> {
        info!(
            sweep = %self.config.sweep,
            count = ?self.config.max_runs,
            "starting sweep agent"
        );

        let mut sweep = SweepPath::parse(&self.config.sweep).map_err(|e| {
            error!(error = %e, "invalid sweep id");
            e
        })?;
        if sweep.entity.is_none() {
            sweep.entity = self.config.entity.clone();
        }
        if sweep.project.is_none() {
            sweep.project = self.config.project.clone();
        }

        let host = self.config.host.clone().unwrap_or_else(local_hostname);
        let agent_id = self.coordinator.register(&host, &sweep.sweep_id)?;
        info!(
            agent_id = %agent_id,
            entity = ?sweep.entity,
            project = ?sweep.project,
            sweep_id = %sweep.sweep_id,
            "agent registered"
        );
        self.state.emit(AgentEvent::Registered {
            agent_id: agent_id.clone(),
            sweep_id: sweep.sweep_id.clone(),
        });

        let (producer, consumer) = job_queue();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let poller = Poller {
            coordinator: Arc::clone(&self.coordinator),
            agent_id: agent_id.clone(),
            state: Arc::clone(&self.state),
            producer,
            interval: self.config.poll_interval,
            shutdown: shutdown_rx,
        };
        let heartbeat = thread::Builder::new()
            .name("sweep-heartbeat".into())
            .spawn(move || poller.run())?;

        let executor = RunExecutor::new(
            sweep.sweep_id.clone(),
            self.config.work_dir.clone(),
            Arc::clone(&self.writer),
            Arc::clone(&self.trial),
            Arc::clone(&self.finalizer),
            Arc::clone(&self.state.stopped),
        );
        let mut dispatcher = Dispatcher {
            state: Arc::clone(&self.state),
            executor: Arc::new(executor),
            guard: FlappingGuard::from_config(&self.config),
            max_runs: self.config.max_runs,
            queue_wait: self.config.queue_wait,
            start_time: self.start_time,
            errored: HashMap::new(),
            history: Vec::new(),
            run_count: 0,
            trial_number: 0,
        };

        let result = dispatcher.run(&consumer);

        drop(shutdown_tx);
        let heartbeat_panicked = heartbeat.join().is_err();

        let termination = match result {
            Err(AgentError::QueueClosed) if heartbeat_panicked => {
                return Err(internal_error!("heartbeat thread panicked"));
            }
            other => other?,
        };
        if heartbeat_panicked {
            warn!("heartbeat thread panicked during shutdown");
        }
        info!(?termination, runs = dispatcher.run_count, "sweep agent stopped");
        self.state.emit(AgentEvent::Exiting {
            reason: termination,
        });

        Ok(AgentReport {
            agent_id,
            sweep,
            run_count: dispatcher.run_count,
            errored: dispatcher.errored,
            history: dispatcher.history,
            termination,
        })
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStep {
    Continue,
    Exit,
}

/// Heartbeat loop. Owns the producer side of the job queue; dropping it when
/// the loop ends tells the dispatcher no more work is coming.
pub(crate) struct Poller {
    pub(crate) coordinator: Arc<dyn Coordinator>,
    pub(crate) agent_id: String,
    pub(crate) state: Arc<AgentState>,
    pub(crate) producer: JobProducer,
    pub(crate) interval: Duration,
    pub(crate) shutdown: Receiver<()>,
}

impl Poller {
    pub(crate) fn run(self) {
        loop {
            if self.poll_once() == PollStep::Exit {
                break;
            }
            // Sleep the full interval even after an empty response; a closed
            // shutdown channel ends the wait early.
            match self.shutdown.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("heartbeat loop stopped");
    }

    /// One heartbeat. Only the first command of a response is acted upon.
    pub(crate) fn poll_once(&self) -> PollStep {
        if self.state.is_exiting() {
            return PollStep::Exit;
        }

        let run_status = self.state.runs.liveness();
        let commands =
            match self
                .coordinator
                .heartbeat(&self.agent_id, &serde_json::Map::new(), &run_status)
            {
                Ok(commands) => commands,
                Err(e) => {
                    warn!(error = %e, "heartbeat failed");
                    return PollStep::Continue;
                }
            };

        if self.state.is_exiting() {
            return PollStep::Exit;
        }

        let mut commands = commands.into_iter();
        let Some(first) = commands.next() else {
            return PollStep::Continue;
        };
        let ignored = commands.count();
        if ignored > 0 {
            debug!(ignored, "ignoring additional commands in heartbeat response");
        }

        let job = match Job::from_command(first) {
            Ok(job) => job,
            Err(reason) => {
                warn!(%reason, "ignoring malformed command");
                return PollStep::Continue;
            }
        };
        debug!(%job, "job received");

        match job {
            Job::Run(run) => {
                if !self.producer.push(run) {
                    return PollStep::Exit;
                }
                PollStep::Continue
            }
            Job::Stop { run_id } => {
                self.state.stop_run(&run_id);
                PollStep::Continue
            }
            Job::Exit => {
                self.state.exit();
                PollStep::Exit
            }
        }
    }
}

struct Dispatcher {
    state: Arc<AgentState>,
    executor: Arc<RunExecutor>,
    guard: FlappingGuard,
    max_runs: Option<usize>,
    queue_wait: Duration,
    start_time: Instant,
    errored: HashMap<String, String>,
    history: Vec<RunRecord>,
    run_count: usize,
    trial_number: usize,
}

impl Dispatcher {
    fn run(&mut self, queue: &JobConsumer) -> AgentResult<Termination> {
        let mut waiting = false;
        loop {
            match self.step(queue, &mut waiting) {
                Ok(None) => continue,
                Ok(Some(termination)) => return Ok(termination),
                Err(err) => return self.recover(err),
            }
        }
    }

    /// Errors racing a concurrent exit are swallowed.
    fn recover(&self, err: AgentError) -> AgentResult<Termination> {
        if self.state.is_exiting() {
            debug!(error = %err, "error during shutdown ignored");
            info!("Sweep agent: killed.");
            return Ok(Termination::Killed);
        }
        Err(err)
    }

    fn step(&mut self, queue: &JobConsumer, waiting: &mut bool) -> AgentResult<Option<Termination>> {
        if let Some(termination) = self.check_stop() {
            return Ok(Some(termination));
        }

        let job = match queue.pop(self.queue_wait) {
            Pop::Job(job) => job,
            Pop::TimedOut => {
                if !*waiting {
                    debug!("paused");
                    info!("Sweep agent: waiting for job.");
                    self.state.emit(AgentEvent::Waiting);
                    *waiting = true;
                }
                return Ok(None);
            }
            Pop::Closed => {
                return match self.check_stop() {
                    Some(termination) => Ok(Some(termination)),
                    None => Err(AgentError::QueueClosed),
                };
            }
        };

        if let Some(termination) = self.check_stop() {
            return Ok(Some(termination));
        }
        if *waiting {
            debug!("resumed");
            info!("Job received.");
            self.state.emit(AgentEvent::Resumed);
            *waiting = false;
        }

        self.trial_number += 1;
        let run_id = job.run_id.clone();
        let outcome = self.run_trial(job)?;
        self.run_count += 1;

        if let RunOutcome::Errored(err) = outcome {
            error!(run_id = %run_id, error = %err, "Run {run_id} errored: {err}");
            self.errored.insert(run_id, err.to_string());

            let verdict = self
                .guard
                .check(self.start_time.elapsed(), self.errored.len());
            if verdict.is_fatal() {
                self.state.emit(AgentEvent::FlappingDetected {
                    verdict,
                    errored_runs: self.errored.len(),
                });
                self.state.raise_exit_flag();
                return Ok(Some(match verdict {
                    FlapVerdict::FailureDisabled => Termination::FailureDisabled,
                    _ => Termination::Flapping,
                }));
            }
        }

        if self.state.is_interrupted() {
            return Ok(self.check_stop());
        }

        if let Some(max) = self.max_runs {
            if self.trial_number >= max {
                debug!(max, "exiting main loop because max count reached");
                self.state.raise_exit_flag();
                return Ok(Some(Termination::MaxRunsReached));
            }
        }

        Ok(None)
    }

    fn check_stop(&self) -> Option<Termination> {
        if self.state.is_interrupted() {
            info!("Ctrl + C detected. Stopping sweep.");
            self.state.exit();
            return Some(Termination::Interrupted);
        }
        if self.state.is_exiting() {
            debug!("exiting main loop due to exit flag");
            info!("Sweep agent: exiting.");
            return Some(Termination::ExitCommand);
        }
        None
    }

    /// Spawn a worker for `job`, register it in the run table and block until
    /// it finishes. The entry is gone from the run table on return.
    fn run_trial(&mut self, job: RunJob) -> AgentResult<RunOutcome> {
        let run_id = job.run_id.clone();
        let trial_number = self.trial_number;
        let mut record = RunRecord::new(&run_id, trial_number, job.params.clone());

        let handle = RunHandle::new();
        self.state.runs.insert(&run_id, handle.clone());
        if self.state.stopped.contains(&run_id) {
            // Stopped while still queued.
            handle.cancel();
        }

        record.mark_running();
        self.state.emit(AgentEvent::RunStarted {
            run_id: run_id.clone(),
            trial_number,
        });
        debug!(run_id = %run_id, trial_number, "spawning worker");

        let executor = Arc::clone(&self.executor);
        let signal = handle.signal();
        let worker_handle = handle.clone();
        let spawned = thread::Builder::new()
            .name(format!("run-{trial_number}"))
            .spawn(move || {
                let outcome = executor.execute(&job, trial_number, signal);
                worker_handle.mark_finished();
                outcome
            });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                self.state.runs.remove(&run_id);
                return Err(e.into());
            }
        };

        let outcome = match worker.join() {
            Ok(outcome) => outcome,
            Err(payload) => {
                handle.mark_finished();
                let err = TrialError::Panicked {
                    message: panic_message(payload.as_ref()),
                };
                self.executor.classify(&run_id, Err(err))
            }
        };
        debug!(run_id = %run_id, "worker joined");

        self.state.runs.remove(&run_id);
        record.mark_finished(&outcome);
        self.state.emit(AgentEvent::RunFinished {
            run_id,
            status: record.status,
            error: record.error.clone(),
        });
        self.history.push(record);

        Ok(outcome)
    }
}
