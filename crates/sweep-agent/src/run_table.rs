//! Shared state for runs that are currently executing.
//!
//! Both the polling loop (stop/exit) and the dispatch loop (spawn/join) touch
//! these structures, so every access goes through a mutex.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::coordinator::RunStatusMap;

/// Cancellation flag handed to a running trial.
///
/// In-process trials poll [`StopSignal::is_stopped`] or sleep through
/// [`StopSignal::wait_timeout`]; subprocess trials use it to decide when to
/// kill their child. A trial that never looks at it cannot be interrupted.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep up to `timeout`, waking early on stop. Returns `true` if stopped.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            if self.inner.cond.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Run table entry for one executing trial.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    signal: StopSignal,
    finished: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> StopSignal {
        self.signal.clone()
    }

    pub fn cancel(&self) {
        self.signal.stop();
    }

    pub fn is_alive(&self) -> bool {
        !self.finished.load(Ordering::SeqCst)
    }

    /// Called by the worker once the trial function has returned.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

/// run_id -> handle of its executing worker.
#[derive(Debug, Default)]
pub struct RunTable {
    runs: Mutex<HashMap<String, RunHandle>>,
}

impl RunTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run_id: &str, handle: RunHandle) {
        self.runs.lock().insert(run_id.to_string(), handle);
    }

    pub fn remove(&self, run_id: &str) -> Option<RunHandle> {
        self.runs.lock().remove(run_id)
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.runs.lock().contains_key(run_id)
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.runs.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }

    /// Liveness report for the heartbeat. Entries whose worker already
    /// finished are dropped from the table and not reported.
    pub fn liveness(&self) -> RunStatusMap {
        let mut runs = self.runs.lock();
        runs.retain(|_, handle| handle.is_alive());
        runs.keys().map(|id| (id.clone(), true)).collect()
    }
}

/// Run ids that were explicitly stopped and not yet classified.
#[derive(Debug, Default)]
pub struct StoppedSet {
    ids: Mutex<HashSet<String>>,
}

impl StoppedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run_id: &str) {
        self.ids.lock().insert(run_id.to_string());
    }

    /// Remove `run_id`, returning whether it was present.
    pub fn take(&self, run_id: &str) -> bool {
        self.ids.lock().remove(run_id)
    }

    pub fn contains(&self, run_id: &str) -> bool {
        self.ids.lock().contains(run_id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stop_signal_wakes_waiter() {
        let signal = StopSignal::new();
        let waiter = signal.clone();

        let started = Instant::now();
        let t = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        signal.stop();

        assert!(t.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stop_signal_times_out_when_not_stopped() {
        let signal = StopSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
        assert!(!signal.is_stopped());
    }

    #[test]
    fn cancel_reaches_every_clone() {
        let handle = RunHandle::new();
        let signal = handle.signal();
        handle.clone().cancel();
        assert!(signal.is_stopped());
    }

    #[test]
    fn liveness_prunes_finished_runs() {
        let table = RunTable::new();
        let live = RunHandle::new();
        let dead = RunHandle::new();
        dead.mark_finished();
        table.insert("live", live);
        table.insert("dead", dead);

        let status = table.liveness();
        assert_eq!(status.len(), 1);
        assert_eq!(status.get("live"), Some(&true));
        assert!(!table.contains("dead"));
    }

    #[test]
    fn stopped_set_is_consumed_once() {
        let stopped = StoppedSet::new();
        stopped.insert("r1");
        stopped.insert("r1");
        assert_eq!(stopped.len(), 1);

        assert!(stopped.take("r1"));
        assert!(!stopped.take("r1"));
        assert!(stopped.is_empty());
    }
}
