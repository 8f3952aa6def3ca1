//! FIFO of pending trial assignments between the polling and dispatch loops.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use sweep_types::RunJob;

/// Create a connected producer/consumer pair.
pub fn job_queue() -> (JobProducer, JobConsumer) {
    let (tx, rx) = unbounded();
    (JobProducer { tx }, JobConsumer { rx })
}

/// Result of a bounded wait on the queue.
#[derive(Debug, PartialEq)]
pub enum Pop {
    Job(RunJob),
    TimedOut,
    /// The producer is gone and nothing is left to read.
    Closed,
}

#[derive(Debug)]
pub struct JobProducer {
    tx: Sender<RunJob>,
}

impl JobProducer {
    /// Enqueue a job. Returns `false` if the consumer has been dropped.
    pub fn push(&self, job: RunJob) -> bool {
        self.tx.send(job).is_ok()
    }
}

#[derive(Debug)]
pub struct JobConsumer {
    rx: Receiver<RunJob>,
}

impl JobConsumer {
    pub fn pop(&self, wait: Duration) -> Pop {
        match self.rx.recv_timeout(wait) {
            Ok(job) => Pop::Job(job),
            Err(RecvTimeoutError::Timeout) => Pop::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Pop::Closed,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_types::HyperParams;

    fn job(id: &str) -> RunJob {
        RunJob {
            run_id: id.to_string(),
            params: HyperParams::new(),
        }
    }

    #[test]
    fn fifo_order() {
        let (producer, consumer) = job_queue();
        assert!(producer.push(job("r1")));
        assert!(producer.push(job("r2")));
        assert_eq!(consumer.len(), 2);

        assert_eq!(consumer.pop(Duration::from_millis(10)), Pop::Job(job("r1")));
        assert_eq!(consumer.pop(Duration::from_millis(10)), Pop::Job(job("r2")));
        assert!(consumer.is_empty());
    }

    #[test]
    fn empty_queue_times_out() {
        let (_producer, consumer) = job_queue();
        assert_eq!(consumer.pop(Duration::from_millis(5)), Pop::TimedOut);
    }

    #[test]
    fn queued_jobs_survive_producer_drop() {
        let (producer, consumer) = job_queue();
        producer.push(job("r1"));
        drop(producer);

        assert_eq!(consumer.pop(Duration::from_millis(5)), Pop::Job(job("r1")));
        assert_eq!(consumer.pop(Duration::from_millis(5)), Pop::Closed);
    }

    #[test]
    fn push_after_consumer_drop_fails() {
        let (producer, consumer) = job_queue();
        drop(consumer);
        assert!(!producer.push(job("r1")));
    }
}
