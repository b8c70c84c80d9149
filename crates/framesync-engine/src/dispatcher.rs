//! Job dispatcher: CPU-bound work on a fixed pool of worker threads.
//!
//! Jobs take their arguments by move and return their result by move, so
//! a worker never shares memory with the submitter. Workers pull jobs
//! from a `crossbeam_channel` queue and push outcomes to a single
//! pool-management thread (`framesync-pool-mgr`), which handles them in
//! completion order:
//!
//! 1. decrement the in-flight [`JobTally`] and recompute the status line
//!    (always, whether the job succeeded, failed or panicked),
//! 2. then, on success only, invoke the completion callback.
//!
//! The tally lock is never held while a job or callback runs.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use framesync_core::JobId;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConfigError;

/// Status line shown when no job is in flight.
pub const READY_STATUS: &str = "Ready";

/// Status line for `n` jobs in flight.
pub fn status_message(in_flight: usize) -> String {
    if in_flight == 0 {
        READY_STATUS.to_string()
    } else {
        format!("Executing {in_flight} tasks…")
    }
}

// ── Error types ──────────────────────────────────────────────────

/// Error submitting a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The pool has shut down.
    #[error("job pool has shut down")]
    Shutdown,
}

/// Why a job produced no result.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The job panicked.
    #[error("job panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
    /// The job returned an error.
    #[error("job failed: {message}")]
    Failed {
        /// The error's display form.
        message: String,
    },
}

// ── JobTally ─────────────────────────────────────────────────────

struct TallyInner {
    in_flight: usize,
    status: String,
}

/// Mutex-guarded count of in-flight jobs and the matching status line.
pub struct JobTally {
    inner: Mutex<TallyInner>,
}

impl Default for JobTally {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTally {
    /// A tally with nothing in flight.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TallyInner {
                in_flight: 0,
                status: READY_STATUS.to_string(),
            }),
        }
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Current status line.
    pub fn status(&self) -> String {
        self.inner.lock().status.clone()
    }

    /// Count and status read under one lock.
    pub fn snapshot(&self) -> (usize, String) {
        let inner = self.inner.lock();
        (inner.in_flight, inner.status.clone())
    }

    fn adjust(&self, f: impl FnOnce(usize) -> usize) -> usize {
        let mut inner = self.inner.lock();
        inner.in_flight = f(inner.in_flight);
        inner.status = status_message(inner.in_flight);
        inner.in_flight
    }

    fn begin(&self) -> usize {
        self.adjust(|n| n + 1)
    }

    fn finish(&self) -> usize {
        self.adjust(|n| n.saturating_sub(1))
    }
}

impl fmt::Debug for JobTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (in_flight, status) = self.snapshot();
        f.debug_struct("JobTally")
            .field("in_flight", &in_flight)
            .field("status", &status)
            .finish()
    }
}

// ── Internal messages ────────────────────────────────────────────

type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Job {
    id: JobId,
    work: Box<dyn FnOnce() -> Result<Callback, JobError> + Send + 'static>,
}

struct Outcome {
    id: JobId,
    result: Result<Callback, JobError>,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
    callback_panics: AtomicU64,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── JobDispatcher ────────────────────────────────────────────────

/// Fixed pool of worker threads plus one pool-management thread.
pub struct JobDispatcher {
    job_tx: Mutex<Option<Sender<Job>>>,
    tally: Arc<JobTally>,
    counters: Arc<Counters>,
    next_id: AtomicU64,
    worker_count: usize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

// Compile-time assertion: JobDispatcher must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<JobDispatcher>();
};

impl JobDispatcher {
    /// Spawn `worker_count` workers (at least one) and the pool manager.
    pub fn new(worker_count: usize) -> Result<Self, ConfigError> {
        let worker_count = worker_count.max(1);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded::<Outcome>();
        let tally = Arc::new(JobTally::new());
        let counters = Arc::new(Counters::default());

        let mut threads = Vec::with_capacity(worker_count + 1);
        for i in 0..worker_count {
            let job_rx = job_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("framesync-worker-{i}"))
                .spawn(move || worker_loop(job_rx, outcome_tx))
                .map_err(|e| ConfigError::ThreadSpawnFailed {
                    reason: format!("framesync-worker-{i}: {e}"),
                })?;
            threads.push(handle);
        }
        // Workers hold the only outcome senders from here on.
        drop(outcome_tx);

        let mgr_tally = Arc::clone(&tally);
        let mgr_counters = Arc::clone(&counters);
        let manager = thread::Builder::new()
            .name("framesync-pool-mgr".into())
            .spawn(move || manager_loop(outcome_rx, mgr_tally, mgr_counters))
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: format!("framesync-pool-mgr: {e}"),
            })?;
        threads.push(manager);

        info!(workers = worker_count, "job pool started");
        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            tally,
            counters,
            next_id: AtomicU64::new(0),
            worker_count,
            threads: Mutex::new(threads),
        })
    }

    /// Run `job(args)` on a worker. On success `on_complete(result)` runs
    /// on the pool-management thread. A panic in `job` is a job failure:
    /// it is logged and `on_complete` is skipped.
    pub fn submit<A, R, J, C>(&self, job: J, args: A, on_complete: C) -> Result<JobId, SubmitError>
    where
        A: Send + 'static,
        R: Send + 'static,
        J: FnOnce(A) -> R + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        self.enqueue(Box::new(move || {
            let result = job(args);
            Ok(Box::new(move || on_complete(result)) as Callback)
        }))
    }

    /// Like [`submit`](Self::submit) for jobs that report failure through
    /// `Err`. The error's display form is logged.
    pub fn submit_fallible<A, R, E, J, C>(
        &self,
        job: J,
        args: A,
        on_complete: C,
    ) -> Result<JobId, SubmitError>
    where
        A: Send + 'static,
        R: Send + 'static,
        E: fmt::Display,
        J: FnOnce(A) -> Result<R, E> + Send + 'static,
        C: FnOnce(R) + Send + 'static,
    {
        self.enqueue(Box::new(move || match job(args) {
            Ok(result) => Ok(Box::new(move || on_complete(result)) as Callback),
            Err(e) => Err(JobError::Failed {
                message: e.to_string(),
            }),
        }))
    }

    /// Run `job(args)` with no completion callback. The tally is still
    /// maintained.
    pub fn submit_detached<A, R, J>(&self, job: J, args: A) -> Result<JobId, SubmitError>
    where
        A: Send + 'static,
        R: Send + 'static,
        J: FnOnce(A) -> R + Send + 'static,
    {
        self.submit(job, args, |_| {})
    }

    fn enqueue(
        &self,
        work: Box<dyn FnOnce() -> Result<Callback, JobError> + Send + 'static>,
    ) -> Result<JobId, SubmitError> {
        let guard = self.job_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(SubmitError::Shutdown);
        };
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let in_flight = self.tally.begin();
        if tx.send(Job { id, work }).is_err() {
            self.tally.finish();
            return Err(SubmitError::Shutdown);
        }
        debug!(job = %id, in_flight, "job submitted");
        Ok(id)
    }

    /// Shared tally, readable from any thread.
    pub fn tally(&self) -> &Arc<JobTally> {
        &self.tally
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tally.in_flight()
    }

    /// Current status line.
    pub fn status(&self) -> String {
        self.tally.status()
    }

    /// Jobs that finished successfully.
    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Jobs that panicked or returned an error.
    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Completion callbacks that panicked.
    pub fn callback_panics(&self) -> u64 {
        self.counters.callback_panics.load(Ordering::Relaxed)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.job_tx.lock().is_none()
    }

    /// Poll until no job is in flight or `timeout` elapses. Returns
    /// whether the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.tally.in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Stop accepting jobs. Does not wait: queued and running jobs finish
    /// on their own and their callbacks still run. Returns the number of
    /// jobs in flight at the time of the call.
    pub fn shutdown(&self) -> usize {
        let sender = self.job_tx.lock().take();
        if sender.is_some() {
            info!(in_flight = self.tally.in_flight(), "job pool shutting down");
        }
        drop(sender);
        self.tally.in_flight()
    }

    /// Shut down and join every pool thread, waiting at most `timeout`.
    /// Returns the number of threads joined.
    pub fn join_timeout(&self, timeout: Duration) -> usize {
        self.shutdown();
        let deadline = Instant::now() + timeout;
        let mut threads = self.threads.lock();
        loop {
            if threads.iter().all(JoinHandle::is_finished) || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let mut joined = 0;
        let mut still_running = Vec::new();
        for handle in threads.drain(..) {
            if handle.is_finished() {
                if handle.join().is_ok() {
                    joined += 1;
                }
            } else {
                still_running.push(handle);
            }
        }
        *threads = still_running;
        joined
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("workers", &self.worker_count)
            .field("tally", &self.tally)
            .finish()
    }
}

// ── Thread bodies ────────────────────────────────────────────────

fn worker_loop(jobs: Receiver<Job>, outcomes: Sender<Outcome>) {
    while let Ok(job) = jobs.recv() {
        let Job { id, work } = job;
        let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
            Ok(result) => result,
            Err(payload) => Err(JobError::Panicked {
                message: panic_message(payload.as_ref()),
            }),
        };
        if outcomes.send(Outcome { id, result }).is_err() {
            break;
        }
    }
}

fn manager_loop(outcomes: Receiver<Outcome>, tally: Arc<JobTally>, counters: Arc<Counters>) {
    while let Ok(Outcome { id, result }) = outcomes.recv() {
        // Bookkeeping first and unconditionally.
        let in_flight = tally.finish();
        match result {
            Ok(callback) => {
                counters.completed.fetch_add(1, Ordering::Relaxed);
                debug!(job = %id, in_flight, "job completed");
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                    counters.callback_panics.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        job = %id,
                        message = %panic_message(payload.as_ref()),
                        "completion callback panicked"
                    );
                }
            }
            Err(error) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(job = %id, in_flight, %error, "job failed");
            }
        }
    }
    debug!("pool manager exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn status_messages() {
        assert_eq!(status_message(0), "Ready");
        assert_eq!(status_message(1), "Executing 1 tasks…");
        assert_eq!(status_message(3), "Executing 3 tasks…");
    }

    #[test]
    fn callback_receives_result() {
        let pool = JobDispatcher::new(2).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        pool.submit(|x: i32| x * 2, 21, move |r| tx.send(r).unwrap())
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 42);
        assert!(pool.wait_idle(WAIT));
        assert_eq!(pool.status(), "Ready");
        assert_eq!(pool.completed(), 1);
    }

    #[test]
    fn status_counts_in_flight_jobs() {
        let pool = JobDispatcher::new(2).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        for _ in 0..2 {
            let rx = release_rx.clone();
            pool.submit_detached(move |()| rx.recv_timeout(WAIT).is_ok(), ())
                .unwrap();
        }
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.status(), "Executing 2 tasks…");
        drop(release_tx);
        assert!(pool.wait_idle(WAIT));
        assert_eq!(pool.status(), "Ready");
    }

    #[test]
    fn panicking_job_skips_callback_but_settles_tally() {
        let pool = JobDispatcher::new(1).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded::<()>();
        pool.submit(
            |()| -> i32 { panic!("worker exploded") },
            (),
            move |_| tx.send(()).unwrap(),
        )
        .unwrap();
        assert!(pool.wait_idle(WAIT));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(pool.failed(), 1);
        assert_eq!(pool.status(), "Ready");
    }

    #[test]
    fn fallible_job_error_is_a_failure() {
        let pool = JobDispatcher::new(1).unwrap();
        let called = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&called);
        pool.submit_fallible(
            |n: u32| if n > 0 { Err(format!("bad input {n}")) } else { Ok(n) },
            7,
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        assert!(pool.wait_idle(WAIT));
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(pool.failed(), 1);
    }

    #[test]
    fn callback_panic_is_contained() {
        let pool = JobDispatcher::new(1).unwrap();
        pool.submit(|()| 1, (), |_| panic!("callback exploded"))
            .unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        pool.submit(|()| 2, (), move |r| tx.send(r).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
        assert!(pool.wait_idle(WAIT));
        assert_eq!(pool.callback_panics(), 1);
    }

    #[test]
    fn submit_after_shutdown_is_rejected() {
        let pool = JobDispatcher::new(1).unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(
            pool.submit_detached(|()| (), ()),
            Err(SubmitError::Shutdown)
        );
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.join_timeout(WAIT), 2);
    }

    #[test]
    fn shutdown_does_not_wait_for_running_jobs() {
        let pool = JobDispatcher::new(1).unwrap();
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        pool.submit(
            move |()| release_rx.recv_timeout(WAIT).is_ok(),
            (),
            move |ok| done_tx.send(ok).unwrap(),
        )
        .unwrap();
        let start = Instant::now();
        assert_eq!(pool.shutdown(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));

        // The orphaned job still completes and its callback still runs.
        release_tx.send(()).unwrap();
        assert!(done_rx.recv_timeout(WAIT).unwrap());
        assert!(pool.wait_idle(WAIT));
    }
}
