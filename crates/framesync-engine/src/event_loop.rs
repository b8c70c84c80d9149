//! Background event loop: one thread, many cooperative tasks.
//!
//! [`BackgroundLoop`] owns a tokio `current_thread` runtime. Tasks can be
//! scheduled from any thread at any time after construction; they start
//! running once [`start`](BackgroundLoop::start) has spawned the
//! `framesync-loop` thread that drives the runtime.
//!
//! Stopping is a request, not an interruption: the loop thread returns
//! from its driver, drops the runtime, and every task still suspended is
//! abandoned at its current await point.

use std::future::Future;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::config::ConfigError;

/// Error scheduling a task on the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    /// The loop has stopped accepting new tasks.
    #[error("event loop is not accepting tasks")]
    NotAccepting,
}

/// Lifecycle phase of the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    /// Constructed; tasks may be scheduled but do not run yet.
    Idle,
    /// The loop thread is driving tasks.
    Running,
    /// A stop was requested; the thread may still be winding down.
    Stopping,
    /// The thread has exited (or never started and the loop was stopped).
    Stopped,
}

struct LoopState {
    phase: LoopPhase,
    accepting: bool,
    runtime: Option<Runtime>,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

/// A dedicated thread hosting a single-threaded cooperative scheduler.
pub struct BackgroundLoop {
    handle: Handle,
    state: Mutex<LoopState>,
}

// Compile-time assertion: BackgroundLoop must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<BackgroundLoop>();
};

impl BackgroundLoop {
    /// Build the runtime. No thread is spawned until [`start`](Self::start).
    pub fn new() -> Result<Self, ConfigError> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .thread_name("framesync-loop")
            .build()
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: format!("event loop runtime: {e}"),
            })?;
        Ok(Self {
            handle: runtime.handle().clone(),
            state: Mutex::new(LoopState {
                phase: LoopPhase::Idle,
                accepting: true,
                runtime: Some(runtime),
                stop_tx: None,
                thread: None,
            }),
        })
    }

    /// Spawn the loop thread. Idempotent; a stopped loop stays stopped.
    pub fn start(&self) -> Result<(), ConfigError> {
        let mut state = self.state.lock();
        if state.phase != LoopPhase::Idle {
            return Ok(());
        }
        let Some(runtime) = state.runtime.take() else {
            return Ok(());
        };
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let thread = thread::Builder::new()
            .name("framesync-loop".into())
            .spawn(move || {
                // Either a stop request or the sender being dropped ends the loop.
                let _ = runtime.block_on(stop_rx);
                drop(runtime);
                debug!("event loop thread exiting");
            })
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: format!("framesync-loop: {e}"),
            })?;
        state.stop_tx = Some(stop_tx);
        state.thread = Some(thread);
        state.phase = LoopPhase::Running;
        info!("event loop started");
        Ok(())
    }

    /// Schedule `fut` on the loop. Never blocks and never runs `fut` on
    /// the calling thread.
    pub fn schedule<F>(&self, fut: F) -> Result<tokio::task::JoinHandle<F::Output>, ScheduleError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let state = self.state.lock();
        if !state.accepting {
            return Err(ScheduleError::NotAccepting);
        }
        Ok(self.handle.spawn(fut))
    }

    /// Reject further [`schedule`](Self::schedule) calls. Already
    /// scheduled tasks keep running.
    pub fn stop_accepting(&self) {
        self.state.lock().accepting = false;
    }

    /// Whether [`schedule`](Self::schedule) currently accepts tasks.
    pub fn is_accepting(&self) -> bool {
        self.state.lock().accepting
    }

    /// Ask the loop thread to exit. Non-blocking.
    pub fn request_stop(&self) {
        let (runtime, stop_tx) = {
            let mut state = self.state.lock();
            state.accepting = false;
            match state.phase {
                LoopPhase::Idle => {
                    state.phase = LoopPhase::Stopped;
                    (state.runtime.take(), None)
                }
                LoopPhase::Running => {
                    state.phase = LoopPhase::Stopping;
                    (None, state.stop_tx.take())
                }
                LoopPhase::Stopping | LoopPhase::Stopped => (None, None),
            }
        };
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
            info!("event loop stop requested");
        }
        if let Some(runtime) = runtime {
            // Never started: drop pending tasks without blocking.
            runtime.shutdown_background();
        }
    }

    /// Wait up to `timeout` for the loop thread to exit after
    /// [`request_stop`](Self::request_stop). Returns whether it did.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let mut state = self.state.lock();
            match state.thread.as_ref() {
                None => return state.phase != LoopPhase::Running,
                Some(t) if t.is_finished() => {
                    let joined = state.thread.take().map_or(true, |t| t.join().is_ok());
                    state.phase = LoopPhase::Stopped;
                    return joined;
                }
                Some(_) => {}
            }
            drop(state);
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LoopPhase {
        self.state.lock().phase
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        self.request_stop();
    }
}

impl std::fmt::Debug for BackgroundLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BackgroundLoop")
            .field("phase", &state.phase)
            .field("accepting", &state.accepting)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn wait_for(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn tasks_scheduled_before_start_run_after() {
        let lp = BackgroundLoop::new().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        lp.schedule(async move {
            h.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(lp.phase(), LoopPhase::Idle);

        lp.start().unwrap();
        lp.start().unwrap();
        wait_for(|| hits.load(Ordering::SeqCst) == 1);
        assert_eq!(lp.phase(), LoopPhase::Running);

        lp.request_stop();
        assert!(lp.join_timeout(Duration::from_secs(2)));
        assert_eq!(lp.phase(), LoopPhase::Stopped);
    }

    #[test]
    fn tasks_interleave_cooperatively() {
        let lp = BackgroundLoop::new().unwrap();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (tx, rx) = crossbeam_channel::unbounded();
        for id in 0..2 {
            let order = Arc::clone(&order);
            let tx = tx.clone();
            lp.schedule(async move {
                for step in 0..3 {
                    order.lock().push((id, step));
                    tokio::task::yield_now().await;
                }
                let _ = tx.send(id);
            })
            .unwrap();
        }
        lp.start().unwrap();
        for _ in 0..2 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        let order = order.lock();
        assert_eq!(order.len(), 6);
        // Both tasks made progress before either finished.
        let first_done = order.iter().position(|&(_, s)| s == 2).unwrap();
        assert!(order[..first_done].iter().any(|&(id, _)| id == 0));
        assert!(order[..first_done].iter().any(|&(id, _)| id == 1));
    }

    #[test]
    fn stop_rejects_new_tasks() {
        let lp = BackgroundLoop::new().unwrap();
        lp.start().unwrap();
        lp.stop_accepting();
        assert_eq!(
            lp.schedule(async {}).unwrap_err(),
            ScheduleError::NotAccepting
        );
        lp.request_stop();
        lp.request_stop();
        assert!(lp.join_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn stop_abandons_suspended_tasks() {
        let lp = BackgroundLoop::new().unwrap();
        lp.start().unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&finished);
        lp.schedule(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            f.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        lp.request_stop();
        assert!(lp.join_timeout(Duration::from_secs(2)));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_before_start() {
        let lp = BackgroundLoop::new().unwrap();
        lp.schedule(async {}).unwrap();
        lp.request_stop();
        assert_eq!(lp.phase(), LoopPhase::Stopped);
        assert!(lp.join_timeout(Duration::from_millis(10)));
        lp.start().unwrap();
        assert_eq!(lp.phase(), LoopPhase::Stopped);
    }
}
