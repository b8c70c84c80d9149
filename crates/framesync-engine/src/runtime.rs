//! The render-loop owner: frame pipeline, frame context, and shutdown.
//!
//! [`Runtime`] owns the live [`Record`] and runs every frame on the
//! calling (render) thread:
//!
//! 1. refresh the status field from the job tally,
//! 2. drain the mailbox into the live record,
//! 3. publish a copy if the drain changed anything,
//! 4. wake the committed transactions,
//! 5. start the background loop (first frame only),
//! 6. run the user update with a [`FrameContext`],
//! 7. publish a copy of the final frame state.
//!
//! Step 4 comes after step 3, so a transaction opened right after another
//! one commits always sees the committed values.

use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use framesync_core::{FrameId, JobId, Record};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, RuntimeConfig};
use crate::dispatcher::{JobDispatcher, SubmitError};
use crate::event_loop::{BackgroundLoop, ScheduleError};
use crate::mailbox::Mailbox;
use crate::metrics::{FrameMetrics, RuntimeCounters};
use crate::publish::SnapshotCell;
use crate::registry::{Registry, Resource};
use crate::transaction::StateHandle;

// ── Frontend ─────────────────────────────────────────────────────

/// The windowing and drawing layer driven by [`Runtime::run`].
pub trait Frontend {
    /// Whether the user asked to close. Checked before every frame.
    fn should_close(&mut self) -> bool;

    /// Called before the frame pipeline, e.g. to poll input and write the
    /// window size into the state.
    fn begin_frame(&mut self, _state: &mut Record) {}

    /// Called after the frame pipeline, e.g. to render and present.
    fn end_frame(&mut self, _state: &Record, _metrics: &FrameMetrics) {}

    /// Release window resources. Called once, last in the shutdown sequence.
    fn shutdown(&mut self) {}
}

/// A frontend without a window that closes after a fixed number of frames.
#[derive(Clone, Debug, Default)]
pub struct Headless {
    remaining: u64,
    frames: u64,
    shut_down: bool,
}

impl Headless {
    /// Run `frames` frames, then close.
    pub fn new(frames: u64) -> Self {
        Self {
            remaining: frames,
            frames: 0,
            shut_down: false,
        }
    }

    /// Frames begun so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Whether [`Frontend::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Frontend for Headless {
    fn should_close(&mut self) -> bool {
        self.remaining == 0
    }

    fn begin_frame(&mut self, _state: &mut Record) {
        self.remaining = self.remaining.saturating_sub(1);
        self.frames += 1;
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }
}

// ── ShutdownReport ───────────────────────────────────────────────

/// Report from the shutdown sequence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Total time spent in the shutdown sequence.
    pub total_ms: u64,
    /// Whether the event-loop thread exited within the grace period.
    pub loop_joined: bool,
    /// Jobs still running or queued when the pool was told to stop.
    pub jobs_in_flight: usize,
    /// Mailbox operations dropped, each resolving its waiter as cancelled.
    pub ops_cancelled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    ShutDown,
}

// ── Runtime ──────────────────────────────────────────────────────

/// Owner of the live state and of every background context.
///
/// `R` is the resource type kept in the frame [`Registry`].
pub struct Runtime<R: Resource = ()> {
    live: Record,
    config: RuntimeConfig,
    mailbox: Arc<Mailbox>,
    snapshots: Arc<SnapshotCell>,
    handle: StateHandle,
    event_loop: BackgroundLoop,
    dispatcher: JobDispatcher,
    registry: Registry<R>,
    frame: FrameId,
    loop_started: bool,
    last_metrics: FrameMetrics,
    counters: RuntimeCounters,
    run_state: RunState,
    report: Option<ShutdownReport>,
}

impl Runtime {
    /// Take ownership of `live` and spawn the job pool. The background
    /// loop thread starts with the first frame.
    pub fn new(live: Record, config: RuntimeConfig) -> Result<Self, ConfigError> {
        Self::with_resources(live, config)
    }
}

impl<R: Resource> Runtime<R> {
    /// Like [`Runtime::new`] with a custom registry resource type.
    pub fn with_resources(mut live: Record, config: RuntimeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let field = config.status_field.as_str();
        if live.get(field).is_some_and(|v| v.as_text().is_none()) {
            return Err(ConfigError::StatusFieldNotText {
                name: field.to_string(),
            });
        }
        live.declare(field, crate::dispatcher::READY_STATUS);

        let mailbox = Arc::new(Mailbox::new());
        let snapshots = Arc::new(SnapshotCell::new(&live));
        let handle = StateHandle::new(Arc::clone(&mailbox), Arc::clone(&snapshots));
        let event_loop = BackgroundLoop::new()?;
        let dispatcher = JobDispatcher::new(config.resolved_worker_count())?;

        info!(
            workers = dispatcher.worker_count(),
            target_fps = config.target_fps,
            "runtime created"
        );
        Ok(Self {
            live,
            config,
            mailbox,
            snapshots,
            handle,
            event_loop,
            dispatcher,
            registry: Registry::new(),
            frame: FrameId(0),
            loop_started: false,
            last_metrics: FrameMetrics::default(),
            counters: RuntimeCounters::default(),
            run_state: RunState::Running,
            report: None,
        })
    }

    /// Run one frame. `update` receives the frame context and the time
    /// since the previous frame in seconds.
    pub fn run_frame(&mut self, dt: f64, update: impl FnOnce(&mut FrameContext<'_, R>, f64)) -> FrameMetrics {
        let start = Instant::now();

        // Refreshed once per frame; jobs finishing later show up next frame.
        let status = self.dispatcher.status();
        write_status(&mut self.live, &self.config.status_field, status);

        let mut report = self.mailbox.drain(&mut self.live);
        self.frame = report.frame();
        if report.changed() {
            self.snapshots.publish_copy(&self.live, self.frame);
        }
        report.settle();
        let (merged, tasks, failed) = (report.merged, report.tasks, report.failed);
        drop(report);
        let drain_us = start.elapsed().as_micros() as u64;

        if !self.loop_started {
            self.loop_started = true;
            if let Err(e) = self.event_loop.start() {
                error!(error = %e, "background loop failed to start");
            }
        }

        let update_start = Instant::now();
        {
            let mut ctx = FrameContext {
                state: &mut self.live,
                frame: self.frame,
                handle: &self.handle,
                mailbox: &self.mailbox,
                event_loop: &self.event_loop,
                dispatcher: &self.dispatcher,
                registry: &mut self.registry,
                status_field: &self.config.status_field,
            };
            update(&mut ctx, dt);
        }
        let update_us = update_start.elapsed().as_micros() as u64;

        self.snapshots.publish_copy(&self.live, self.frame);

        let metrics = FrameMetrics {
            drain_us,
            update_us,
            total_us: start.elapsed().as_micros() as u64,
            merged,
            tasks,
            failed_merges: failed,
        };
        self.counters.record(&metrics);
        self.last_metrics = metrics;
        metrics
    }

    /// Drive `frontend` at the configured frame rate until it asks to
    /// close, then shut down.
    pub fn run<F, U>(&mut self, frontend: &mut F, mut update: U) -> ShutdownReport
    where
        F: Frontend + ?Sized,
        U: FnMut(&mut FrameContext<'_, R>, f64),
    {
        let budget = self.config.frame_budget();
        let mut last = Instant::now();
        while !frontend.should_close() {
            let frame_start = Instant::now();
            let dt = frame_start.duration_since(last).as_secs_f64();
            last = frame_start;

            frontend.begin_frame(&mut self.live);
            let metrics = self.run_frame(dt, &mut update);
            frontend.end_frame(&self.live, &metrics);

            if let Some(rest) = budget.checked_sub(frame_start.elapsed()) {
                thread::sleep(rest);
            }
        }
        let report = self.shutdown();
        frontend.shutdown();
        report
    }

    /// Stop every background context.
    ///
    /// 1. stop accepting coroutines,
    /// 2. request the loop to stop,
    /// 3. stop the job pool without waiting for running jobs,
    /// 4. close the mailbox, cancelling pending merges.
    ///
    /// Then waits up to `loop_stop_grace_ms` for the loop thread.
    /// Idempotent; later calls return the first report.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        let start = Instant::now();
        self.run_state = RunState::ShutDown;

        self.event_loop.stop_accepting();
        self.event_loop.request_stop();
        let jobs_in_flight = self.dispatcher.shutdown();
        let ops_cancelled = self.mailbox.close();
        let loop_joined = self.event_loop.join_timeout(self.config.loop_stop_grace());
        if !loop_joined {
            warn!("background loop did not stop within the grace period");
        }

        let report = ShutdownReport {
            total_ms: start.elapsed().as_millis() as u64,
            loop_joined,
            jobs_in_flight,
            ops_cancelled,
        };
        info!(?report, "runtime shut down");
        self.report = Some(report.clone());
        report
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.run_state == RunState::ShutDown
    }

    /// Handle for opening transactions from other threads.
    pub fn handle(&self) -> StateHandle {
        self.handle.clone()
    }

    /// Schedule a coroutine on the background loop.
    pub fn spawn<Fut>(&self, fut: Fut) -> Result<tokio::task::JoinHandle<Fut::Output>, ScheduleError>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.event_loop.schedule(fut)
    }

    /// The live state. Render thread only.
    pub fn state(&self) -> &Record {
        &self.live
    }

    /// The live state, mutably. Render thread only.
    pub fn state_mut(&mut self) -> &mut Record {
        &mut self.live
    }

    /// Frame id of the most recent frame (0 before the first).
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Metrics of the most recent frame.
    pub fn last_metrics(&self) -> FrameMetrics {
        self.last_metrics
    }

    /// Counters since creation.
    pub fn counters(&self) -> RuntimeCounters {
        self.counters
    }

    /// The job pool.
    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    /// The background loop.
    pub fn event_loop(&self) -> &BackgroundLoop {
        &self.event_loop
    }

    /// The mailbox drained each frame.
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// The frame resource registry.
    pub fn registry(&mut self) -> &mut Registry<R> {
        &mut self.registry
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl<R: Resource> Drop for Runtime<R> {
    fn drop(&mut self) {
        if self.run_state != RunState::ShutDown {
            self.shutdown();
        }
    }
}

impl<R: Resource> std::fmt::Debug for Runtime<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("frame", &self.frame)
            .field("run_state", &self.run_state)
            .field("event_loop", &self.event_loop)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

fn write_status(state: &mut Record, field: &str, status: String) {
    if let Err(e) = state.set(field, status) {
        debug!(field, error = %e, "status field not updated");
    }
}

// ── FrameContext ─────────────────────────────────────────────────

/// What the per-frame update sees: the live state plus the entry points
/// to background work.
pub struct FrameContext<'a, R: Resource = ()> {
    state: &'a mut Record,
    frame: FrameId,
    handle: &'a StateHandle,
    mailbox: &'a Arc<Mailbox>,
    event_loop: &'a BackgroundLoop,
    dispatcher: &'a JobDispatcher,
    registry: &'a mut Registry<R>,
    status_field: &'a str,
}

impl<'a, R: Resource> FrameContext<'a, R> {
    /// The live state.
    pub fn state(&self) -> &Record {
        &*self.state
    }

    /// The live state, mutably. Safe: the render thread is its only owner.
    pub fn state_mut(&mut self) -> &mut Record {
        &mut *self.state
    }

    /// Id of the current frame.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Handle for transactions, to move into coroutines and callbacks.
    pub fn handle(&self) -> StateHandle {
        self.handle.clone()
    }

    /// Schedule a coroutine on the background loop. Does not block and
    /// does not run any of `fut` on this thread.
    pub fn spawn<Fut>(&self, fut: Fut) -> Result<tokio::task::JoinHandle<Fut::Output>, ScheduleError>
    where
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        self.event_loop.schedule(fut)
    }

    /// The frame resource registry.
    pub fn registry(&mut self) -> &mut Registry<R> {
        &mut *self.registry
    }

    /// Current job status line, read live from the dispatcher.
    ///
    /// The status slot in [`state`](Self::state) is only refreshed at the
    /// start of each frame, so it can still read "Executing N tasks…"
    /// after the last job finished and the tally dropped to 0. It
    /// catches up on the next frame.
    pub fn status(&self) -> String {
        self.dispatcher.status()
    }

    /// Submit `job(args)` to the pool and update the status field.
    /// `on_complete` runs on the pool-management thread; use a
    /// [`StateHandle`] inside it to change state.
    pub fn submit_job<A, T, J, C>(&mut self, job: J, args: A, on_complete: C) -> Result<JobId, SubmitError>
    where
        A: Send + 'static,
        T: Send + 'static,
        J: FnOnce(A) -> T + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let id = self.dispatcher.submit(job, args, on_complete)?;
        self.refresh_status();
        Ok(id)
    }

    /// [`submit_job`](Self::submit_job) for jobs that fail through `Err`.
    pub fn submit_job_fallible<A, T, E, J, C>(
        &mut self,
        job: J,
        args: A,
        on_complete: C,
    ) -> Result<JobId, SubmitError>
    where
        A: Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display,
        J: FnOnce(A) -> Result<T, E> + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let id = self.dispatcher.submit_fallible(job, args, on_complete)?;
        self.refresh_status();
        Ok(id)
    }

    /// Submit `job(args)`; on success `on_complete` runs on the render
    /// thread during a later frame's drain, with the live state.
    pub fn submit_job_to_frame<A, T, J, C>(
        &mut self,
        job: J,
        args: A,
        on_complete: C,
    ) -> Result<JobId, SubmitError>
    where
        A: Send + 'static,
        T: Send + 'static,
        J: FnOnce(A) -> T + Send + 'static,
        C: FnOnce(&mut Record, T) + Send + 'static,
    {
        let mailbox = Arc::clone(self.mailbox);
        self.submit_job(job, args, move |result| {
            let queued = mailbox.push_task("job completion", move |state| {
                on_complete(state, result);
                Ok(())
            });
            if queued.is_err() {
                debug!("mailbox closed, job completion dropped");
            }
        })
    }

    fn refresh_status(&mut self) {
        let status = self.dispatcher.status();
        write_status(&mut *self.state, self.status_field, status);
    }
}

impl<R: Resource> std::fmt::Debug for FrameContext<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameContext")
            .field("frame", &self.frame)
            .field("status_field", &self.status_field)
            .finish()
    }
}
