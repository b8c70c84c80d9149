//! Frame-synchronized mailbox of pending state operations.
//!
//! Any thread may [`push`](Mailbox::push) work; only the render thread
//! [`drain`](Mailbox::drain)s it, exactly once per frame, before user
//! frame code runs.
//!
//! # Drain bounding
//!
//! `drain` swaps the entire queue out under the lock and then executes
//! the operations with the lock released. Anything pushed while a drain
//! is running lands in the fresh queue and is executed by the *next*
//! drain. Producers never wait on merge work.
//!
//! # Commit signals
//!
//! Merge results are not delivered to waiting transactions during the
//! drain. They are collected in the [`DrainReport`] and sent by
//! [`DrainReport::settle`] (or when the report is dropped), so the caller
//! can publish the post-drain snapshot first.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use framesync_core::{
    apply_changes, ChangeSet, FrameId, MergeMode, Record, RecordError, TransactionId,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::transaction::{Commit, SyncError};

/// Outcome delivered to a transaction waiting on its merge.
pub(crate) type CommitResult = Result<Commit, SyncError>;

/// Closure run against the live record on the render thread.
pub type TaskFn = Box<dyn FnOnce(&mut Record) -> Result<(), RecordError> + Send + 'static>;

/// The mailbox no longer accepts operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("mailbox is closed")]
pub struct MailboxClosed;

// ── MailboxOp ────────────────────────────────────────────────────

/// A queued operation.
pub enum MailboxOp {
    /// Merge a transaction's change set into the live record.
    Merge(MergeOp),
    /// Run a closure against the live record.
    Task(TaskOp),
}

/// A transaction's pending merge.
pub struct MergeOp {
    transaction: TransactionId,
    changes: ChangeSet,
    mode: MergeMode,
    signal: oneshot::Sender<CommitResult>,
}

/// A closure queued for the render thread.
pub struct TaskOp {
    label: &'static str,
    run: TaskFn,
}

impl MailboxOp {
    /// Build a merge operation and the receiver its outcome is sent to.
    pub(crate) fn merge(
        transaction: TransactionId,
        changes: ChangeSet,
        mode: MergeMode,
    ) -> (Self, oneshot::Receiver<CommitResult>) {
        let (signal, rx) = oneshot::channel();
        let op = Self::Merge(MergeOp {
            transaction,
            changes,
            mode,
            signal,
        });
        (op, rx)
    }

    /// Build a task operation. `label` identifies it in logs.
    pub fn task(
        label: &'static str,
        run: impl FnOnce(&mut Record) -> Result<(), RecordError> + Send + 'static,
    ) -> Self {
        Self::Task(TaskOp {
            label,
            run: Box::new(run),
        })
    }
}

impl fmt::Debug for MailboxOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Merge(m) => f
                .debug_struct("Merge")
                .field("transaction", &m.transaction)
                .field("mode", &m.mode)
                .field("fields", &m.changes.len())
                .finish(),
            Self::Task(t) => f.debug_struct("Task").field("label", &t.label).finish(),
        }
    }
}

// ── Mailbox ──────────────────────────────────────────────────────

struct Inner {
    queue: VecDeque<MailboxOp>,
    closed: bool,
    drains: u64,
}

/// Unbounded FIFO of operations for the render thread.
pub struct Mailbox {
    inner: Mutex<Inner>,
}

// Compile-time assertion: Mailbox must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<Mailbox>();
};

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    /// Create an empty, open mailbox.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                closed: false,
                drains: 0,
            }),
        }
    }

    /// Append an operation. Callable from any thread.
    pub fn push(&self, op: MailboxOp) -> Result<(), MailboxClosed> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(MailboxClosed);
        }
        inner.queue.push_back(op);
        Ok(())
    }

    /// Queue a closure to run against the live record on the render thread.
    pub fn push_task(
        &self,
        label: &'static str,
        run: impl FnOnce(&mut Record) -> Result<(), RecordError> + Send + 'static,
    ) -> Result<(), MailboxClosed> {
        self.push(MailboxOp::task(label, run))
    }

    /// Execute every operation queued at the instant of the call, in FIFO
    /// order, against `target`.
    ///
    /// Must only be called by the thread that owns `target`. Failed merges
    /// and failed tasks are logged and skipped.
    pub fn drain(&self, target: &mut Record) -> DrainReport {
        let (ops, frame) = {
            let mut inner = self.inner.lock();
            inner.drains += 1;
            (std::mem::take(&mut inner.queue), FrameId(inner.drains))
        };

        let mut report = DrainReport::new(frame);
        for op in ops {
            match op {
                MailboxOp::Merge(m) => report.run_merge(m, target),
                MailboxOp::Task(t) => report.run_task(t, target),
            }
        }
        if report.merged + report.tasks + report.failed > 0 {
            debug!(
                frame = %frame,
                merged = report.merged,
                tasks = report.tasks,
                failed = report.failed,
                "mailbox drained"
            );
        }
        report
    }

    /// Close the mailbox and drop every pending operation.
    ///
    /// Transactions whose merge was pending observe
    /// [`SyncError::Cancelled`]; later pushes fail with [`MailboxClosed`].
    /// Returns the number of operations dropped.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.queue)
        };
        // Senders are dropped here, outside the lock.
        dropped.len()
    }

    /// Number of operations waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of drains performed so far. Equals the last drained [`FrameId`].
    pub fn drains(&self) -> u64 {
        self.inner.lock().drains
    }
}

// ── DrainReport ──────────────────────────────────────────────────

/// What one [`Mailbox::drain`] call did.
///
/// Holds the commit signals of the merges it ran until
/// [`settle`](Self::settle) is called or the report is dropped.
pub struct DrainReport {
    frame: FrameId,
    /// Merges applied successfully.
    pub merged: usize,
    /// Tasks run (including tasks that returned an error).
    pub tasks: usize,
    /// Merges that failed and were skipped, plus tasks that panicked.
    pub failed: usize,
    signals: Vec<(oneshot::Sender<CommitResult>, CommitResult)>,
}

impl DrainReport {
    fn new(frame: FrameId) -> Self {
        Self {
            frame,
            merged: 0,
            tasks: 0,
            failed: 0,
            signals: Vec::new(),
        }
    }

    /// Frame number of this drain.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Whether any operation may have modified the target.
    pub fn changed(&self) -> bool {
        self.merged + self.tasks > 0
    }

    /// Number of commit signals not yet delivered.
    pub fn unsettled(&self) -> usize {
        self.signals.len()
    }

    /// Deliver every pending commit signal, waking the transactions.
    pub fn settle(&mut self) {
        for (signal, result) in self.signals.drain(..) {
            // The receiver may be gone; nobody is waiting then.
            let _ = signal.send(result);
        }
    }

    fn run_merge(&mut self, op: MergeOp, target: &mut Record) {
        let MergeOp {
            transaction,
            changes,
            mode,
            signal,
        } = op;
        let result = match apply_changes(target, &changes, mode) {
            Ok(stats) => {
                self.merged += 1;
                Ok(Commit {
                    transaction,
                    frame: self.frame,
                    stats,
                })
            }
            Err(e) => {
                self.failed += 1;
                warn!(%transaction, path = %e.path(), error = %e, "merge failed, skipping");
                Err(SyncError::MergeFailed(e))
            }
        };
        self.signals.push((signal, result));
    }

    fn run_task(&mut self, op: TaskOp, target: &mut Record) {
        let TaskOp { label, run } = op;
        match panic::catch_unwind(AssertUnwindSafe(|| run(target))) {
            Ok(Ok(())) => self.tasks += 1,
            Ok(Err(e)) => {
                self.tasks += 1;
                warn!(task = label, error = %e, "render-thread task failed");
            }
            Err(_) => {
                self.failed += 1;
                warn!(task = label, "render-thread task panicked");
            }
        }
    }
}

impl Drop for DrainReport {
    fn drop(&mut self) {
        self.settle();
    }
}

impl fmt::Debug for DrainReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainReport")
            .field("frame", &self.frame)
            .field("merged", &self.merged)
            .field("tasks", &self.tasks)
            .field("failed", &self.failed)
            .field("unsettled", &self.signals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framesync_core::MergeError;
    use std::sync::Arc;

    fn push_merge(mailbox: &Mailbox, changes: Record) -> oneshot::Receiver<CommitResult> {
        let (op, rx) = MailboxOp::merge(TransactionId::next(), changes.into(), MergeMode::Shallow);
        mailbox.push(op).unwrap();
        rx
    }

    #[test]
    fn drain_applies_in_fifo_order() {
        let mailbox = Mailbox::new();
        let mut live = Record::new().with("log", Vec::<i64>::new());
        for i in 0..3 {
            mailbox
                .push_task("append", move |r| {
                    r.update("log", |v| {
                        if let framesync_core::Value::List(items) = v {
                            items.push(i.into());
                        }
                    })
                })
                .unwrap();
        }
        let report = mailbox.drain(&mut live);
        assert_eq!(report.tasks, 3);
        assert_eq!(live.get_as::<Vec<i64>>("log").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn signals_wait_for_settle() {
        let mailbox = Mailbox::new();
        let mut live = Record::new();
        let mut rx = push_merge(&mailbox, Record::new().with("x", 1));

        let mut report = mailbox.drain(&mut live);
        assert_eq!(report.merged, 1);
        assert_eq!(report.unsettled(), 1);
        assert!(rx.try_recv().is_err());

        report.settle();
        let commit = rx.try_recv().unwrap().unwrap();
        assert_eq!(commit.frame, FrameId(1));
        assert_eq!(live.get_as::<i64>("x").unwrap(), 1);
    }

    #[test]
    fn dropping_report_settles() {
        let mailbox = Mailbox::new();
        let mut live = Record::new();
        let mut rx = push_merge(&mailbox, Record::new().with("x", 1));
        drop(mailbox.drain(&mut live));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn failed_merge_does_not_stall_drain() {
        let mailbox = Mailbox::new();
        let mut live = Record::new().declared("n", 0);
        let mut bad = push_merge(&mailbox, Record::new().with("n", "text"));
        let mut good = push_merge(&mailbox, Record::new().with("n", 5));

        let report = mailbox.drain(&mut live);
        assert_eq!(report.failed, 1);
        assert_eq!(report.merged, 1);
        drop(report);

        assert!(matches!(
            bad.try_recv().unwrap(),
            Err(SyncError::MergeFailed(MergeError::KindMismatch { .. }))
        ));
        assert!(good.try_recv().unwrap().is_ok());
        assert_eq!(live.get_as::<i64>("n").unwrap(), 5);
    }

    #[test]
    fn ops_pushed_during_drain_run_next_frame() {
        let mailbox = Arc::new(Mailbox::new());
        let mut live = Record::new().with("hits", 0);

        let inner = Arc::clone(&mailbox);
        mailbox
            .push_task("reenqueue", move |_| {
                inner
                    .push_task("late", |r| r.set("late", true).map(drop))
                    .map_err(|_| RecordError::MissingField {
                        name: "mailbox".into(),
                    })
            })
            .unwrap();

        let first = mailbox.drain(&mut live);
        assert_eq!(first.tasks, 1);
        assert!(!live.contains("late"));
        assert_eq!(mailbox.pending(), 1);

        let second = mailbox.drain(&mut live);
        assert_eq!(second.tasks, 1);
        assert_eq!(second.frame(), FrameId(2));
        assert!(live.get_as::<bool>("late").unwrap());
    }

    #[test]
    fn close_cancels_pending_and_rejects_pushes() {
        let mailbox = Mailbox::new();
        let mut rx = push_merge(&mailbox, Record::new().with("x", 1));
        assert_eq!(mailbox.close(), 1);
        assert!(mailbox.is_closed());
        assert!(rx.try_recv().is_err());
        assert_eq!(
            mailbox.push_task("after", |_| Ok(())),
            Err(MailboxClosed)
        );
    }

    #[test]
    fn panicking_task_is_contained() {
        let mailbox = Mailbox::new();
        let mut live = Record::new();
        mailbox
            .push_task("boom", |_| panic!("task exploded"))
            .unwrap();
        mailbox
            .push_task("after", |r| r.set("ok", true).map(drop))
            .unwrap();
        let report = mailbox.drain(&mut live);
        assert_eq!(report.failed, 1);
        assert_eq!(report.tasks, 1);
        assert!(live.contains("ok"));
    }
}
