//! Sync transactions: snapshot, mutate, merge back on the render thread.
//!
//! ```text
//! Opened ──commit──▶ AwaitingMerge ──drain──▶ Committed
//!    │                     │
//!    └──abort / drop──▶ Aborted ◀──merge failed / cancelled
//! ```
//!
//! A [`Transaction`] opens against the latest published copy of the live
//! state and hands the caller a private deep copy to mutate. On
//! [`commit`](Transaction::commit) only the slots that differ from the
//! base are queued as a merge, so concurrent transactions writing
//! distinct fields never lose each other's updates.
//!
//! The returned [`PendingCommit`] is a future. Awaiting it suspends the
//! calling task until the render thread has drained the merge and
//! published the result.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use framesync_core::{
    changes, deep_copy, ChangeSet, FrameId, MergeError, MergeMode, MergeStats, Record,
    TransactionId,
};
use tokio::sync::oneshot;
use tracing::debug;

use crate::mailbox::{CommitResult, Mailbox, MailboxClosed, MailboxOp};
use crate::publish::SnapshotCell;

// ── Error types ──────────────────────────────────────────────────

/// Why a transaction did not commit.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// The mailbox was closed before the merge could be queued.
    #[error("mailbox is closed")]
    MailboxClosed,
    /// The queued merge was dropped (shutdown) before it ran.
    #[error("merge was cancelled before it ran")]
    Cancelled,
    /// The merge ran and was rejected; the live state is unchanged.
    #[error("merge failed: {0}")]
    MergeFailed(#[from] MergeError),
}

impl From<MailboxClosed> for SyncError {
    fn from(_: MailboxClosed) -> Self {
        Self::MailboxClosed
    }
}

/// Receipt for a merged transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Commit {
    /// The committed transaction.
    pub transaction: TransactionId,
    /// Frame whose drain applied the merge.
    pub frame: FrameId,
    /// What the merge did.
    pub stats: MergeStats,
}

/// Lifecycle phase of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxPhase {
    /// Snapshot taken; caller is mutating it.
    Opened,
    /// Merge queued; waiting for the render thread.
    AwaitingMerge,
    /// Merge applied to the live state.
    Committed,
    /// Discarded, rejected or cancelled; live state untouched.
    Aborted,
}

// ── StateHandle ──────────────────────────────────────────────────

/// Cloneable, thread-safe entry point for off-render-thread mutation.
#[derive(Clone)]
pub struct StateHandle {
    mailbox: Arc<Mailbox>,
    snapshots: Arc<SnapshotCell>,
}

impl StateHandle {
    /// Build a handle over a mailbox and the cell its drains publish into.
    pub fn new(mailbox: Arc<Mailbox>, snapshots: Arc<SnapshotCell>) -> Self {
        Self { mailbox, snapshots }
    }

    /// Open a transaction in the given merge mode.
    pub fn sync(&self, mode: MergeMode) -> Transaction {
        let base = self.snapshots.latest_shared();
        let working = deep_copy(&base);
        let id = TransactionId::next();
        debug!(transaction = %id, %mode, "transaction opened");
        Transaction {
            id,
            mode,
            base,
            working,
            mailbox: Arc::clone(&self.mailbox),
            phase: TxPhase::Opened,
        }
    }

    /// Open a deep-merge transaction.
    pub fn sync_deep(&self) -> Transaction {
        self.sync(MergeMode::Deep)
    }

    /// Open a transaction, apply `f` to the snapshot and commit.
    pub fn update(&self, mode: MergeMode, f: impl FnOnce(&mut Record)) -> PendingCommit {
        let mut tx = self.sync(mode);
        f(tx.state_mut());
        tx.commit()
    }

    /// Like [`update`](Self::update), but `f` may fail. On `Err` the
    /// transaction is aborted and nothing is queued.
    pub fn try_update<E>(
        &self,
        mode: MergeMode,
        f: impl FnOnce(&mut Record) -> Result<(), E>,
    ) -> Result<PendingCommit, E> {
        let mut tx = self.sync(mode);
        f(tx.state_mut())?;
        Ok(tx.commit())
    }

    /// An isolated copy of the latest published state.
    ///
    /// Writes to the copy, including through nested objects, reach neither
    /// the live state nor later transactions.
    pub fn latest(&self) -> Record {
        self.snapshots.latest()
    }

    /// Frame of the latest publication.
    pub fn latest_frame(&self) -> FrameId {
        self.snapshots.latest_frame()
    }

    /// Queue a closure to run against the live state on the render thread.
    pub fn run_on_frame(
        &self,
        label: &'static str,
        f: impl FnOnce(&mut Record) -> Result<(), framesync_core::RecordError> + Send + 'static,
    ) -> Result<(), MailboxClosed> {
        self.mailbox.push_task(label, f)
    }
}

impl std::fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHandle")
            .field("pending", &self.mailbox.pending())
            .field("latest_frame", &self.snapshots.latest_frame())
            .finish()
    }
}

// ── Transaction ──────────────────────────────────────────────────

/// An open sync transaction. Dropping it without committing aborts it.
pub struct Transaction {
    id: TransactionId,
    mode: MergeMode,
    base: Arc<Record>,
    working: Record,
    mailbox: Arc<Mailbox>,
    phase: TxPhase,
}

impl Transaction {
    /// Unique id of this transaction.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Merge mode used at commit.
    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Current phase (always `Opened` while the caller holds it).
    pub fn phase(&self) -> TxPhase {
        self.phase
    }

    /// The private snapshot.
    pub fn state(&self) -> &Record {
        &self.working
    }

    /// The private snapshot, mutably.
    pub fn state_mut(&mut self) -> &mut Record {
        &mut self.working
    }

    /// The change set this transaction would merge if committed now.
    ///
    /// The change set is detached from the snapshot: references obtained
    /// through [`state`](Self::state) cannot alter it once taken.
    pub fn pending_changes(&self) -> ChangeSet {
        changes(&self.base, &self.working, self.mode)
    }

    /// Queue the merge and return a future for its outcome.
    ///
    /// The merge is queued immediately, whether or not the future is
    /// ever polled.
    pub fn commit(mut self) -> PendingCommit {
        let delta = self.pending_changes();
        let fields = delta.len();
        let (op, rx) = MailboxOp::merge(self.id, delta, self.mode);
        match self.mailbox.push(op) {
            Ok(()) => {
                self.phase = TxPhase::AwaitingMerge;
                debug!(transaction = %self.id, fields, "merge queued");
                PendingCommit {
                    transaction: self.id,
                    phase: TxPhase::AwaitingMerge,
                    state: PendingState::Waiting(rx),
                }
            }
            Err(closed) => {
                self.phase = TxPhase::Aborted;
                debug!(transaction = %self.id, "mailbox closed, commit rejected");
                PendingCommit {
                    transaction: self.id,
                    phase: TxPhase::Aborted,
                    state: PendingState::Failed(Some(closed.into())),
                }
            }
        }
    }

    /// Discard the snapshot. Nothing is queued.
    pub fn abort(mut self) {
        self.phase = TxPhase::Aborted;
        debug!(transaction = %self.id, "transaction aborted");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.phase == TxPhase::Opened {
            self.phase = TxPhase::Aborted;
            debug!(transaction = %self.id, "transaction dropped without commit");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("phase", &self.phase)
            .finish()
    }
}

// ── PendingCommit ────────────────────────────────────────────────

enum PendingState {
    Waiting(oneshot::Receiver<CommitResult>),
    Failed(Option<SyncError>),
    Done,
}

/// Future resolving once the render thread has applied (or rejected)
/// a committed transaction's merge.
///
/// Resolves to [`SyncError::Cancelled`] if the merge is dropped at
/// shutdown, so a waiting task never hangs on a closed mailbox.
#[must_use = "the merge is queued regardless; await this to observe the outcome"]
pub struct PendingCommit {
    transaction: TransactionId,
    phase: TxPhase,
    state: PendingState,
}

impl PendingCommit {
    /// The transaction this future belongs to.
    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// `AwaitingMerge` until resolved, then `Committed` or `Aborted`.
    pub fn phase(&self) -> TxPhase {
        self.phase
    }

    /// Block the current thread until the outcome is known.
    ///
    /// For plain threads such as job callbacks. Must not be called from
    /// within an async runtime, and must not be called from the render
    /// thread (the merge would never drain).
    pub fn blocking_wait(mut self) -> Result<Commit, SyncError> {
        let state = std::mem::replace(&mut self.state, PendingState::Done);
        let result = match state {
            PendingState::Waiting(rx) => rx.blocking_recv().unwrap_or(Err(SyncError::Cancelled)),
            PendingState::Failed(e) => Err(e.unwrap_or(SyncError::Cancelled)),
            PendingState::Done => Err(SyncError::Cancelled),
        };
        self.resolve(&result);
        result
    }

    fn resolve(&mut self, result: &CommitResult) {
        self.phase = match result {
            Ok(_) => TxPhase::Committed,
            Err(_) => TxPhase::Aborted,
        };
        self.state = PendingState::Done;
    }
}

impl Future for PendingCommit {
    type Output = Result<Commit, SyncError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match &mut this.state {
            PendingState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => result,
                Poll::Ready(Err(_)) => Err(SyncError::Cancelled),
                Poll::Pending => return Poll::Pending,
            },
            PendingState::Failed(e) => Err(e.take().unwrap_or(SyncError::Cancelled)),
            // Polled after completion.
            PendingState::Done => Err(SyncError::Cancelled),
        };
        this.resolve(&result);
        Poll::Ready(result)
    }
}

impl std::fmt::Debug for PendingCommit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCommit")
            .field("transaction", &self.transaction)
            .field("phase", &self.phase)
            .finish()
    }
}
