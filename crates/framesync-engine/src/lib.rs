//! Concurrency core for framesync.
//!
//! Owns everything that moves state between threads. The render thread
//! owns the live [`Record`](framesync_core::Record) through a [`Runtime`];
//! other contexts change it only by queueing operations on the
//! [`Mailbox`] (directly, or through a [`Transaction`] opened from a
//! [`StateHandle`]), which the render thread drains once per frame.
//!
//! Background work runs in two places: cooperative coroutines on the
//! single-threaded [`BackgroundLoop`], and blocking jobs on the
//! [`JobDispatcher`] worker pool.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod event_loop;
pub mod mailbox;
pub mod metrics;
pub mod publish;
pub mod registry;
pub mod runtime;
pub mod transaction;

pub use config::{ConfigError, RuntimeConfig};
pub use dispatcher::{status_message, JobDispatcher, JobError, JobTally, SubmitError, READY_STATUS};
pub use event_loop::{BackgroundLoop, LoopPhase, ScheduleError};
pub use mailbox::{DrainReport, Mailbox, MailboxClosed, MailboxOp, TaskFn};
pub use metrics::{FrameMetrics, RuntimeCounters};
pub use publish::SnapshotCell;
pub use registry::{Registry, Resource, Size};
pub use runtime::{FrameContext, Frontend, Headless, Runtime, ShutdownReport};
pub use transaction::{Commit, PendingCommit, StateHandle, SyncError, Transaction, TxPhase};
