//! framesync: frame-synchronized shared state for immediate-mode GUIs.
//!
//! This is the top-level facade crate that re-exports the public API of
//! the framesync sub-crates. For most applications, adding `framesync`
//! as a single dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use framesync::prelude::*;
//!
//! let state = Record::new().declared("clicks", 0);
//! let mut runtime = Runtime::new(state, RuntimeConfig::default()).unwrap();
//!
//! // Any thread may open a transaction; the render thread applies it.
//! let pending = runtime.handle().update(MergeMode::Shallow, |s| {
//!     s.set("clicks", 1).unwrap();
//! });
//!
//! runtime.run_frame(0.0, |ctx, _dt| {
//!     assert_eq!(ctx.state().get_as::<i64>("clicks").unwrap(), 1);
//! });
//! assert!(pending.blocking_wait().is_ok());
//! runtime.shutdown();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`state`] | `framesync-core` | `Record`, `Value`, snapshots, the merge engine |
//! | [`engine`] | `framesync-engine` | Mailbox, transactions, event loop, job pool, runtime |
//! | [`logging`] | (this crate) | Subscriber setup for binaries |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// State model, snapshots and merging (`framesync-core`).
///
/// Contains [`state::Record`], [`state::Value`], [`state::deep_copy`],
/// [`state::changes`], [`state::ChangeSet`] and
/// [`state::merge`](fn@state::merge).
pub use framesync_core as state;

/// Concurrency core (`framesync-engine`).
///
/// [`engine::Runtime`] owns the live state and drives frames;
/// [`engine::StateHandle`] opens transactions from any thread.
pub use framesync_engine as engine;

pub mod logging;

/// Common imports for typical framesync usage.
///
/// ```rust
/// use framesync::prelude::*;
/// ```
pub mod prelude {
    // State model
    pub use framesync_core::{FrameId, MergeMode, ObjectRef, Record, Value, ValueKind};

    // Errors
    pub use framesync_core::{MergeError, RecordError};
    pub use framesync_engine::{ConfigError, ScheduleError, SubmitError, SyncError};

    // Engine
    pub use framesync_engine::{
        FrameContext, FrameMetrics, Frontend, Headless, PendingCommit, Resource, Runtime,
        RuntimeConfig, ShutdownReport, StateHandle, Transaction,
    };
}
