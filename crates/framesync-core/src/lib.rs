//! Core state model for framesync.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! dynamic [`Record`] that holds application state, the [`Value`] model,
//! isolated snapshots ([`deep_copy`]), change-set extraction
//! ([`changes`] into a [`ChangeSet`]) and the shallow/deep merge engine
//! ([`merge`](mod@merge)).
//!
//! Nothing here spawns threads or blocks. Concurrency lives in
//! `framesync-engine`.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod changeset;
pub mod error;
pub mod id;
pub mod merge;
pub mod record;
pub mod snapshot;
pub mod value;

pub use changeset::{changes, Change, ChangeSet};
pub use error::{FieldPath, MergeError, RecordError};
pub use id::{FrameId, JobId, ObjectId, TransactionId};
pub use merge::{apply_changes, deep_merge, merge, shallow_merge, MergeMode, MergeStats};
pub use record::{is_private, Record, Slot, PRIVATE_PREFIX};
pub use snapshot::{deep_copy, deep_eq, deep_eq_records};
pub use value::{FromValue, ObjectRef, Value, ValueKind};
