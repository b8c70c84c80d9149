//! Single-slot publication of state copies.
//!
//! The render thread owns the live [`Record`] and never lets another
//! thread see it. Instead it publishes deep copies into a [`SnapshotCell`]
//! (single producer); transactions and observers on any thread read the
//! most recent copy (multi consumer).
//!
//! The published graph itself never leaves the cell. Transactions diff
//! against it internally; every other reader gets its own deep copy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use framesync_core::{deep_copy, FrameId, Record};
use parking_lot::RwLock;

/// A published copy together with the frame it was taken in.
struct Published {
    frame: FrameId,
    record: Arc<Record>,
}

/// Holds the latest published copy of the live state.
pub struct SnapshotCell {
    current: RwLock<Published>,
    publishes: AtomicU64,
}

// Compile-time assertion: SnapshotCell must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SnapshotCell>();
};

impl SnapshotCell {
    /// Create a cell whose initial publication is a deep copy of `live`
    /// at frame 0.
    pub fn new(live: &Record) -> Self {
        Self {
            current: RwLock::new(Published {
                frame: FrameId(0),
                record: Arc::new(deep_copy(live)),
            }),
            publishes: AtomicU64::new(1),
        }
    }

    /// Deep-copy `live` and publish the copy. Single-producer only.
    pub fn publish_copy(&self, live: &Record, frame: FrameId) {
        let record = Arc::new(deep_copy(live));
        *self.current.write() = Published { frame, record };
        self.publishes.fetch_add(1, Ordering::Release);
    }

    /// An isolated deep copy of the most recent publication.
    pub fn latest(&self) -> Record {
        deep_copy(&self.latest_shared())
    }

    /// The most recent publication itself. Must stay crate-internal:
    /// nested objects are shared with every transaction's base.
    pub(crate) fn latest_shared(&self) -> Arc<Record> {
        Arc::clone(&self.current.read().record)
    }

    /// Frame of the most recent publication.
    pub fn latest_frame(&self) -> FrameId {
        self.current.read().frame
    }

    /// Number of publications so far, the initial one included.
    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::Acquire)
    }
}
