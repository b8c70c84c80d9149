//! Test fixtures and polling helpers for framesync development.
//!
//! Provides canonical state records ([`app_state`], [`nested_chain`],
//! [`cyclic_pair`], [`wide_record`]) and deadline-bounded polling
//! ([`wait_until`], [`pump_until`]) for tests that cross threads.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::thread;
use std::time::{Duration, Instant};

use framesync_core::{ObjectRef, Record, Value};

/// Default deadline for cross-thread polling in tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── Fixtures ─────────────────────────────────────────────────────

/// A small application state shaped like a typical GUI app.
///
/// ```text
/// counter: Int (declared)   title: Text     samples: List
/// plot: Object { width: Int (declared), height: Int, dirty: Bool }
/// _cache: Int (private)
/// ```
pub fn app_state() -> Record {
    let plot = Record::new()
        .declared("width", 640)
        .with("height", 480)
        .with("dirty", false);
    Record::new()
        .declared("counter", 0)
        .with("title", "untitled")
        .with("samples", vec![1.0, 2.0, 3.0])
        .with("plot", plot)
        .with("_cache", 0)
}

/// The `plot` object of an [`app_state`] record.
pub fn plot_of(state: &Record) -> ObjectRef {
    match state.get("plot") {
        Some(Value::Object(obj)) => obj.clone(),
        other => panic!("fixture has no plot object: {other:?}"),
    }
}

/// A chain of `depth` nested objects: `n0.n1.…` with `leaf: 0` at the end.
pub fn nested_chain(depth: usize) -> Record {
    let mut inner = Record::new().with("leaf", 0);
    for level in (1..depth).rev() {
        inner = Record::new().with(format!("n{level}"), inner);
    }
    if depth == 0 {
        inner
    } else {
        Record::new().with("n0", inner)
    }
}

/// Two objects `a` and `b` referencing each other through `peer`.
pub fn cyclic_pair() -> Record {
    let a = ObjectRef::new(Record::new().with("name", "a"));
    let b = ObjectRef::new(Record::new().with("name", "b"));
    a.write(|r| r.insert("peer", b.clone()));
    b.write(|r| r.insert("peer", a.clone()));
    Record::new().with("a", a).with("b", b)
}

/// `n` integer slots `f0..f{n-1}`, each holding its index.
pub fn wide_record(n: usize) -> Record {
    let mut record = Record::new();
    for i in 0..n {
        record.insert(format!("f{i}"), i);
    }
    record
}

/// Integer value of `name`, panicking with context if absent or not an int.
pub fn int_field(record: &Record, name: &str) -> i64 {
    record
        .get_as::<i64>(name)
        .unwrap_or_else(|e| panic!("field {name}: {e}"))
}

/// Increment the integer slot `name` in place.
pub fn bump(record: &mut Record, name: &str) {
    let next = int_field(record, name) + 1;
    record
        .set(name, next)
        .unwrap_or_else(|e| panic!("field {name}: {e}"));
}

// ── Polling ──────────────────────────────────────────────────────

/// Poll `cond` every millisecond until it holds. Panics after `timeout`.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached within {timeout:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Call `step` (typically one frame) until it returns `true`. Returns the
/// number of calls made. Panics after `timeout`.
pub fn pump_until(timeout: Duration, mut step: impl FnMut() -> bool) -> usize {
    let deadline = Instant::now() + timeout;
    let mut calls = 0;
    loop {
        calls += 1;
        if step() {
            return calls;
        }
        assert!(Instant::now() < deadline, "pump did not settle within {timeout:?}");
        thread::sleep(Duration::from_millis(1));
    }
}
