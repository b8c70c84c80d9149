//! Integration test: FIFO application and drain bounding.
//!
//! Operations pending at drain time run in push order within that drain.
//! Operations pushed while a drain is running wait for the next one.

use std::sync::Arc;
use std::thread;

use framesync_core::{MergeMode, Record, Value};
use framesync_engine::{Mailbox, SnapshotCell, StateHandle};
use framesync_test_utils::{bump, int_field};

fn setup() -> (Record, Arc<Mailbox>, StateHandle) {
    let live = Record::new().declared("counter", 0).with("log", Vec::<Value>::new());
    let mailbox = Arc::new(Mailbox::new());
    let cell = Arc::new(SnapshotCell::new(&live));
    let handle = StateHandle::new(Arc::clone(&mailbox), cell);
    (live, mailbox, handle)
}

fn append(label: &'static str) -> impl FnOnce(&mut Record) -> Result<(), framesync_core::RecordError> + Send {
    move |state| {
        bump(state, "counter");
        let seen = int_field(state, "counter");
        state.update("log", |v| {
            if let Value::List(items) = v {
                items.push(Value::from(format!("{label}@{seen}")));
            }
        })
    }
}

fn log_of(state: &Record) -> Vec<String> {
    state.get_as::<Vec<String>>("log").unwrap_or_default()
}

#[test]
fn earlier_push_is_visible_to_later_op_in_same_drain() {
    let (mut live, mailbox, handle) = setup();

    let first = handle.update(MergeMode::Shallow, |s| {
        s.insert("stage", "a");
    });
    handle
        .run_on_frame("observe", |s| {
            let stage = s.get_as::<String>("stage")?;
            s.insert("seen", stage);
            Ok(())
        })
        .unwrap();
    let second = handle.update(MergeMode::Shallow, |s| {
        s.insert("stage", "b");
    });

    let report = mailbox.drain(&mut live);
    assert_eq!((report.merged, report.tasks, report.failed), (2, 1, 0));
    drop(report);

    assert_eq!(live.get_as::<String>("seen").unwrap(), "a");
    assert_eq!(live.get_as::<String>("stage").unwrap(), "b");
    let (a, b) = (first.blocking_wait().unwrap(), second.blocking_wait().unwrap());
    assert_eq!(a.frame, b.frame);
}

#[test]
fn counter_increments_apply_in_push_order() {
    let (mut live, mailbox, _) = setup();
    for label in ["a", "b", "c"] {
        mailbox.push_task(label, append(label)).unwrap();
    }
    mailbox.drain(&mut live);
    assert_eq!(log_of(&live), vec!["a@1", "b@2", "c@3"]);
}

#[test]
fn pushes_from_many_threads_keep_per_thread_order() {
    let (mut live, mailbox, _) = setup();
    let threads: Vec<_> = ["x", "y"]
        .into_iter()
        .map(|label| {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || {
                for _ in 0..50 {
                    mailbox.push_task(label, append(label)).unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    mailbox.drain(&mut live);

    let log = log_of(&live);
    assert_eq!(log.len(), 100);
    for label in ["x", "y"] {
        let seqs: Vec<i64> = log
            .iter()
            .filter(|e| e.starts_with(label))
            .map(|e| e.split('@').nth(1).unwrap().parse().unwrap())
            .collect();
        assert_eq!(seqs.len(), 50);
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn op_pushed_during_drain_waits_for_next_drain() {
    let (mut live, mailbox, _) = setup();
    let inner_mailbox = Arc::clone(&mailbox);
    mailbox
        .push_task("outer", move |s| {
            inner_mailbox
                .push_task("inner", |s| {
                    s.insert("inner", true);
                    Ok(())
                })
                .map_err(|_| framesync_core::RecordError::MissingField {
                    name: "mailbox".into(),
                })?;
            s.insert("outer", true);
            Ok(())
        })
        .unwrap();

    let first = mailbox.drain(&mut live);
    assert_eq!(first.tasks, 1);
    drop(first);
    assert!(live.contains("outer"));
    assert!(!live.contains("inner"));
    assert_eq!(mailbox.pending(), 1);

    let second = mailbox.drain(&mut live);
    assert_eq!(second.tasks, 1);
    assert!(live.contains("inner"));
}

#[test]
fn empty_drain_changes_nothing() {
    let (mut live, mailbox, _) = setup();
    let before = live.clone();
    let report = mailbox.drain(&mut live);
    assert!(!report.changed());
    assert_eq!(live, before);
}
