//! Integration test: shutdown never leaves a committer hanging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framesync_core::{MergeMode, Record};
use framesync_engine::{Headless, Runtime, RuntimeConfig, SyncError, TxPhase};
use framesync_test_utils::{wait_until, TEST_TIMEOUT};

fn runtime() -> Runtime {
    let config = RuntimeConfig {
        worker_count: Some(1),
        loop_stop_grace_ms: 1_000,
        ..RuntimeConfig::default()
    };
    Runtime::new(Record::new().with("n", 0), config).unwrap()
}

#[tokio::test]
async fn awaiting_commit_resolves_cancelled_on_shutdown() {
    let mut rt = runtime();
    rt.run_frame(0.0, |_, _| {});

    let pending = rt.handle().update(MergeMode::Shallow, |s| {
        s.insert("n", 1);
    });
    let waiter = tokio::spawn(pending);

    let report = rt.shutdown();
    assert_eq!(report.ops_cancelled, 1);
    assert!(report.loop_joined);
    assert_eq!(waiter.await.unwrap(), Err(SyncError::Cancelled));
    assert_eq!(rt.state().get_as::<i64>("n").unwrap(), 0);
}

#[tokio::test]
async fn commit_after_shutdown_fails_fast() {
    let mut rt = runtime();
    let handle = rt.handle();
    rt.shutdown();

    let mut tx = handle.sync(MergeMode::Deep);
    tx.state_mut().insert("n", 2);
    let pending = tx.commit();
    assert_eq!(pending.phase(), TxPhase::Aborted);
    assert_eq!(pending.await, Err(SyncError::MailboxClosed));
    assert!(handle.run_on_frame("late", |_| Ok(())).is_err());
}

#[test]
fn shutdown_does_not_wait_for_running_jobs() {
    let mut rt = runtime();
    let release = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&release);
    rt.run_frame(0.0, |ctx, _| {
        ctx.submit_job(
            move |_: ()| {
                while !r.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            },
            (),
            |_| {},
        )
        .unwrap();
    });

    let report = rt.shutdown();
    assert_eq!(report.jobs_in_flight, 1);
    release.store(true, Ordering::SeqCst);
    wait_until(TEST_TIMEOUT, || rt.dispatcher().in_flight() == 0);
}

#[test]
fn stuck_coroutine_is_abandoned() {
    let mut rt = runtime();
    rt.run_frame(0.0, |_, _| {});
    let finished = Arc::new(AtomicBool::new(false));
    let f = Arc::clone(&finished);
    rt.spawn(async move {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        f.store(true, Ordering::SeqCst);
    })
    .unwrap();

    let report = rt.shutdown();
    assert!(report.loop_joined);
    assert!(!finished.load(Ordering::SeqCst));
}

#[test]
fn headless_run_reports_and_drop_is_quiet() {
    let mut rt = runtime();
    let mut frontend = Headless::new(3);
    let report = rt.run(&mut frontend, |_, _| {});
    assert!(report.loop_joined);
    assert_eq!(rt.counters().frames, 3);
    drop(rt);
}
