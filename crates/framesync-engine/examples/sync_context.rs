//! framesync in one file: a headless "app" whose state is changed by a
//! coroutine, a blocking job, and the frame callback itself.
//!
//! Demonstrates:
//!   1. Building a Runtime around an application Record
//!   2. A background coroutine that awaits a transaction commit
//!   3. A blocking job whose result is applied on the render thread
//!   4. The status line tracking jobs in flight
//!   5. Shutdown with a ShutdownReport
//!
//! Run with:
//!   cargo run -p framesync-engine --example sync_context

use std::thread;
use std::time::Duration;

use framesync_core::{MergeMode, Record, Value};
use framesync_engine::{FrameContext, Headless, Runtime, RuntimeConfig};

// ─── Application state ──────────────────────────────────────────

fn initial_state() -> Record {
    let plot = Record::new().declared("width", 320).declared("height", 200);
    Record::new()
        .declared("frame_count", 0)
        .declared("title", "loading…")
        .with("plot", plot)
        .with("primes", Value::Null)
        .with("_scratch", 0)
}

fn count_primes(limit: u64) -> u64 {
    (2..limit)
        .filter(|n| (2..).take_while(|d| d * d <= *n).all(|d| n % d != 0))
        .count() as u64
}

// ─── Frame callback ─────────────────────────────────────────────

fn update(ctx: &mut FrameContext<'_>, _dt: f64) {
    let frame = ctx.frame().0;
    let _ = ctx.state_mut().set("frame_count", frame as i64);

    if frame == 1 {
        let handle = ctx.handle();
        let spawned = ctx.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let mut tx = handle.sync_deep();
            let _ = tx.state_mut().set("title", "framesync demo");
            if let Some(Value::Object(plot)) = tx.state().get("plot") {
                let _ = plot.write(|p| p.set("width", 640));
            }
            match tx.commit().await {
                Ok(commit) => println!("coroutine: committed at {}", commit.frame),
                Err(e) => println!("coroutine: commit failed: {e}"),
            }
        });
        if let Err(e) = spawned {
            println!("could not schedule coroutine: {e}");
        }

        let submitted = ctx.submit_job_to_frame(count_primes, 50_000, |state, n| {
            state.insert("primes", n as i64);
        });
        if let Err(e) = submitted {
            println!("could not submit job: {e}");
        }
    }

    if frame % 10 == 0 {
        let state = ctx.state();
        println!(
            "frame {frame:>3}: title={:?} primes={:?} status={:?}",
            state.get("title"),
            state.get("primes"),
            ctx.status(),
        );
    }
}

fn main() {
    let config = RuntimeConfig {
        target_fps: 60.0,
        worker_count: Some(2),
        ..RuntimeConfig::default()
    };
    let mut runtime = match Runtime::new(initial_state(), config) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return;
        }
    };

    // A reader on another thread only ever sees published copies.
    let handle = runtime.handle();
    let reader = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        let latest = handle.latest();
        println!(
            "reader: frame {} title={:?}",
            handle.latest_frame(),
            latest.get("title")
        );
        let late = handle.update(MergeMode::Shallow, |s| {
            s.insert("reader_seen", true);
        });
        println!("reader: late commit -> {:?}", late.blocking_wait().map(|c| c.frame));
    });

    let mut frontend = Headless::new(60);
    let report = runtime.run(&mut frontend, update);
    println!("shutdown: {report:?}");

    let _ = reader.join();
    let metrics = runtime.last_metrics();
    println!(
        "last frame: {}us total, {} merged; counters: {:?}",
        metrics.total_us,
        metrics.merged,
        runtime.counters()
    );
}
