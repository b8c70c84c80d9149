//! Benchmark profiles for framesync.
//!
//! - [`gui_profile`]: a GUI-sized application state (scalars, a sample
//!   buffer, and a set of plot objects)
//! - [`edited_copy`]: a deep copy of a profile with a fraction of its
//!   fields changed, as a transaction would leave it

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use framesync_core::{deep_copy, ObjectRef, Record, Value};

/// Application state with `scalars` integer fields, a 1000-sample float
/// buffer, and `plots` plot objects of 16 fields each.
pub fn gui_profile(scalars: usize, plots: usize) -> Record {
    let mut state = Record::new();
    for i in 0..scalars {
        state.declare(format!("s{i}"), i);
    }
    let samples: Vec<f64> = (0..1000u32).map(|i| f64::from(i) * 0.5).collect();
    state.insert("samples", samples);
    for p in 0..plots {
        let mut plot = Record::new().declared("width", 640).declared("height", 480);
        for k in 0..14 {
            plot.insert(format!("opt{k}"), k % 2 == 0);
        }
        state.insert(format!("plot{p}"), plot);
    }
    state.insert("_cache", 0);
    state
}

/// Deep copy of `base` with every `stride`-th scalar incremented and the
/// width of every plot doubled.
pub fn edited_copy(base: &Record, stride: usize) -> Record {
    let copy = deep_copy(base);
    let mut edited = copy.clone();
    let names: Vec<String> = copy.fields().map(|(k, _)| k.to_string()).collect();
    for (i, name) in names.iter().enumerate() {
        match copy.get(name) {
            Some(Value::Int(n)) if stride > 0 && i % stride == 0 => {
                let _ = edited.set(name.as_str(), n + 1);
            }
            Some(Value::Object(plot)) => double_width(plot),
            _ => {}
        }
    }
    edited
}

fn double_width(plot: &ObjectRef) {
    plot.write(|p| {
        let width = p.get_as::<i64>("width").unwrap_or(0);
        let _ = p.set("width", width * 2);
    });
}
