#![allow(missing_docs)]

use std::sync::Arc;

use indexmap::IndexMap;
use time::macros::datetime;
use time::Duration;
use traza::{
    CallId, CallRecordPool, CallStack, MethodSpec, MonitorConfig, MonitoringController,
    MonitoringRuntime,
};

/// Nested contexts on many threads at once: every trace drains, parentage
/// stays within each thread, and the engine survives the contention.
#[test]
fn parallel_contexts_drain_cleanly() {
    let runtime = MonitoringRuntime::new();
    runtime.controller().enable();

    let mut handles = Vec::new();
    for t in 0..8 {
        let runtime = runtime.clone();
        handles.push(std::thread::spawn(move || {
            let monitor = runtime.class_monitor(format!("Worker{t}"));
            for _ in 0..50 {
                let outer = monitor.start(MonitorConfig::method("Outer"));
                let inner = monitor.start(MonitorConfig::method("Inner"));
                if let (Some(outer_rec), Some(inner_rec)) = (outer.record(), inner.record()) {
                    assert_eq!(inner_rec.parent_id(), Some(outer_rec.id().clone()));
                    assert_eq!(inner_rec.level(), outer_rec.level() + 1);
                }
                drop(inner);
                drop(outer);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(runtime.stack().is_empty());
}

/// Concurrent pushes with deliberately unpaired pops keep only the weak
/// invariant: the remaining depth never exceeds the number of pushes.
#[test]
fn unpaired_pushes_keep_weak_depth_invariant() {
    let controller = MonitoringController::new();
    controller.enable();
    let stack = CallStack::new(controller);
    let pool = Arc::new(CallRecordPool::new());

    const THREADS: usize = 6;
    const OPS: usize = 40;

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let stack = stack.clone();
        let pool = Arc::clone(&pool);
        handles.push(std::thread::spawn(move || {
            let mut open = Vec::new();
            for i in 0..OPS {
                let record = pool.rent(
                    MethodSpec::new("Noise", format!("op{t}_{i}")),
                    CallId::from(format!("{t}-{i}").as_str()),
                    datetime!(2024-01-01 00:00:00 UTC) + Duration::microseconds(i as i64),
                    IndexMap::new(),
                    Vec::new(),
                );
                stack.push(&record).unwrap();
                open.push(record);
                // Pop only every third record, leaving the rest open.
                if i % 3 == 0 {
                    if let Some(record) = open.pop() {
                        stack.pop(&record);
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let total_depth: usize = stack
        .diagnostics()
        .iter()
        .map(|(_, depth)| *depth)
        .sum();
    assert!(total_depth <= THREADS * OPS);
    assert!(total_depth > 0, "some records were left open on purpose");

    stack.reset();
    assert!(stack.is_empty());
}

/// Flag flips racing against context creation never corrupt the stack;
/// whatever was pushed is popped.
#[test]
fn toggling_the_controller_under_load_is_safe() {
    let runtime = MonitoringRuntime::new();
    runtime.controller().enable();

    let toggler = {
        let controller = runtime.controller().clone();
        std::thread::spawn(move || {
            for _ in 0..100 {
                controller.disable();
                controller.enable();
            }
        })
    };

    let mut handles = Vec::new();
    for t in 0..4 {
        let runtime = runtime.clone();
        handles.push(std::thread::spawn(move || {
            let monitor = runtime.class_monitor(format!("Racer{t}"));
            for _ in 0..200 {
                let context = monitor.start(MonitorConfig::method("Spin"));
                drop(context);
            }
        }));
    }
    toggler.join().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }

    // Tracking may have been gated on or off at any instant, but nothing
    // leaks: every tracked push was popped on drop.
    assert!(runtime.stack().is_empty());
}
