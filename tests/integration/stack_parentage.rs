#![allow(missing_docs)]

use std::sync::{mpsc, Arc};

use indexmap::IndexMap;
use proptest::prelude::*;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};
use traza::{
    CallId, CallRecord, CallRecordPool, CallStack, MethodSpec, MonitoringController,
};

fn t0() -> OffsetDateTime {
    datetime!(2024-01-01 00:00:00 UTC)
}

fn tracked_stack() -> (CallStack, CallRecordPool) {
    let controller = MonitoringController::new();
    controller.enable();
    (CallStack::new(controller), CallRecordPool::new())
}

fn rent(pool: &CallRecordPool, name: &str, offset_ms: i64) -> Arc<CallRecord> {
    pool.rent(
        MethodSpec::new("Demo", name),
        CallId::from(name),
        t0() + Duration::milliseconds(offset_ms),
        IndexMap::new(),
        Vec::new(),
    )
}

#[test]
fn simple_parent_child() {
    let (stack, pool) = tracked_stack();
    let a = rent(&pool, "A", 0);
    let b = rent(&pool, "B", 1);

    stack.push(&a).unwrap();
    stack.push(&b).unwrap();

    assert_eq!(a.level(), 1);
    assert!(a.parent().is_none(), "roots have no parent");
    assert_eq!(b.level(), 2);
    assert!(Arc::ptr_eq(&b.parent().unwrap(), &a));
    assert_eq!(b.parent_thread_id(), a.thread_id());

    stack.pop(&b);
    stack.pop(&a);
    assert!(stack.is_empty());
}

#[test]
fn multi_threaded_children() {
    let (stack, pool) = tracked_stack();
    let parent = rent(&pool, "P", 0);
    stack.push(&parent).unwrap();
    let parent_thread = parent.thread_id();

    let (record_tx, record_rx) = mpsc::channel();
    let mut handles = Vec::new();
    for i in 0..5 {
        let stack = stack.clone();
        let child = rent(&pool, &format!("C{i}"), 1);
        let record_tx = record_tx.clone();
        handles.push(std::thread::spawn(move || {
            stack.push(&child).unwrap();
            record_tx.send(Arc::clone(&child)).unwrap();
            stack.pop(&child);
        }));
    }
    drop(record_tx);
    let children: Vec<_> = record_rx.iter().collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(children.len(), 5);
    for child in &children {
        assert_eq!(child.level(), 2);
        assert_eq!(child.parent_id(), Some(CallId::from("P")));
        assert_eq!(child.parent_thread_id(), parent_thread);
    }
    stack.pop(&parent);
    assert!(stack.is_empty());
}

#[test]
fn complex_sequence() {
    let (stack, pool) = tracked_stack();
    let records: Vec<_> = (1..=6)
        .map(|i| rent(&pool, &format!("r{i}"), i))
        .collect();
    let r = |i: usize| &records[i - 1];

    stack.push(r(1)).unwrap();
    stack.push(r(2)).unwrap();
    stack.push(r(3)).unwrap();
    stack.push(r(4)).unwrap();
    stack.pop(r(4));
    stack.push(r(5)).unwrap();
    stack.pop(r(5));
    stack.pop(r(3));
    stack.push(r(6)).unwrap();
    stack.pop(r(6));
    stack.pop(r(2));
    stack.pop(r(1));

    let levels: Vec<_> = records.iter().map(|rec| rec.level()).collect();
    assert_eq!(levels, vec![1, 2, 3, 4, 4, 3]);

    assert!(r(1).parent_id().is_none());
    assert_eq!(r(2).parent_id(), Some(CallId::from("r1")));
    assert_eq!(r(3).parent_id(), Some(CallId::from("r2")));
    assert_eq!(r(4).parent_id(), Some(CallId::from("r3")));
    assert_eq!(r(5).parent_id(), Some(CallId::from("r3")));
    assert_eq!(r(6).parent_id(), Some(CallId::from("r2")));

    assert!(stack.is_empty());
    assert!(stack.diagnostics().is_empty());
}

#[test]
fn async_disposal_on_other_thread_drains_origin_stack() {
    let (stack, pool) = tracked_stack();
    let record = rent(&pool, "AsyncOp", 0);
    stack.push(&record).unwrap();
    let origin = record.thread_id();

    let worker_stack = stack.clone();
    let worker_record = Arc::clone(&record);
    std::thread::spawn(move || {
        worker_stack.pop(&worker_record);
    })
    .join()
    .unwrap();

    assert!(stack.is_empty());
    assert_eq!(record.thread_id(), origin);
}

proptest! {
    /// For any finite push/pop sequence on a single thread, levels match
    /// push depth and popped records keep their parent link.
    #[test]
    fn levels_match_push_depth(ops in proptest::collection::vec(any::<bool>(), 1..120)) {
        let (stack, pool) = tracked_stack();
        let mut open: Vec<Arc<CallRecord>> = Vec::new();
        let mut seq = 0u32;

        for push in ops {
            if push {
                seq += 1;
                let record = rent(&pool, &format!("op{seq}"), i64::from(seq));
                stack.push(&record).unwrap();
                prop_assert_eq!(record.level() as usize, open.len() + 1);
                if let Some(parent) = open.last() {
                    prop_assert_eq!(record.parent_id(), Some(parent.id().clone()));
                } else {
                    prop_assert!(record.parent_id().is_none());
                }
                open.push(record);
            } else if let Some(record) = open.pop() {
                let expected_parent = open.last().map(|p| p.id().clone());
                stack.pop(&record);
                prop_assert_eq!(record.parent_id(), expected_parent);
            }
        }

        let depth = open.len();
        if depth == 0 {
            prop_assert!(stack.is_empty());
        } else {
            let diagnostics = stack.diagnostics();
            prop_assert_eq!(diagnostics.len(), 1);
            prop_assert_eq!(diagnostics[0].1, depth);
        }
    }
}
