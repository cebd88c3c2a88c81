//! Per-thread call stacks with cross-thread parent inference and observer
//! fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use time::OffsetDateTime;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::controller::MonitoringController;
use crate::error::{Result, TrazaError};
use crate::record::{CallRecord, CallStackItem};

/// Hard cap per thread; pushes beyond it are silently dropped and counted.
pub const MAX_CALL_STACK_DEPTH: usize = 2048;

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Stable process-local identifier for the calling thread.
///
/// `std::thread::ThreadId` has no stable integer form, so the engine hands
/// out its own from a counter the first time a thread touches the stack.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

/// Consumer of call-stack lifecycle events. Events arrive in publication
/// order on the thread that performed the push or pop.
pub trait CallStackObserver: Send + Sync {
    fn on_item(&self, item: &CallStackItem);
}

struct StackInner {
    controller: MonitoringController,
    clock: Arc<dyn Clock>,
    stacks: RwLock<FxHashMap<u64, Vec<Arc<CallRecord>>>>,
    subscribers: RwLock<Vec<(u64, Arc<dyn CallStackObserver>)>>,
    next_subscriber: AtomicU64,
    trace_active: Mutex<bool>,
    dropped_pushes: AtomicU64,
}

/// Tracks every open call per thread and publishes lifecycle events.
///
/// Per thread, pushes and pops are strictly LIFO. Parent relationships are
/// fixed at push time and never change afterwards. Cross-thread reads for
/// parent inference only snapshot other threads' roots, never mutate them.
#[derive(Clone)]
pub struct CallStack {
    inner: Arc<StackInner>,
}

impl CallStack {
    pub fn new(controller: MonitoringController) -> Self {
        let clock = Arc::new(SystemClock::new());
        Self::with_clock(controller, clock)
    }

    pub fn with_clock(controller: MonitoringController, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StackInner {
                controller,
                clock,
                stacks: RwLock::new(FxHashMap::default()),
                subscribers: RwLock::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
                trace_active: Mutex::new(false),
                dropped_pushes: AtomicU64::new(0),
            }),
        }
    }

    pub fn controller(&self) -> &MonitoringController {
        &self.inner.controller
    }

    /// Pushes `record` onto the calling thread's stack, inferring its
    /// parent and level, then publishes `Start`.
    ///
    /// Pushing the null record is an error. When global tracking is off the
    /// push is ignored. A thread at [`MAX_CALL_STACK_DEPTH`] drops the push
    /// silently; see [`dropped_pushes`](Self::dropped_pushes).
    pub fn push(&self, record: &Arc<CallRecord>) -> Result<()> {
        if record.is_null() {
            return Err(TrazaError::InvalidArgument(
                "cannot push the null record".into(),
            ));
        }
        if !self.inner.controller.is_enabled() {
            trace!(record = %record.id(), "push ignored: tracking disabled");
            return Ok(());
        }
        let thread_id = current_thread_id();
        {
            let mut stacks = self.inner.stacks.write();
            let depth = stacks.get(&thread_id).map_or(0, Vec::len);
            if depth >= MAX_CALL_STACK_DEPTH {
                self.inner.dropped_pushes.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            let parent = match stacks.get(&thread_id).and_then(|s| s.last()) {
                Some(top) => Some(Arc::clone(top)),
                None => logical_ancestor(&stacks, thread_id, record.start_time()),
            };
            record.attach_thread(thread_id);
            match parent {
                Some(parent) => record.link_parent(&parent),
                None => record.link_root(),
            }
            stacks.entry(thread_id).or_default().push(Arc::clone(record));
            *self.inner.trace_active.lock() = true;
        }
        self.publish(&CallStackItem::Start(Arc::clone(record)));
        Ok(())
    }

    /// Pops `record` from its owning thread's stack and publishes `End`.
    ///
    /// Popping a record that is not the top of its stack (or was never
    /// pushed) is a no-op. The owning stack is found through the record's
    /// stored thread id, so a context disposed on another thread still
    /// drains the right stack. When the last per-thread entry is removed
    /// the terminal `Empty` event is published exactly once.
    pub fn pop(&self, record: &Arc<CallRecord>) {
        if record.is_null() {
            debug!("pop of the null record ignored");
            return;
        }
        let Some(thread_id) = record.thread_id() else {
            debug!(record = %record.id(), "pop of an un-pushed record ignored");
            return;
        };
        let drained = {
            let mut stacks = self.inner.stacks.write();
            let Some(stack) = stacks.get_mut(&thread_id) else {
                debug!(record = %record.id(), thread_id, "pop without a thread stack ignored");
                return;
            };
            match stack.last() {
                Some(top) if Arc::ptr_eq(top, record) => {
                    stack.pop();
                }
                _ => {
                    debug!(record = %record.id(), "pop of a non-top record ignored");
                    return;
                }
            }
            if stack.is_empty() {
                stacks.remove(&thread_id);
            }
            stacks.is_empty()
        };
        if !record.is_sealed() {
            let elapsed = self.inner.clock.now() - record.start_time();
            record.record_end(elapsed);
        }
        self.publish(&CallStackItem::End(Arc::clone(record)));
        if drained {
            let mut active = self.inner.trace_active.lock();
            if *active {
                *active = false;
                drop(active);
                self.publish(&CallStackItem::Empty);
            }
        }
    }

    /// Publishes `Exception` for a record that is still on its stack.
    pub fn log_exception(&self, record: &Arc<CallRecord>, message: impl Into<String>) {
        if record.is_null() {
            return;
        }
        record.set_parameter("Exception", message.into());
        self.publish(&CallStackItem::Exception(Arc::clone(record)));
    }

    /// Registers an observer. The returned guard unsubscribes on drop.
    pub fn subscribe(&self, observer: Arc<dyn CallStackObserver>) -> SubscriptionGuard {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.write().push((id, observer));
        SubscriptionGuard {
            stack: self.clone(),
            id,
        }
    }

    /// Opt-in diagnostics: `(thread id, depth)` for every live stack.
    pub fn diagnostics(&self) -> Vec<(u64, usize)> {
        let stacks = self.inner.stacks.read();
        let mut depths: Vec<_> = stacks.iter().map(|(id, s)| (*id, s.len())).collect();
        depths.sort_unstable();
        depths
    }

    /// Pushes dropped at the depth cap since construction.
    pub fn dropped_pushes(&self) -> u64 {
        self.inner.dropped_pushes.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.stacks.read().is_empty()
    }

    /// Drops every per-thread stack and every subscriber.
    pub fn reset(&self) {
        self.inner.stacks.write().clear();
        self.inner.subscribers.write().clear();
        *self.inner.trace_active.lock() = false;
    }

    fn publish(&self, item: &CallStackItem) {
        let subscribers: Vec<_> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in subscribers {
            observer.on_item(item);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.inner
            .subscribers
            .write()
            .retain(|(sub_id, _)| *sub_id != id);
    }
}

/// Scoped observer registration; unsubscribes on drop.
pub struct SubscriptionGuard {
    stack: CallStack,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.stack.unsubscribe(self.id);
    }
}

/// Nearest active root among the other threads' stacks: the latest-started
/// level-1 record, no later than `started`, on a stack whose top is still
/// running. Stacks whose first record is itself a cross-thread child (level
/// above 1) do not qualify, so concurrent siblings never adopt each other.
/// Only reads a snapshot; other threads' stacks are never mutated here.
fn logical_ancestor(
    stacks: &FxHashMap<u64, Vec<Arc<CallRecord>>>,
    thread_id: u64,
    started: OffsetDateTime,
) -> Option<Arc<CallRecord>> {
    let mut best: Option<Arc<CallRecord>> = None;
    for (other_id, stack) in stacks {
        if *other_id == thread_id {
            continue;
        }
        let Some(top) = stack.last() else { continue };
        if top.elapsed().is_some() {
            continue;
        }
        let Some(root) = stack.first() else { continue };
        if root.level() != 1 || root.start_time() > started {
            continue;
        }
        match &best {
            Some(current) if current.start_time() >= root.start_time() => {}
            _ => best = Some(Arc::clone(root)),
        }
    }
    best
}
