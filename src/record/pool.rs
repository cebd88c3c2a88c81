use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use time::OffsetDateTime;

use crate::clock::CallId;
use crate::record::{CallRecord, MethodSpec, RecordKind};

const DEFAULT_POOL_CAPACITY: usize = 512;

/// Rents and recycles [`CallRecord`] allocations.
///
/// The pool is an optimization, never a correctness layer: when the free
/// list is empty or contended, `rent` allocates fresh, and `give_back` only
/// recycles a record when it holds the last strong reference. Rent/return
/// never block on each other; a contended lock falls through to the
/// allocator.
pub struct CallRecordPool {
    free: Mutex<Vec<CallRecord>>,
    capacity: usize,
    null: Arc<CallRecord>,
    recycled: AtomicU64,
    allocated: AtomicU64,
}

impl CallRecordPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
            null: Arc::new(CallRecord::null()),
            recycled: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// The shared sentinel returned when tracking is disabled. Satisfies
    /// reference equality for "no parent" checks and never escapes into the
    /// reporter stream.
    pub fn null_record(&self) -> Arc<CallRecord> {
        Arc::clone(&self.null)
    }

    /// Rents a record for one invocation. Reuses a pooled allocation when
    /// one is available without waiting.
    pub fn rent(
        &self,
        spec: MethodSpec,
        id: CallId,
        start_time: OffsetDateTime,
        parameters: IndexMap<String, String>,
        attribute_parameters: Vec<String>,
    ) -> Arc<CallRecord> {
        if let Some(mut guard) = self.free.try_lock() {
            if let Some(mut record) = guard.pop() {
                drop(guard);
                record.reinitialize(id, spec, start_time, parameters, attribute_parameters);
                self.recycled.fetch_add(1, Ordering::Relaxed);
                return Arc::new(record);
            }
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Arc::new(CallRecord::new(
            id,
            spec,
            start_time,
            parameters,
            attribute_parameters,
        ))
    }

    /// Returns a record once every observer has finished with it. Records
    /// still referenced elsewhere, sentinels, and gaps are simply dropped.
    pub fn give_back(&self, record: Arc<CallRecord>) {
        if record.kind() != RecordKind::Regular {
            return;
        }
        if let Ok(owned) = Arc::try_unwrap(record) {
            if let Some(mut guard) = self.free.try_lock() {
                if guard.len() < self.capacity {
                    guard.push(owned);
                }
            }
        }
    }

    /// Drops every pooled record.
    pub fn reset(&self) {
        self.free.lock().clear();
    }

    /// `(recycled, allocated)` counts since construction.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.recycled.load(Ordering::Relaxed),
            self.allocated.load(Ordering::Relaxed),
        )
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

impl Default for CallRecordPool {
    fn default() -> Self {
        Self::new()
    }
}
