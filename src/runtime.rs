use std::sync::Arc;

use crate::clock::{CallIdSource, Clock, SystemClock};
use crate::context::ClassMonitor;
use crate::controller::{MonitoringController, MonitoringVersion};
use crate::record::CallRecordPool;
use crate::stack::CallStack;

/// One instrumentation engine instance: controller, call stack, record
/// pool, and id/clock sources wired together.
///
/// Runtimes are plain values with no process-global state; tests routinely
/// construct several independent ones.
#[derive(Clone)]
pub struct MonitoringRuntime {
    controller: MonitoringController,
    stack: CallStack,
    pool: Arc<CallRecordPool>,
    ids: Arc<CallIdSource>,
    clock: Arc<dyn Clock>,
}

impl MonitoringRuntime {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let controller = MonitoringController::with_clock(Arc::clone(&clock));
        let stack = CallStack::with_clock(controller.clone(), Arc::clone(&clock));
        Self {
            controller,
            stack,
            pool: Arc::new(CallRecordPool::new()),
            ids: Arc::new(CallIdSource::new()),
            clock,
        }
    }

    pub fn controller(&self) -> &MonitoringController {
        &self.controller
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn pool(&self) -> &Arc<CallRecordPool> {
        &self.pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Entry point for instrumenting one class (or any other logical
    /// grouping the host chooses as a class key).
    pub fn class_monitor(&self, class_key: impl Into<String>) -> ClassMonitor {
        ClassMonitor::new(
            class_key.into(),
            self.controller.clone(),
            self.stack.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.ids),
            Arc::clone(&self.clock),
        )
    }

    /// Restores the pristine state: drains stack subscribers and stacks,
    /// returns all pooled records, and re-initializes the controller
    /// version to `(now, 0)`.
    pub fn reset(&self) {
        self.stack.reset();
        self.pool.reset();
        self.controller.reset();
    }

    pub fn current_version(&self) -> MonitoringVersion {
        self.controller.current_version()
    }
}

impl Default for MonitoringRuntime {
    fn default() -> Self {
        Self::new()
    }
}
