//! Scoped measurement contexts: the host-facing surface that couples the
//! controller, the call stack, and the record pool.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use crate::clock::{CallIdSource, Clock};
use crate::controller::{ComponentId, MonitoringController, OperationScope};
use crate::record::{CallRecord, CallRecordPool, MethodSpec};
use crate::stack::{current_thread_id, CallStack};

/// Call-site description handed to [`ClassMonitor::start`].
///
/// Attribute parameters are the "static" ones sourced from annotations at
/// the instrumentation site; they seed the record's parameter map and are
/// eligible for override from a template file. Regular parameters are
/// dynamic and never overridden.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    method: MethodSpec,
    parameters: IndexMap<String, String>,
    attribute_parameters: IndexMap<String, String>,
    reporter: Option<ComponentId>,
    filter: Option<ComponentId>,
}

impl MonitorConfig {
    pub fn method(method_name: impl Into<String>) -> Self {
        Self {
            method: MethodSpec::new("", method_name),
            ..Self::default()
        }
    }

    pub fn spec(mut self, method: MethodSpec) -> Self {
        self.method = method;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn attribute_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attribute_parameters.insert(name.into(), value.into());
        self
    }

    /// Gates tracking on a reporter flag in addition to the global flag.
    pub fn gate_on_reporter(mut self, reporter: impl Into<ComponentId>) -> Self {
        self.reporter = Some(reporter.into());
        self
    }

    /// Gates tracking on a filter flag in addition to the global flag.
    pub fn gate_on_filter(mut self, filter: impl Into<ComponentId>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Per-class entry point for opening measurement contexts.
#[derive(Clone)]
pub struct ClassMonitor {
    class_key: String,
    controller: MonitoringController,
    stack: CallStack,
    pool: Arc<CallRecordPool>,
    ids: Arc<CallIdSource>,
    clock: Arc<dyn Clock>,
}

impl ClassMonitor {
    pub(crate) fn new(
        class_key: String,
        controller: MonitoringController,
        stack: CallStack,
        pool: Arc<CallRecordPool>,
        ids: Arc<CallIdSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            class_key,
            controller,
            stack,
            pool,
            ids,
            clock,
        }
    }

    pub fn class_key(&self) -> &str {
        &self.class_key
    }

    /// Rents a record for `config` and populates its metadata, without
    /// pushing it. The building block under [`start`](Self::start).
    pub fn create_record(&self, config: &MonitorConfig) -> Arc<CallRecord> {
        let mut spec = config.method.clone();
        if spec.class_key.is_empty() {
            spec.class_key = self.class_key.clone();
        }
        let mut parameters = config.parameters.clone();
        for (name, value) in &config.attribute_parameters {
            parameters.insert(name.clone(), value.clone());
        }
        let attribute_names = config.attribute_parameters.keys().cloned().collect();
        self.pool.rent(
            spec,
            self.ids.next_id(),
            self.clock.now(),
            parameters,
            attribute_names,
        )
    }

    /// Opens a synchronous measurement context. Returns the dummy context
    /// when gating says not to track.
    pub fn start(&self, config: MonitorConfig) -> MethodCallContext {
        self.open(config, false)
    }

    /// Opens a context whose lifetime may resume on other threads. The
    /// originating thread id is captured; the pop at disposal still drains
    /// the originating thread's stack through the record's identity.
    pub fn async_start(&self, config: MonitorConfig) -> MethodCallContext {
        self.open(config, true)
    }

    fn open(&self, config: MonitorConfig, async_mode: bool) -> MethodCallContext {
        let scope = self.controller.begin_operation();
        if !scope.should_track(config.reporter.as_ref(), config.filter.as_ref()) {
            trace!(class = %self.class_key, "context not tracked; dummy returned");
            return MethodCallContext::dummy();
        }
        let record = self.create_record(&config);
        if let Err(err) = self.stack.push(&record) {
            trace!(error = %err, "push rejected; dummy returned");
            return MethodCallContext::dummy();
        }
        MethodCallContext {
            inner: Some(ContextInner {
                record,
                stack: self.stack.clone(),
                pool: Arc::clone(&self.pool),
                clock: Arc::clone(&self.clock),
                _scope: scope,
                origin_thread: current_thread_id(),
                async_mode,
            }),
        }
    }
}

struct ContextInner {
    record: Arc<CallRecord>,
    stack: CallStack,
    pool: Arc<CallRecordPool>,
    clock: Arc<dyn Clock>,
    _scope: OperationScope,
    origin_thread: u64,
    async_mode: bool,
}

/// Scoped lifetime of one measured call.
///
/// Disposal (drop) records the elapsed time, pops the record, and hands it
/// back to the pool once observers are done with it. The dummy variant is
/// returned when tracking is gated off; every operation on it is a no-op.
pub struct MethodCallContext {
    inner: Option<ContextInner>,
}

impl MethodCallContext {
    fn dummy() -> Self {
        Self { inner: None }
    }

    /// True for the shared no-op context handed out when tracking is off.
    pub fn is_dummy(&self) -> bool {
        self.inner.is_none()
    }

    /// The record being measured; `None` on the dummy context.
    pub fn record(&self) -> Option<&Arc<CallRecord>> {
        self.inner.as_ref().map(|inner| &inner.record)
    }

    /// Thread the context was opened on.
    pub fn origin_thread(&self) -> Option<u64> {
        self.inner.as_ref().map(|inner| inner.origin_thread)
    }

    pub fn is_async(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.async_mode)
    }

    /// Appends a dynamic parameter to the record.
    pub fn set_parameter(&self, name: impl Into<String>, value: impl Into<String>) {
        if let Some(inner) = &self.inner {
            inner.record.set_parameter(name, value);
        }
    }

    /// Publishes an exception event against the still-open record.
    pub fn log_exception(&self, error: &dyn fmt::Display) {
        if let Some(inner) = &self.inner {
            inner.stack.log_exception(&inner.record, error.to_string());
        }
    }
}

impl Drop for MethodCallContext {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        let elapsed = inner.clock.now() - inner.record.start_time();
        inner.record.record_end(elapsed);
        inner.stack.pop(&inner.record);
        inner.pool.give_back(inner.record);
    }
}
