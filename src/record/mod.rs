//! Call records: one value per instrumented invocation, shared between the
//! call stack, contexts, and reporters.

mod pool;

pub use pool::CallRecordPool;

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use crate::clock::CallId;

/// Reserved method name carried by synthetic gap records. Records with this
/// name are excluded from override templates.
pub const GAP_METHOD_NAME: &str = "Gap";

/// Distinguishes real invocations from the two synthetic record shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Regular,
    Gap,
    Null,
}

/// Immutable call shape captured at the instrumentation site.
#[derive(Debug, Clone, Default)]
pub struct MethodSpec {
    pub class_key: String,
    pub method_name: String,
    pub parameter_types: SmallVec<[String; 4]>,
    pub generic_arguments: SmallVec<[String; 4]>,
    pub is_static: bool,
    pub is_extension: bool,
    pub is_generic: bool,
}

impl MethodSpec {
    pub fn new(class_key: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_key: class_key.into(),
            method_name: method_name.into(),
            ..Self::default()
        }
    }

    pub fn parameter_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn generic_arguments<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generic_arguments = args.into_iter().map(Into::into).collect();
        self.is_generic = !self.generic_arguments.is_empty();
        self
    }

    pub fn is_static(mut self, value: bool) -> Self {
        self.is_static = value;
        self
    }

    pub fn is_extension(mut self, value: bool) -> Self {
        self.is_extension = value;
        self
    }

    pub fn is_generic(mut self, value: bool) -> Self {
        self.is_generic = value;
        self
    }
}

#[derive(Debug)]
struct RecordState {
    start_time: OffsetDateTime,
    elapsed: Option<Duration>,
    thread_id: Option<u64>,
    parent: Weak<CallRecord>,
    parent_id: Option<CallId>,
    parent_thread_id: Option<u64>,
    level: u32,
    parameters: IndexMap<String, String>,
    attribute_parameters: Vec<String>,
    sealed: bool,
}

impl RecordState {
    fn fresh(start_time: OffsetDateTime) -> Self {
        Self {
            start_time,
            elapsed: None,
            thread_id: None,
            parent: Weak::new(),
            parent_id: None,
            parent_thread_id: None,
            level: 0,
            parameters: IndexMap::new(),
            attribute_parameters: Vec::new(),
            sealed: false,
        }
    }
}

/// One row of the trace: identity, call shape, timing, linkage, parameters.
///
/// The shape is fixed at rent time; the remainder is mutated by the owning
/// context and the call stack until the end (or exception) is recorded,
/// after which the record is sealed and further mutation is ignored.
///
/// The parent link is non-owning: a child holds a [`Weak`] back-reference
/// plus copied id/thread/level fields, so it never extends the parent's
/// lifetime.
#[derive(Debug)]
pub struct CallRecord {
    id: CallId,
    kind: RecordKind,
    spec: MethodSpec,
    state: Mutex<RecordState>,
}

impl CallRecord {
    pub(crate) fn new(
        id: CallId,
        spec: MethodSpec,
        start_time: OffsetDateTime,
        parameters: IndexMap<String, String>,
        attribute_parameters: Vec<String>,
    ) -> Self {
        let mut state = RecordState::fresh(start_time);
        state.parameters = parameters;
        state.attribute_parameters = dedup_case_insensitive(attribute_parameters);
        Self {
            id,
            kind: RecordKind::Regular,
            spec,
            state: Mutex::new(state),
        }
    }

    /// The shared "no parent / not tracked" sentinel. Never enters the
    /// reporter stream.
    pub(crate) fn null() -> Self {
        Self {
            id: CallId::from("null"),
            kind: RecordKind::Null,
            spec: MethodSpec::new("", ""),
            state: Mutex::new(RecordState::fresh(OffsetDateTime::UNIX_EPOCH)),
        }
    }

    /// Synthetic record covering unaccounted time between spans.
    pub fn gap(id: CallId, start: OffsetDateTime, end: OffsetDateTime) -> Arc<Self> {
        let mut state = RecordState::fresh(start);
        state.elapsed = Some((end - start).max(Duration::ZERO));
        state.sealed = true;
        Arc::new(Self {
            id,
            kind: RecordKind::Gap,
            spec: MethodSpec::new("", GAP_METHOD_NAME),
            state: Mutex::new(state),
        })
    }

    pub fn id(&self) -> &CallId {
        &self.id
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn is_null(&self) -> bool {
        self.kind == RecordKind::Null
    }

    pub fn is_gap(&self) -> bool {
        self.kind == RecordKind::Gap
    }

    pub fn class_key(&self) -> &str {
        &self.spec.class_key
    }

    pub fn method_name(&self) -> &str {
        &self.spec.method_name
    }

    /// Class-qualified method name, `Class.Method`. Gap records have no
    /// class and render as the bare method name.
    pub fn full_name(&self) -> String {
        if self.spec.class_key.is_empty() {
            self.spec.method_name.clone()
        } else {
            format!("{}.{}", self.spec.class_key, self.spec.method_name)
        }
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.spec.parameter_types
    }

    pub fn generic_arguments(&self) -> &[String] {
        &self.spec.generic_arguments
    }

    pub fn is_static(&self) -> bool {
        self.spec.is_static
    }

    pub fn is_extension(&self) -> bool {
        self.spec.is_extension
    }

    pub fn is_generic(&self) -> bool {
        self.spec.is_generic
    }

    pub fn start_time(&self) -> OffsetDateTime {
        self.state.lock().start_time
    }

    /// `None` until the end is recorded.
    pub fn elapsed(&self) -> Option<Duration> {
        self.state.lock().elapsed
    }

    pub fn thread_id(&self) -> Option<u64> {
        self.state.lock().thread_id
    }

    /// Upgraded parent reference, if the parent frame is still alive.
    pub fn parent(&self) -> Option<Arc<CallRecord>> {
        self.state.lock().parent.upgrade()
    }

    pub fn parent_id(&self) -> Option<CallId> {
        self.state.lock().parent_id.clone()
    }

    pub fn parent_thread_id(&self) -> Option<u64> {
        self.state.lock().parent_thread_id
    }

    /// 1-based depth in the per-thread stack; 0 before the record is pushed.
    pub fn level(&self) -> u32 {
        self.state.lock().level
    }

    pub fn parameters(&self) -> IndexMap<String, String> {
        self.state.lock().parameters.clone()
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        self.state.lock().parameters.get(name).cloned()
    }

    /// Names of attribute-sourced ("static") parameters, the ones eligible
    /// for override from a template file.
    pub fn attribute_parameters(&self) -> Vec<String> {
        self.state.lock().attribute_parameters.clone()
    }

    pub fn is_attribute_parameter(&self, name: &str) -> bool {
        self.state
            .lock()
            .attribute_parameters
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name))
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Appends or replaces a parameter. Ignored once the record is sealed.
    pub fn set_parameter(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut state = self.state.lock();
        if state.sealed {
            debug!(record = %self.id, "parameter set after end ignored");
            return;
        }
        state.parameters.insert(name.into(), value.into());
    }

    /// Marks a parameter name as attribute-sourced.
    pub fn mark_attribute_parameter(&self, name: &str) {
        let mut state = self.state.lock();
        if state.sealed {
            return;
        }
        if !state
            .attribute_parameters
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name))
        {
            state.attribute_parameters.push(name.to_string());
        }
    }

    pub(crate) fn set_start_time(&self, start: OffsetDateTime) {
        let mut state = self.state.lock();
        if !state.sealed {
            state.start_time = start;
        }
    }

    /// Stamps the owning thread at push time.
    pub(crate) fn attach_thread(&self, thread_id: u64) {
        let mut state = self.state.lock();
        if !state.sealed {
            state.thread_id = Some(thread_id);
        }
    }

    /// Links this record under `parent` (or as a root when `parent` is the
    /// null record). Called exactly once, at push time.
    pub(crate) fn link_parent(self: &Arc<Self>, parent: &Arc<CallRecord>) {
        if parent.is_null() {
            self.link_root();
            return;
        }
        let mut state = self.state.lock();
        if state.sealed {
            return;
        }
        state.parent = Arc::downgrade(parent);
        state.parent_id = Some(parent.id().clone());
        state.parent_thread_id = parent.thread_id();
        state.level = parent.level() + 1;
    }

    /// Marks this record as a root of its trace (level 1, no parent).
    pub(crate) fn link_root(&self) {
        let mut state = self.state.lock();
        if state.sealed {
            return;
        }
        state.parent = Weak::new();
        state.parent_id = None;
        state.parent_thread_id = None;
        state.level = 1;
    }

    /// Records the end of the call and seals the record. A negative elapsed
    /// (clock skew) is clamped to zero.
    pub(crate) fn record_end(&self, elapsed: Duration) {
        let mut state = self.state.lock();
        if state.sealed {
            debug!(record = %self.id, "end recorded twice; ignored");
            return;
        }
        state.elapsed = Some(elapsed.max(Duration::ZERO));
        state.sealed = true;
    }

    /// End time derived from start + elapsed; `None` while still running.
    pub fn end_time(&self) -> Option<OffsetDateTime> {
        let state = self.state.lock();
        state.elapsed.map(|e| state.start_time + e)
    }

    /// Resets everything but the allocation for pool reuse.
    fn reinitialize(
        &mut self,
        id: CallId,
        spec: MethodSpec,
        start_time: OffsetDateTime,
        parameters: IndexMap<String, String>,
        attribute_parameters: Vec<String>,
    ) {
        self.id = id;
        self.spec = spec;
        let state = self.state.get_mut();
        *state = RecordState::fresh(start_time);
        state.parameters = parameters;
        state.attribute_parameters = dedup_case_insensitive(attribute_parameters);
    }
}

fn dedup_case_insensitive(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !out.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            out.push(name);
        }
    }
    out
}

/// Lifecycle event published by the call stack and consumed by reporters.
#[derive(Debug, Clone)]
pub enum CallStackItem {
    /// A record was pushed.
    Start(Arc<CallRecord>),
    /// A record was popped normally.
    End(Arc<CallRecord>),
    /// An exception was logged against a still-open record.
    Exception(Arc<CallRecord>),
    /// Synthetic record covering unaccounted time; produced by reporters.
    Gap(Arc<CallRecord>),
    /// Every per-thread stack has drained.
    Empty,
}

impl CallStackItem {
    pub fn record(&self) -> Option<&Arc<CallRecord>> {
        match self {
            CallStackItem::Start(r)
            | CallStackItem::End(r)
            | CallStackItem::Exception(r)
            | CallStackItem::Gap(r) => Some(r),
            CallStackItem::Empty => None,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, CallStackItem::Start(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(self, CallStackItem::End(_))
    }

    pub fn is_gap(&self) -> bool {
        matches!(self, CallStackItem::Gap(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            CallStackItem::Start(_) => "start",
            CallStackItem::End(_) => "end",
            CallStackItem::Exception(_) => "exception",
            CallStackItem::Gap(_) => "gap",
            CallStackItem::Empty => "empty",
        }
    }
}
