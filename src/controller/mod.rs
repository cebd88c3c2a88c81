//! Monitoring controller: monotonic versioning of global and per-component
//! state, hierarchical gating, scoped operations, and change broadcast.

mod config;
mod operation;
mod version;

pub use config::{ComponentId, ComponentKind, MonitoringConfiguration};
pub use operation::OperationScope;
pub use version::MonitoringVersion;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::clock::{Clock, SystemClock};

/// Broadcast payload for one controller state change.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub kind: ComponentKind,
    /// `None` for the global flag.
    pub component: Option<ComponentId>,
    pub enabled: bool,
    pub version: MonitoringVersion,
}

/// A versioned collaborator the controller refreshes on every version bump.
pub trait VersionedContext: Send + Sync {
    fn on_version_changed(&self, new_version: MonitoringVersion);
}

type StateChangedCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;
type VersionChangedCallback = Arc<dyn Fn(MonitoringVersion, MonitoringVersion) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct ComponentFlag {
    enabled: bool,
    activation: MonitoringVersion,
}

struct ControllerState {
    version: MonitoringVersion,
    global_enabled: bool,
    /// Version of the most recent global enable; bumped past the last
    /// disable on every re-enable, which is what makes `should_track`
    /// monotonically non-increasing across a disable.
    global_activation: Option<MonitoringVersion>,
    reporters: FxHashMap<ComponentId, ComponentFlag>,
    filters: FxHashMap<ComponentId, ComponentFlag>,
    reporter_filters: FxHashMap<ComponentId, Vec<ComponentId>>,
}

impl ControllerState {
    fn fresh(clock: &dyn Clock) -> Self {
        Self {
            version: MonitoringVersion::current(clock),
            global_enabled: false,
            global_activation: None,
            reporters: FxHashMap::default(),
            filters: FxHashMap::default(),
            reporter_filters: FxHashMap::default(),
        }
    }
}

struct Inner {
    clock: Arc<dyn Clock>,
    state: Mutex<ControllerState>,
    state_callbacks: Mutex<Vec<StateChangedCallback>>,
    version_callbacks: Mutex<Vec<VersionChangedCallback>>,
    contexts: Mutex<Vec<Weak<dyn VersionedContext>>>,
}

/// Gates tracking for the whole engine.
///
/// Controllers are plain values: clone freely, share via the internal
/// [`Arc`], construct as many independent instances as tests need. All flag
/// state lives behind a single mutation point; every state-mutating call
/// atomically flips its flag, mints a strictly newer version, and then
/// drains callbacks synchronously outside the lock.
///
/// State-change operations never fail; unknown component ids are registered
/// lazily on first use.
#[derive(Clone)]
pub struct MonitoringController {
    inner: Arc<Inner>,
}

impl MonitoringController {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let state = ControllerState::fresh(clock.as_ref());
        Self {
            inner: Arc::new(Inner {
                clock,
                state: Mutex::new(state),
                state_callbacks: Mutex::new(Vec::new()),
                version_callbacks: Mutex::new(Vec::new()),
                contexts: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    // --- state mutation -------------------------------------------------

    /// Turns monitoring on globally.
    pub fn enable(&self) {
        self.mutate(ComponentKind::Global, None, |state, version| {
            state.global_enabled = true;
            state.global_activation = Some(version);
            true
        });
    }

    /// Turns monitoring off globally. Absolute: suppresses tracking even
    /// where component flags remain set; those flags are restored by the
    /// next [`enable`](Self::enable).
    pub fn disable(&self) {
        self.mutate(ComponentKind::Global, None, |state, _| {
            state.global_enabled = false;
            state.global_activation = None;
            false
        });
    }

    pub fn enable_reporter(&self, reporter: impl Into<ComponentId>) {
        let reporter = reporter.into();
        self.mutate(
            ComponentKind::Reporter,
            Some(reporter.clone()),
            move |state, version| {
                state.reporters.insert(
                    reporter,
                    ComponentFlag {
                        enabled: true,
                        activation: version,
                    },
                );
                true
            },
        );
    }

    pub fn disable_reporter(&self, reporter: impl Into<ComponentId>) {
        let reporter = reporter.into();
        self.mutate(
            ComponentKind::Reporter,
            Some(reporter.clone()),
            move |state, version| {
                state.reporters.insert(
                    reporter,
                    ComponentFlag {
                        enabled: false,
                        activation: version,
                    },
                );
                false
            },
        );
    }

    pub fn enable_filter(&self, filter: impl Into<ComponentId>) {
        let filter = filter.into();
        self.mutate(
            ComponentKind::Filter,
            Some(filter.clone()),
            move |state, version| {
                state.filters.insert(
                    filter,
                    ComponentFlag {
                        enabled: true,
                        activation: version,
                    },
                );
                true
            },
        );
    }

    pub fn disable_filter(&self, filter: impl Into<ComponentId>) {
        let filter = filter.into();
        self.mutate(
            ComponentKind::Filter,
            Some(filter.clone()),
            move |state, version| {
                state.filters.insert(
                    filter,
                    ComponentFlag {
                        enabled: false,
                        activation: version,
                    },
                );
                false
            },
        );
    }

    /// Enables `filter` for `reporter` in the reporter↔filter relation.
    pub fn enable_filter_for_reporter(
        &self,
        reporter: impl Into<ComponentId>,
        filter: impl Into<ComponentId>,
    ) {
        let reporter = reporter.into();
        let filter = filter.into();
        self.mutate(
            ComponentKind::Filter,
            Some(filter.clone()),
            move |state, _| {
                let filters = state.reporter_filters.entry(reporter).or_default();
                if !filters.contains(&filter) {
                    filters.push(filter);
                }
                true
            },
        );
    }

    pub fn disable_filter_for_reporter(
        &self,
        reporter: impl Into<ComponentId>,
        filter: impl Into<ComponentId>,
    ) {
        let reporter = reporter.into();
        let filter = filter.into();
        self.mutate(
            ComponentKind::Filter,
            Some(filter.clone()),
            move |state, _| {
                if let Some(filters) = state.reporter_filters.get_mut(&reporter) {
                    filters.retain(|f| f != &filter);
                }
                false
            },
        );
    }

    /// Restores the pristine state: version `(now, 0)`, everything
    /// disabled, callbacks and registered contexts dropped.
    pub fn reset(&self) {
        {
            let mut state = self.inner.state.lock();
            *state = ControllerState::fresh(self.inner.clock.as_ref());
        }
        self.inner.state_callbacks.lock().clear();
        self.inner.version_callbacks.lock().clear();
        self.inner.contexts.lock().clear();
    }

    // --- point-in-time reads --------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().global_enabled
    }

    pub fn is_reporter_enabled(&self, reporter: &ComponentId) -> bool {
        self.inner
            .state
            .lock()
            .reporters
            .get(reporter)
            .is_some_and(|flag| flag.enabled)
    }

    pub fn is_filter_enabled(&self, filter: &ComponentId) -> bool {
        self.inner
            .state
            .lock()
            .filters
            .get(filter)
            .is_some_and(|flag| flag.enabled)
    }

    pub fn is_filter_enabled_for_reporter(
        &self,
        reporter: &ComponentId,
        filter: &ComponentId,
    ) -> bool {
        self.inner
            .state
            .lock()
            .reporter_filters
            .get(reporter)
            .is_some_and(|filters| filters.contains(filter))
    }

    pub fn current_version(&self) -> MonitoringVersion {
        self.inner.state.lock().version
    }

    /// Consistent snapshot of the full flag state.
    pub fn configuration(&self) -> MonitoringConfiguration {
        let state = self.inner.state.lock();
        MonitoringConfiguration {
            version: state.version,
            global_enabled: state.global_enabled,
            reporters: state
                .reporters
                .iter()
                .map(|(id, flag)| (id.clone(), flag.enabled))
                .collect(),
            filters: state
                .filters
                .iter()
                .map(|(id, flag)| (id.clone(), flag.enabled))
                .collect(),
            reporter_filters: state.reporter_filters.clone(),
        }
    }

    /// Pure gating decision for the supplied version: true iff the global
    /// flag is on, `version` is no older than the global activation (which
    /// postdates the last disable), and each supplied component is enabled
    /// with an activation no newer than `version`. Never mutates state.
    pub fn should_track(
        &self,
        version: MonitoringVersion,
        reporter: Option<&ComponentId>,
        filter: Option<&ComponentId>,
    ) -> bool {
        let state = self.inner.state.lock();
        if !state.global_enabled {
            return false;
        }
        let Some(activation) = state.global_activation else {
            return false;
        };
        if version < activation {
            return false;
        }
        if let Some(reporter) = reporter {
            if !component_active(&state.reporters, reporter, version) {
                return false;
            }
        }
        if let Some(filter) = filter {
            if !component_active(&state.filters, filter, version) {
                return false;
            }
        }
        true
    }

    // --- scoped operations and broadcast --------------------------------

    /// Opens an operation scope pinned to the current version. Subsequent
    /// gating for the scope evaluates against that pin; any version change
    /// invalidates the scope until it is closed and reopened.
    pub fn begin_operation(&self) -> OperationScope {
        let pinned = self.current_version();
        trace!(version = %pinned, "operation opened");
        OperationScope::new(self.clone(), pinned)
    }

    /// Attaches a versioned context refreshed on every version change.
    pub fn register_context(&self, context: &Arc<dyn VersionedContext>) {
        self.inner.contexts.lock().push(Arc::downgrade(context));
    }

    pub fn add_state_changed_callback(
        &self,
        callback: impl Fn(&StateChange) + Send + Sync + 'static,
    ) {
        self.inner.state_callbacks.lock().push(Arc::new(callback));
    }

    pub fn add_version_changed_callback(
        &self,
        callback: impl Fn(MonitoringVersion, MonitoringVersion) + Send + Sync + 'static,
    ) {
        self.inner.version_callbacks.lock().push(Arc::new(callback));
    }

    /// Single mutation point: flip under the lock, mint the next version,
    /// then notify with no lock held so callbacks may re-enter.
    fn mutate(
        &self,
        kind: ComponentKind,
        component: Option<ComponentId>,
        apply: impl FnOnce(&mut ControllerState, MonitoringVersion) -> bool,
    ) {
        let (old, new, enabled) = {
            let mut state = self.inner.state.lock();
            let old = state.version;
            let new = old.next_after(self.inner.clock.as_ref());
            let enabled = apply(&mut state, new);
            state.version = new;
            (old, new, enabled)
        };
        trace!(kind = ?kind, component = ?component, enabled, version = %new, "state changed");
        let change = StateChange {
            kind,
            component,
            enabled,
            version: new,
        };
        let state_callbacks: Vec<_> = self.inner.state_callbacks.lock().clone();
        for callback in state_callbacks {
            callback(&change);
        }
        let version_callbacks: Vec<_> = self.inner.version_callbacks.lock().clone();
        for callback in version_callbacks {
            callback(old, new);
        }
        let mut contexts = self.inner.contexts.lock();
        contexts.retain(|weak| weak.upgrade().is_some());
        let live: Vec<_> = contexts.iter().filter_map(Weak::upgrade).collect();
        drop(contexts);
        for context in live {
            context.on_version_changed(new);
        }
    }
}

impl Default for MonitoringController {
    fn default() -> Self {
        Self::new()
    }
}

fn component_active(
    flags: &FxHashMap<ComponentId, ComponentFlag>,
    id: &ComponentId,
    version: MonitoringVersion,
) -> bool {
    flags
        .get(id)
        .is_some_and(|flag| flag.enabled && version >= flag.activation)
}
