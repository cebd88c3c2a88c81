use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::controller::MonitoringVersion;

/// Opaque identifier of a reporter or filter component, chosen at
/// registration time. Interned so clones are cheap and comparisons are by
/// content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(Arc<str>);

impl ComponentId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which part of the controller a state change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Global,
    Reporter,
    Filter,
}

/// Point-in-time snapshot of the controller's flag state, handed to
/// reporters at initialization.
#[derive(Debug, Clone)]
pub struct MonitoringConfiguration {
    pub version: MonitoringVersion,
    pub global_enabled: bool,
    pub reporters: FxHashMap<ComponentId, bool>,
    pub filters: FxHashMap<ComponentId, bool>,
    /// Filters enabled per reporter.
    pub reporter_filters: FxHashMap<ComponentId, Vec<ComponentId>>,
}

impl MonitoringConfiguration {
    pub fn is_reporter_enabled(&self, reporter: &ComponentId) -> bool {
        self.reporters.get(reporter).copied().unwrap_or(false)
    }

    pub fn is_filter_enabled(&self, filter: &ComponentId) -> bool {
        self.filters.get(filter).copied().unwrap_or(false)
    }

    pub fn is_filter_enabled_for_reporter(
        &self,
        reporter: &ComponentId,
        filter: &ComponentId,
    ) -> bool {
        self.reporter_filters
            .get(reporter)
            .is_some_and(|filters| filters.contains(filter))
    }
}
