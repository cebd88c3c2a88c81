use time::Duration;

use crate::controller::ComponentId;
use crate::record::CallStackItem;

/// Decides whether a lifecycle item reaches a reporter's writers.
///
/// Invocation is read-only: a filter must never mutate engine state or the
/// records it inspects. A record is kept iff every filter enabled for the
/// reporter keeps it.
pub trait CallStackFilter: Send + Sync {
    /// Component identity used for controller gating and the
    /// reporter↔filter relation.
    fn id(&self) -> ComponentId;
    fn keep(&self, item: &CallStackItem) -> bool;
}

/// Keeps items whose class-qualified name contains a fragment.
pub struct MethodNameFilter {
    id: ComponentId,
    fragment: String,
}

impl MethodNameFilter {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            id: ComponentId::new("method-name-filter"),
            fragment: fragment.into(),
        }
    }
}

impl CallStackFilter for MethodNameFilter {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    fn keep(&self, item: &CallStackItem) -> bool {
        match item.record() {
            Some(record) => record.full_name().contains(&self.fragment),
            None => true,
        }
    }
}

/// Drops end events of calls shorter than a threshold. Starts and
/// exceptions pass through; gaps are synthetic and always pass.
pub struct MinDurationFilter {
    id: ComponentId,
    minimum: Duration,
}

impl MinDurationFilter {
    pub fn new(minimum: Duration) -> Self {
        Self {
            id: ComponentId::new("min-duration-filter"),
            minimum,
        }
    }
}

impl CallStackFilter for MinDurationFilter {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    fn keep(&self, item: &CallStackItem) -> bool {
        match item {
            CallStackItem::End(record) => record
                .elapsed()
                .map(|elapsed| elapsed >= self.minimum)
                .unwrap_or(true),
            _ => true,
        }
    }
}
