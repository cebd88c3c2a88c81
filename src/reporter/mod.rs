//! Reporter pipeline: consumes the lifecycle event stream, filters and
//! batches it, detects gaps, and drives the report writers.

mod filter;
mod pipeline;

pub use filter::{CallStackFilter, MethodNameFilter, MinDurationFilter};
pub use pipeline::{USER_INTERACTION_VALUE, WORKFLOW_ITEM_TYPE_PARAMETER};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::controller::{ComponentId, MonitoringConfiguration, MonitoringController};
use crate::error::{Result, TrazaError};
use crate::record::{CallRecord, CallStackItem};
use crate::report::{OutputParameters, ReportWriter, ReporterMeta};
use crate::reporter::pipeline::Pipeline;
use crate::stack::{CallStack, CallStackObserver, SubscriptionGuard};

/// Items buffered per reporter before a flush.
pub const BATCH_SIZE: usize = 100;

static REPORTER_SEQ: AtomicU64 = AtomicU64::new(1);

/// One consumer of the event stream driving one or more writers.
///
/// The observable lifecycle is fixed: the root method is set by
/// [`initialize`](Self::initialize), reporting starts afterwards, and the
/// returned guard flushes and closes every writer on release — including
/// release through cancellation, which still drains the current batch.
pub struct Reporter {
    name: String,
    full_name: String,
    id: String,
    controller: MonitoringController,
    writers: Vec<(Box<dyn ReportWriter>, OutputParameters)>,
    filters: Vec<Arc<dyn CallStackFilter>>,
    root_method: Option<String>,
    root_id: Option<String>,
    config: Option<MonitoringConfiguration>,
}

impl Reporter {
    pub fn new(name: impl Into<String>, controller: MonitoringController) -> Self {
        let name = name.into();
        let seq = REPORTER_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            full_name: name.clone(),
            id: format!("{name}#{seq}"),
            name,
            controller,
            writers: Vec::new(),
            filters: Vec::new(),
            root_method: None,
            root_id: None,
            config: None,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity used for controller gating (`enable_reporter` etc.).
    pub fn component_id(&self) -> ComponentId {
        ComponentId::new(&self.name)
    }

    /// Set once by [`initialize`](Self::initialize).
    pub fn root_method(&self) -> Option<&str> {
        self.root_method.as_deref()
    }

    /// Registers a writer together with its output configuration.
    pub fn add_output(&mut self, writer: Box<dyn ReportWriter>, params: OutputParameters) {
        self.writers.push((writer, params));
    }

    /// Registers `filter` and enables it for this reporter in the
    /// controller's reporter↔filter relation.
    pub fn add_filter(&mut self, filter: Arc<dyn CallStackFilter>) {
        let filter_id = filter.id();
        self.controller.enable_filter(filter_id.clone());
        self.controller
            .enable_filter_for_reporter(self.component_id(), filter_id);
        self.filters.push(filter);
    }

    /// Captures the configuration snapshot and the root call record. Must
    /// run exactly once, before [`start_reporting`](Self::start_reporting).
    pub fn initialize(
        &mut self,
        config: MonitoringConfiguration,
        root: &Arc<CallRecord>,
    ) -> Result<()> {
        if self.config.is_some() {
            return Err(TrazaError::State(format!(
                "reporter {} initialized twice",
                self.name
            )));
        }
        self.root_method = Some(root.full_name());
        self.root_id = Some(root.id().to_string());
        self.config = Some(config);
        Ok(())
    }

    /// Subscribes to the stream and opens every writer. The guard keeps the
    /// subscription alive; dropping it drains the current batch and closes
    /// the writers.
    ///
    /// Calling this before [`initialize`](Self::initialize) is a
    /// [`TrazaError::State`]: the root method must be set before reporting
    /// starts.
    pub fn start_reporting(&mut self, stack: &CallStack) -> Result<ReportingGuard> {
        if self.config.is_none() {
            return Err(TrazaError::State(format!(
                "reporter {} started before initialize",
                self.name
            )));
        }
        let meta = ReporterMeta {
            name: self.name.clone(),
            full_name: self.full_name.clone(),
            id: self.id.clone(),
            root_method: self.root_method.clone(),
        };

        let had_writers = !self.writers.is_empty();
        let mut open_writers = Vec::new();
        let mut first_error = None;
        for (mut writer, params) in self.writers.drain(..) {
            writer.set_parameters(params);
            match writer.initialize(&meta) {
                Ok(()) => open_writers.push(writer),
                Err(err) => {
                    warn!(reporter = %self.name, error = %err, "writer failed to open");
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        if had_writers && open_writers.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        let component_id = self.component_id();
        let active_filters: Vec<_> = self
            .filters
            .iter()
            .filter(|filter| {
                self.controller
                    .is_filter_enabled_for_reporter(&component_id, &filter.id())
            })
            .cloned()
            .collect();

        let pipeline = Arc::new(Mutex::new(Pipeline::new(
            open_writers,
            active_filters,
            self.root_id.clone(),
        )));
        let observer: Arc<dyn CallStackObserver> = Arc::new(PipelineObserver {
            pipeline: Arc::clone(&pipeline),
        });
        let subscription = stack.subscribe(observer);
        Ok(ReportingGuard {
            pipeline,
            _subscription: subscription,
        })
    }
}

struct PipelineObserver {
    pipeline: Arc<Mutex<Pipeline>>,
}

impl CallStackObserver for PipelineObserver {
    fn on_item(&self, item: &CallStackItem) {
        self.pipeline.lock().process(item);
    }
}

/// Scoped reporting subscription. Dropping it unsubscribes, drains the
/// in-flight batch, and closes every writer.
pub struct ReportingGuard {
    pipeline: Arc<Mutex<Pipeline>>,
    _subscription: SubscriptionGuard,
}

impl std::fmt::Debug for ReportingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportingGuard").finish_non_exhaustive()
    }
}

impl ReportingGuard {
    /// Forces the current batch out to the writers.
    pub fn flush(&self) {
        self.pipeline.lock().flush();
    }
}

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        self.pipeline.lock().finish();
    }
}
