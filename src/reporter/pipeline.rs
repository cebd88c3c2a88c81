use std::sync::Arc;

use rustc_hash::FxHashMap;
use time::{Duration, OffsetDateTime};
use tracing::error;

use crate::clock::CallId;
use crate::record::{CallRecord, CallStackItem};
use crate::report::{ReportItem, ReportWriter};
use crate::reporter::{CallStackFilter, BATCH_SIZE};

/// Parameter name that classifies an item as user interaction for the
/// summary.
pub const WORKFLOW_ITEM_TYPE_PARAMETER: &str = "WorkflowItemType";
pub const USER_INTERACTION_VALUE: &str = "UserInteraction";

/// Stream processor behind one reporting subscription: filtering, batching,
/// gap synthesis, and the completion summary.
pub(crate) struct Pipeline {
    writers: Vec<Box<dyn ReportWriter>>,
    filters: Vec<Arc<dyn CallStackFilter>>,
    batch: Vec<ReportItem>,
    root_id: Option<String>,
    /// Reporter-local depth per thread, excluding the root record.
    depths: FxHashMap<u64, u32>,
    last_end: Option<OffsetDateTime>,
    gap_seq: u64,
    gap_total: Duration,
    gap_count: u64,
    user_interaction_total: Duration,
    root_duration: Option<Duration>,
    finished: bool,
}

impl Pipeline {
    pub(crate) fn new(
        writers: Vec<Box<dyn ReportWriter>>,
        filters: Vec<Arc<dyn CallStackFilter>>,
        root_id: Option<String>,
    ) -> Self {
        Self {
            writers,
            filters,
            batch: Vec::with_capacity(BATCH_SIZE),
            root_id,
            depths: FxHashMap::default(),
            last_end: None,
            gap_seq: 0,
            gap_total: Duration::ZERO,
            gap_count: 0,
            user_interaction_total: Duration::ZERO,
            root_duration: None,
            finished: false,
        }
    }

    /// Consumes one lifecycle item in publication order.
    pub(crate) fn process(&mut self, item: &CallStackItem) {
        if self.finished {
            return;
        }
        let is_root = item
            .record()
            .is_some_and(|record| self.is_root(record.id().to_string().as_str()));

        if !is_root {
            match item {
                CallStackItem::Start(record) => {
                    let thread = record.thread_id().unwrap_or(0);
                    let depth = self.depths.get(&thread).copied().unwrap_or(0);
                    if depth == 0 {
                        if let Some(last_end) = self.last_end {
                            if record.start_time() > last_end {
                                self.emit_gap(last_end, record.start_time());
                            }
                        }
                    }
                    *self.depths.entry(thread).or_insert(0) += 1;
                }
                CallStackItem::End(record) => {
                    let thread = record.thread_id().unwrap_or(0);
                    let drained = match self.depths.get_mut(&thread) {
                        Some(depth) => {
                            *depth = depth.saturating_sub(1);
                            *depth == 0
                        }
                        None => false,
                    };
                    if drained {
                        self.depths.remove(&thread);
                    }
                    if let Some(end) = record.end_time() {
                        self.last_end = Some(match self.last_end {
                            Some(previous) => previous.max(end),
                            None => end,
                        });
                    }
                }
                _ => {}
            }
        }

        if let CallStackItem::End(record) = item {
            if record
                .parameter(WORKFLOW_ITEM_TYPE_PARAMETER)
                .is_some_and(|value| value == USER_INTERACTION_VALUE)
            {
                if let Some(elapsed) = record.elapsed() {
                    self.user_interaction_total += elapsed;
                }
            }
        }

        if self.filters.iter().all(|filter| filter.keep(item)) {
            if let Some(report_item) = ReportItem::from_stack_item(item) {
                self.batch.push(report_item);
            }
        }

        let root_ended = is_root && item.is_end();
        if root_ended {
            if let Some(record) = item.record() {
                self.root_duration = record.elapsed();
            }
            self.emit_summary();
        }
        if root_ended || self.batch.len() >= BATCH_SIZE {
            self.flush();
        }
    }

    /// Drains the current batch into every writer.
    pub(crate) fn flush(&mut self) {
        for item in self.batch.drain(..) {
            for writer in &mut self.writers {
                writer.write_item(&item);
            }
        }
    }

    /// Flushes and closes all writers. Close failures are logged per writer
    /// and never stop the remaining writers.
    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.flush();
        for writer in &mut self.writers {
            if let Err(err) = writer.close() {
                error!(error = %err, "report writer failed to close");
            }
        }
        self.finished = true;
    }

    fn is_root(&self, id: &str) -> bool {
        self.root_id.as_deref() == Some(id)
    }

    fn emit_gap(&mut self, from: OffsetDateTime, to: OffsetDateTime) {
        self.gap_seq += 1;
        let record = CallRecord::gap(
            CallId::from(format!("gap-{}", self.gap_seq).as_str()),
            from,
            to,
        );
        self.gap_total += to - from;
        self.gap_count += 1;
        let item = CallStackItem::Gap(record);
        if self.filters.iter().all(|filter| filter.keep(&item)) {
            if let Some(report_item) = ReportItem::from_stack_item(&item) {
                self.batch.push(report_item);
            }
        }
    }

    fn emit_summary(&mut self) {
        let total = self.root_duration.unwrap_or(Duration::ZERO);
        let measured = (total - self.gap_total).max(Duration::ZERO);
        let without_interaction = (measured - self.user_interaction_total).max(Duration::ZERO);
        let lines = [
            format!("Total duration: {} ms", total.whole_milliseconds()),
            format!(
                "Total gap duration: {} ms",
                self.gap_total.whole_milliseconds()
            ),
            format!(
                "User interaction duration: {} ms",
                self.user_interaction_total.whole_milliseconds()
            ),
            format!("Measured total: {} ms", measured.whole_milliseconds()),
            format!(
                "Measured without user interaction: {} ms",
                without_interaction.whole_milliseconds()
            ),
            format!("Gap count: {}", self.gap_count),
        ];
        for line in &lines {
            for writer in &mut self.writers {
                writer.write_summary(line);
            }
        }
    }

}
