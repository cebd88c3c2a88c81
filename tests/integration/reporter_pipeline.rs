#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use time::macros::datetime;
use time::Duration;
use traza::{
    LimitOptions, ManualClock, MonitorConfig, MonitoringRuntime, OutputParameters, ReportItem,
    ReportItemKind, ReportWriter, Reporter, ReporterMeta, Result, TrazaError,
};

#[derive(Default)]
struct RecordedOutput {
    items: Vec<ReportItem>,
    summaries: Vec<String>,
    closed: bool,
}

struct RecordingWriter {
    output: Arc<Mutex<RecordedOutput>>,
}

impl RecordingWriter {
    fn new() -> (Box<dyn ReportWriter>, Arc<Mutex<RecordedOutput>>) {
        let output = Arc::new(Mutex::new(RecordedOutput::default()));
        (
            Box::new(Self {
                output: Arc::clone(&output),
            }),
            output,
        )
    }
}

impl ReportWriter for RecordingWriter {
    fn set_parameters(&mut self, _params: OutputParameters) {}
    fn set_limit_options(&mut self, _limit: LimitOptions) {}
    fn get_limit_options(&self) -> LimitOptions {
        LimitOptions::default()
    }
    fn initialize(&mut self, _reporter: &ReporterMeta) -> Result<()> {
        Ok(())
    }
    fn write_item(&mut self, item: &ReportItem) {
        self.output.lock().items.push(item.clone());
    }
    fn write_summary(&mut self, message: &str) {
        self.output.lock().summaries.push(message.to_string());
    }
    fn write_error(&mut self, _error: &TrazaError) {}
    fn close(&mut self) -> Result<()> {
        self.output.lock().closed = true;
        Ok(())
    }
}

fn manual_runtime() -> (MonitoringRuntime, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00:00 UTC)));
    let runtime = MonitoringRuntime::with_clock(clock.clone());
    runtime.controller().enable();
    (runtime, clock)
}

#[test]
fn gap_detection_and_summary_end_to_end() {
    let (runtime, clock) = manual_runtime();
    let monitor = runtime.class_monitor("Workflow");

    let root = monitor.start(MonitorConfig::method("Run"));
    let root_record = root.record().unwrap().clone();

    let (writer, output) = RecordingWriter::new();
    let mut reporter = Reporter::new("workflow", runtime.controller().clone());
    reporter.add_output(writer, OutputParameters::new("/out"));
    reporter
        .initialize(runtime.controller().configuration(), &root_record)
        .unwrap();
    let guard = reporter.start_reporting(runtime.stack()).unwrap();

    // First child: [0ms, 100ms].
    let first = monitor.start(MonitorConfig::method("LoadData"));
    clock.advance(Duration::milliseconds(100));
    drop(first);

    // 50ms of unaccounted time, then a user-interaction child [150ms, 250ms].
    clock.advance(Duration::milliseconds(50));
    let second = monitor.start(MonitorConfig::method("ConfirmDialog"));
    second.set_parameter("WorkflowItemType", "UserInteraction");
    clock.advance(Duration::milliseconds(100));
    drop(second);

    clock.advance(Duration::milliseconds(50));
    drop(root);
    drop(guard);

    let output = output.lock();
    assert!(output.closed);

    let kinds: Vec<_> = output
        .items
        .iter()
        .map(|item| (item.kind, item.method_name.clone()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (ReportItemKind::Start, "LoadData".to_string()),
            (ReportItemKind::End, "LoadData".to_string()),
            (ReportItemKind::Gap, "Gap".to_string()),
            (ReportItemKind::Start, "ConfirmDialog".to_string()),
            (ReportItemKind::End, "ConfirmDialog".to_string()),
            (ReportItemKind::End, "Run".to_string()),
        ]
    );

    let gap = output
        .items
        .iter()
        .find(|item| item.kind == ReportItemKind::Gap)
        .unwrap();
    assert_eq!(gap.duration_ms, Some(50));

    assert_eq!(
        output.summaries,
        vec![
            "Total duration: 300 ms",
            "Total gap duration: 50 ms",
            "User interaction duration: 100 ms",
            "Measured total: 250 ms",
            "Measured without user interaction: 150 ms",
            "Gap count: 1",
        ]
    );
}

#[test]
fn reporting_contract_requires_initialize_first() {
    let (runtime, _clock) = manual_runtime();
    let mut reporter = Reporter::new("strict", runtime.controller().clone());
    let err = reporter.start_reporting(runtime.stack()).unwrap_err();
    assert!(matches!(err, TrazaError::State(_)));
}

#[test]
fn cancellation_still_drains_the_current_batch() {
    let (runtime, clock) = manual_runtime();
    let monitor = runtime.class_monitor("Workflow");

    let root = monitor.start(MonitorConfig::method("Run"));
    let root_record = root.record().unwrap().clone();

    let (writer, output) = RecordingWriter::new();
    let mut reporter = Reporter::new("cancelled", runtime.controller().clone());
    reporter.add_output(writer, OutputParameters::new("/out"));
    reporter
        .initialize(runtime.controller().configuration(), &root_record)
        .unwrap();
    let guard = reporter.start_reporting(runtime.stack()).unwrap();

    let child = monitor.start(MonitorConfig::method("Partial"));
    clock.advance(Duration::milliseconds(10));
    drop(child);

    // The root never completes; releasing the guard mid-trace still drains.
    drop(guard);
    drop(root);

    let output = output.lock();
    assert!(output.closed);
    assert!(output
        .items
        .iter()
        .any(|item| item.kind == ReportItemKind::End && item.method_name == "Partial"));
    assert!(output.summaries.is_empty(), "no root end, no summary");
}

#[test]
fn late_events_after_guard_release_are_not_observed() {
    let (runtime, _clock) = manual_runtime();
    let monitor = runtime.class_monitor("Workflow");
    let root = monitor.start(MonitorConfig::method("Run"));
    let root_record = root.record().unwrap().clone();

    let (writer, output) = RecordingWriter::new();
    let mut reporter = Reporter::new("released", runtime.controller().clone());
    reporter.add_output(writer, OutputParameters::new("/out"));
    reporter
        .initialize(runtime.controller().configuration(), &root_record)
        .unwrap();
    let guard = reporter.start_reporting(runtime.stack()).unwrap();
    drop(guard);

    let child = monitor.start(MonitorConfig::method("Late"));
    drop(child);
    drop(root);

    let output = output.lock();
    assert!(output
        .items
        .iter()
        .all(|item| item.method_name != "Late"));
}
