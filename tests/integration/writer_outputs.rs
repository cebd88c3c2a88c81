#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use tempfile::tempdir;
use time::macros::datetime;
use time::Duration;
use traza::{
    CsvWriter, FileSystem as _, LimitOptions, ManualClock, MemoryFileSystem, MonitorConfig,
    MonitoringRuntime, OutputParameters, RanttWriter, Reporter, TxtWriter,
};

fn manual_runtime() -> (MonitoringRuntime, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00:00 UTC)));
    let runtime = MonitoringRuntime::with_clock(clock.clone());
    runtime.controller().enable();
    (runtime, clock)
}

/// Runs one small trace through a reporter wired to all three writers
/// against the real file system.
#[test]
fn full_trace_writes_csv_rantt_and_txt() {
    let dir = tempdir().unwrap();
    let (runtime, clock) = manual_runtime();
    let monitor = runtime.class_monitor("Orders");

    let root = monitor.start(MonitorConfig::method("ProcessBatch"));
    let root_record = root.record().unwrap().clone();

    let mut reporter = Reporter::new("orders", runtime.controller().clone());
    reporter.add_output(
        Box::new(CsvWriter::new()),
        OutputParameters::new(dir.path()),
    );
    reporter.add_output(
        Box::new(RanttWriter::new()),
        OutputParameters::new(dir.path()).base_file_name("orders-rantt"),
    );
    reporter.add_output(
        Box::new(TxtWriter::new()),
        OutputParameters::new(dir.path()).base_file_name("orders-log"),
    );
    reporter
        .initialize(runtime.controller().configuration(), &root_record)
        .unwrap();
    let guard = reporter.start_reporting(runtime.stack()).unwrap();

    for step in ["Validate", "Persist"] {
        let context = monitor.start(MonitorConfig::method(step).parameter("Step", step));
        clock.advance(Duration::milliseconds(20));
        drop(context);
    }
    clock.advance(Duration::milliseconds(5));
    drop(root);
    drop(guard);

    let base = dir.path().join("orders");
    let csv = std::fs::read_to_string(base.join("orders.csv")).unwrap();
    assert!(!csv.ends_with('\n'), "csv files never end with a newline");
    let header = csv.lines().next().unwrap();
    assert!(header.starts_with("Id,ParentId,MethodName,FullName,StartTime,EndTime,Duration"));
    assert!(header.contains("Step"));
    assert_eq!(csv.lines().count(), 4, "header + two children + root");
    assert!(csv.contains("Orders.Validate"));
    assert!(csv.contains("Orders.Persist"));

    let rantt = std::fs::read_to_string(base.join("orders-rantt.rprjx")).unwrap();
    assert!(rantt.contains("RanttVersion"));
    assert!(rantt.contains("Operations Source=\"orders-rantt.csv\""));
    assert!(rantt.contains("Relationships Source=\"orders-rantt.relationships.csv\""));

    let relationships =
        std::fs::read_to_string(base.join("orders-rantt.relationships.csv")).unwrap();
    let rel_rows: Vec<_> = relationships.lines().skip(1).collect();
    assert_eq!(rel_rows.len(), 2, "one relationship per non-root record");
    for row in rel_rows {
        assert!(row.ends_with(",Regular"));
    }

    let txt = std::fs::read_to_string(base.join("orders-log.txt")).unwrap();
    let starts: Vec<_> = txt
        .lines()
        .filter(|line| line.contains("Orders."))
        .collect();
    assert_eq!(starts.len(), 2, "one line per child start");
    assert!(txt.contains("Total duration: 45 ms"));
}

/// A txt writer limited to five items receives ten starts and keeps the
/// five most recent.
#[test]
fn txt_limit_keeps_five_most_recent_of_ten() {
    let (runtime, clock) = manual_runtime();
    let fs = Arc::new(MemoryFileSystem::new());
    let monitor = runtime.class_monitor("Jobs");

    let root = monitor.start(MonitorConfig::method("Run"));
    let root_record = root.record().unwrap().clone();

    let mut writer = TxtWriter::with_file_system(fs.clone());
    use traza::ReportWriter as _;
    writer.set_limit_options(LimitOptions::max_items(5));
    let mut reporter = Reporter::new("jobs", runtime.controller().clone());
    reporter.add_output(Box::new(writer), OutputParameters::new("/out"));
    reporter
        .initialize(runtime.controller().configuration(), &root_record)
        .unwrap();
    let guard = reporter.start_reporting(runtime.stack()).unwrap();

    for i in 1..=10 {
        let context = monitor.start(MonitorConfig::method(format!("Step{i}")));
        clock.advance(Duration::milliseconds(1));
        drop(context);
    }
    drop(guard);
    drop(root);

    let text = fs
        .read_to_string(Path::new("/out/jobs/jobs.txt"))
        .unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 5);
    for (line, step) in lines.iter().zip(6..=10) {
        assert!(
            line.ends_with(&format!("Jobs.Step{step}")),
            "expected Step{step} in {line}"
        );
    }
}

#[test]
fn archive_rotates_previous_run_outputs() {
    let (runtime, clock) = manual_runtime();
    let fs = Arc::new(MemoryFileSystem::new());

    for run in 0..2 {
        let monitor = runtime.class_monitor("Nightly");
        let root = monitor.start(MonitorConfig::method("Sync"));
        let root_record = root.record().unwrap().clone();

        let mut reporter = Reporter::new("nightly", runtime.controller().clone());
        reporter.add_output(
            Box::new(CsvWriter::with_file_system(fs.clone())),
            OutputParameters::new("/out").archive(true),
        );
        reporter
            .initialize(runtime.controller().configuration(), &root_record)
            .unwrap();
        let guard = reporter.start_reporting(runtime.stack()).unwrap();
        clock.advance(Duration::milliseconds(10 + run));
        drop(root);
        drop(guard);
    }

    assert!(fs.file_exists(Path::new("/out/nightly/nightly.csv")));
    let archived = fs
        .read_to_string(Path::new("/out/nightly/nightly.csv"))
        .unwrap();
    assert!(archived.contains("Nightly.Sync"));
    assert!(
        fs.directory_exists(Path::new("/out/nightly/archive")),
        "second run archived the first run's outputs"
    );
}

#[test]
fn limit_options_roundtrip_through_the_trait() {
    use traza::ReportWriter as _;
    let mut writer = CsvWriter::with_file_system(Arc::new(MemoryFileSystem::new()));
    assert_eq!(writer.get_limit_options(), LimitOptions::default());
    writer.set_limit_options(LimitOptions::max_items(7));
    assert_eq!(writer.get_limit_options().max_items, Some(7));
}
