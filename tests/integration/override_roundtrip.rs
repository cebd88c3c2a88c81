#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use time::macros::datetime;
use time::Duration;
use traza::{
    CsvWriter, FileSystem as _, ManualClock, MemoryFileSystem, MonitorConfig, MonitoringRuntime,
    OutputParameters, Reporter,
};

fn manual_runtime() -> (MonitoringRuntime, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 00:00:00 UTC)));
    let runtime = MonitoringRuntime::with_clock(clock.clone());
    runtime.controller().enable();
    (runtime, clock)
}

fn run_trace(fs: Arc<MemoryFileSystem>) {
    let (runtime, clock) = manual_runtime();
    let monitor = runtime.class_monitor("A.B");

    let root = monitor.start(
        MonitorConfig::method("M")
            .attribute_parameter("CustomCol", "Original")
            .parameter("Dynamic", "kept"),
    );
    let root_record = root.record().unwrap().clone();

    let mut reporter = Reporter::new("methods", runtime.controller().clone());
    reporter.add_output(
        Box::new(CsvWriter::with_file_system(fs)),
        OutputParameters::new("/out"),
    );
    reporter
        .initialize(runtime.controller().configuration(), &root_record)
        .unwrap();
    let guard = reporter.start_reporting(runtime.stack()).unwrap();
    clock.advance(Duration::milliseconds(30));
    drop(root);
    drop(guard);
}

/// An override row for `A.B.M` replaces the static `CustomCol` value in
/// the output CSV.
#[test]
fn override_replaces_static_column_in_output() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.write(
        Path::new("/out/methods/method_overrides.csv"),
        b"FullName,CustomCol\nA.B.M,Override",
    )
    .unwrap();

    run_trace(fs.clone());

    let csv = fs
        .read_to_string(Path::new("/out/methods/methods.csv"))
        .unwrap();
    let header: Vec<_> = csv.lines().next().unwrap().split(',').collect();
    let row: Vec<_> = csv.lines().nth(1).unwrap().split(',').collect();
    let col = |name: &str| {
        header
            .iter()
            .position(|h| *h == name)
            .unwrap_or_else(|| panic!("column {name} missing"))
    };
    assert_eq!(row[col("FullName")], "A.B.M");
    assert_eq!(row[col("CustomCol")], "Override");
    assert_eq!(row[col("Dynamic")], "kept", "dynamic parameters never change");
}

#[test]
fn without_override_file_the_original_value_is_written() {
    let fs = Arc::new(MemoryFileSystem::new());
    run_trace(fs.clone());
    let csv = fs
        .read_to_string(Path::new("/out/methods/methods.csv"))
        .unwrap();
    assert!(csv.contains("Original"));
}

/// The rewritten template lists every observed `(FullName, static
/// columns…)` tuple, and saving the same record set twice is byte-stable.
#[test]
fn template_is_rewritten_and_idempotent() {
    let first_fs = Arc::new(MemoryFileSystem::new());
    run_trace(first_fs.clone());
    let first = first_fs
        .read(Path::new("/out/methods/method_overrides.template"))
        .unwrap();
    assert_eq!(
        String::from_utf8(first.clone()).unwrap(),
        "FullName,CustomCol\nA.B.M,Original"
    );

    let second_fs = Arc::new(MemoryFileSystem::new());
    run_trace(second_fs.clone());
    let second = second_fs
        .read(Path::new("/out/methods/method_overrides.template"))
        .unwrap();
    assert_eq!(first, second);
}

/// Overrides apply to the CSV rows but the template keeps the observed
/// (pre-override) values, so reruns stay stable.
#[test]
fn template_keeps_observed_values_under_overrides() {
    let fs = Arc::new(MemoryFileSystem::new());
    fs.write(
        Path::new("/out/methods/method_overrides.csv"),
        b"FullName,CustomCol\nA.B.M,Override",
    )
    .unwrap();
    run_trace(fs.clone());
    let template = fs
        .read_to_string(Path::new("/out/methods/method_overrides.template"))
        .unwrap();
    assert_eq!(template, "FullName,CustomCol\nA.B.M,Original");
}
