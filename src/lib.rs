//! # Traza - In-Process Method-Call Instrumentation
//!
//! Traza wraps blocks of code in scoped measurement contexts, reconstructs
//! parent/child call relationships across threads and asynchronous
//! continuations, gates tracking through a versioned controller, and
//! renders the resulting event stream to tabular reports.
//!
//! ## Quick Start
//!
//! ```rust
//! use traza::{MonitorConfig, MonitoringRuntime};
//!
//! let runtime = MonitoringRuntime::new();
//! runtime.controller().enable();
//!
//! let monitor = runtime.class_monitor("Orders");
//! let context = monitor.start(MonitorConfig::method("Load"));
//! context.set_parameter("Rows", "42");
//! drop(context); // records the elapsed time and drains the stack
//!
//! assert!(runtime.stack().is_empty());
//! ```
//!
//! ## Features
//!
//! - **Cross-Thread Parentage**: children started on other threads link to
//!   the nearest active root
//! - **Versioned Gating**: global, per-reporter, and per-filter flags with
//!   pinned operation scopes
//! - **Reporter Pipeline**: filtering, batching, gap detection, and a
//!   completion summary
//! - **Tabular Outputs**: CSV, Rantt projects, and plain text, with a
//!   static-parameter override table
//! - **Pluggable File System**: swap the real disk for an in-memory
//!   implementation in tests
//!
//! ## Architecture
//!
//! Traza is layered bottom-up:
//! - **Records**: pooled call records and the lifecycle item stream
//! - **Controller**: monotonic versions, flags, and change broadcast
//! - **Call Stack**: per-thread stacks with observer fan-out
//! - **Reporters & Writers**: stream consumers and file output

pub mod clock;
pub mod context;
pub mod controller;
pub mod error;
pub mod fs;
pub mod logging;
pub mod record;
pub mod report;
pub mod reporter;
pub mod runtime;
pub mod stack;

// Re-export the main public API
pub use crate::clock::{CallId, CallIdSource, Clock, ManualClock, SystemClock};
pub use crate::context::{ClassMonitor, MethodCallContext, MonitorConfig};
pub use crate::controller::{
    ComponentId, ComponentKind, MonitoringConfiguration, MonitoringController, MonitoringVersion,
    OperationScope, StateChange, VersionedContext,
};
pub use crate::error::{Result, TrazaError};
pub use crate::fs::{FileSystem, MemoryFileSystem, StdFileSystem};
pub use crate::record::{
    CallRecord, CallRecordPool, CallStackItem, MethodSpec, RecordKind, GAP_METHOD_NAME,
};
pub use crate::report::{
    Archiver, CsvWriter, LimitOptions, MethodOverrideManager, OutputParameters, RanttWriter,
    ReportItem, ReportItemKind, ReportWriter, ReporterMeta, TxtWriter,
};
pub use crate::reporter::{
    CallStackFilter, MethodNameFilter, MinDurationFilter, Reporter, ReportingGuard, BATCH_SIZE,
};
pub use crate::runtime::MonitoringRuntime;
pub use crate::stack::{
    current_thread_id, CallStack, CallStackObserver, SubscriptionGuard, MAX_CALL_STACK_DEPTH,
};
