//! Report output engine: tabular writers, the static-parameter override
//! table, and output archiving.

mod archive;
mod csv_writer;
mod item;
mod overrides;
mod rantt;
mod txt;

pub use archive::Archiver;
pub use csv_writer::CsvWriter;
pub use item::{ReportItem, ReportItemKind};
pub use overrides::MethodOverrideManager;
pub use rantt::RanttWriter;
pub use txt::TxtWriter;

use std::path::PathBuf;

use crate::error::{Result, TrazaError};

/// File name of the optional override input read at initialization.
pub const OVERRIDES_FILE_NAME: &str = "method_overrides.csv";
/// File name of the override template rewritten on completion.
pub const TEMPLATE_FILE_NAME: &str = "method_overrides.template";

/// Writer configuration supplied via `Reporter::add_output`.
#[derive(Debug, Clone)]
pub struct OutputParameters {
    pub output_directory: PathBuf,
    /// Base name for output files; defaults to the reporter name.
    pub base_file_name: Option<String>,
    pub display_name: Option<String>,
    /// Rotate prior-run outputs into `archive/<timestamp>/` on initialize.
    pub archive: bool,
}

impl OutputParameters {
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            output_directory: output_directory.into(),
            base_file_name: None,
            display_name: None,
            archive: false,
        }
    }

    pub fn base_file_name(mut self, name: impl Into<String>) -> Self {
        self.base_file_name = Some(name.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn archive(mut self, enabled: bool) -> Self {
        self.archive = enabled;
        self
    }
}

/// Row-retention limit. When `max_items` is set a writer keeps the most
/// recent `max_items` data rows and drops older ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitOptions {
    pub max_items: Option<usize>,
}

impl LimitOptions {
    pub fn max_items(count: usize) -> Self {
        Self {
            max_items: Some(count),
        }
    }
}

/// Reporter identity handed to writers at initialization.
#[derive(Debug, Clone)]
pub struct ReporterMeta {
    pub name: String,
    pub full_name: String,
    pub id: String,
    pub root_method: Option<String>,
}

/// Common contract for every report writer.
///
/// `initialize` opens the output target, creating directories as needed;
/// `close` flushes and surfaces any I/O failure. Per-item writes never
/// fail: rows are buffered and serialized on close, which is also what
/// keeps columns stable within a file and makes the most-recent-N limit
/// deterministic.
pub trait ReportWriter: Send {
    fn set_parameters(&mut self, params: OutputParameters);
    fn set_limit_options(&mut self, limit: LimitOptions);
    fn get_limit_options(&self) -> LimitOptions;
    fn initialize(&mut self, reporter: &ReporterMeta) -> Result<()>;
    fn write_item(&mut self, item: &ReportItem);
    fn write_summary(&mut self, message: &str);
    fn write_error(&mut self, error: &TrazaError);
    fn close(&mut self) -> Result<()>;
}

/// Serializes `header` + `rows` in the engine's CSV dialect: UTF-8, comma
/// separator, doubled-quote escaping, `\n` terminators, and no trailing
/// newline.
pub(crate) fn csv_bytes<R, F>(header: &[String], rows: R) -> Result<Vec<u8>>
where
    R: IntoIterator<Item = F>,
    F: IntoIterator<Item = String>,
{
    let mut writer = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    let mut bytes = writer
        .into_inner()
        .map_err(|err| TrazaError::State(format!("csv buffer: {err}")))?;
    while bytes.last() == Some(&b'\n') {
        bytes.pop();
    }
    Ok(bytes)
}

/// Case-insensitive column union preserving first-observed casing and
/// first-observed order.
pub(crate) fn merge_columns(into: &mut Vec<String>, candidates: &[String]) {
    for candidate in candidates {
        if !into.iter().any(|c| c.eq_ignore_ascii_case(candidate)) {
            into.push(candidate.clone());
        }
    }
}
