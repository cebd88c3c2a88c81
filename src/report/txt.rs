use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TrazaError};
use crate::fs::{default_file_system, FileSystem};
use crate::report::{
    Archiver, LimitOptions, OutputParameters, ReportItem, ReportItemKind, ReportWriter,
    ReporterMeta,
};

/// Plain-text writer: one human-readable line per call start, in arrival
/// order, followed by any summary lines.
pub struct TxtWriter {
    fs: Arc<dyn FileSystem>,
    params: Option<OutputParameters>,
    limit: LimitOptions,
    lines: VecDeque<String>,
    summaries: Vec<String>,
    directory: Option<PathBuf>,
    base_name: Option<String>,
    closed: bool,
}

impl TxtWriter {
    pub fn new() -> Self {
        Self::with_file_system(default_file_system())
    }

    pub fn with_file_system(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            params: None,
            limit: LimitOptions::default(),
            lines: VecDeque::new(),
            summaries: Vec::new(),
            directory: None,
            base_name: None,
            closed: false,
        }
    }

    fn retain_within_limit(&mut self) {
        if let Some(max) = self.limit.max_items {
            while self.lines.len() > max {
                self.lines.pop_front();
            }
        }
    }

    fn render(item: &ReportItem) -> String {
        let mut line = format!("{} {}", item.start_time_iso(), item.full_name);
        if !item.parameters.is_empty() {
            let params: Vec<String> = item
                .parameters
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            line.push_str(" | ");
            line.push_str(&params.join(" "));
        }
        line
    }
}

impl Default for TxtWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportWriter for TxtWriter {
    fn set_parameters(&mut self, params: OutputParameters) {
        self.params = Some(params);
    }

    fn set_limit_options(&mut self, limit: LimitOptions) {
        self.limit = limit;
        self.retain_within_limit();
    }

    fn get_limit_options(&self) -> LimitOptions {
        self.limit
    }

    fn initialize(&mut self, reporter: &ReporterMeta) -> Result<()> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| TrazaError::State("txt writer initialized without parameters".into()))?;
        let directory = params.output_directory.join(&reporter.name);
        self.fs.create_dir_all(&directory)?;
        if params.archive {
            Archiver::new(Arc::clone(&self.fs)).archive_previous_run(&directory)?;
        }
        self.base_name = Some(
            params
                .base_file_name
                .clone()
                .unwrap_or_else(|| reporter.name.clone()),
        );
        self.directory = Some(directory);
        Ok(())
    }

    fn write_item(&mut self, item: &ReportItem) {
        if self.closed || self.directory.is_none() {
            debug!("txt item dropped: writer not open");
            return;
        }
        if item.kind != ReportItemKind::Start {
            return;
        }
        self.lines.push_back(Self::render(item));
        self.retain_within_limit();
    }

    fn write_summary(&mut self, message: &str) {
        if self.closed {
            return;
        }
        self.summaries.push(message.to_string());
    }

    fn write_error(&mut self, error: &TrazaError) {
        if self.closed {
            return;
        }
        self.summaries.push(format!("ERROR: {error}"));
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let (Some(directory), Some(base_name)) = (self.directory.clone(), self.base_name.clone())
        else {
            self.closed = true;
            return Ok(());
        };
        self.closed = true;
        let mut lines: Vec<String> = self.lines.drain(..).collect();
        lines.extend(self.summaries.drain(..));
        let text = lines.join("\n");
        self.fs
            .write(&directory.join(format!("{base_name}.txt")), text.as_bytes())
    }
}
