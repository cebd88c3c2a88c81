use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TrazaError};
use crate::fs::{default_file_system, FileSystem};
use crate::report::{
    csv_bytes, merge_columns, Archiver, LimitOptions, MethodOverrideManager, OutputParameters,
    ReportItem, ReportItemKind, ReportWriter, ReporterMeta,
};

pub(crate) const FIXED_COLUMNS: [&str; 7] = [
    "Id",
    "ParentId",
    "MethodName",
    "FullName",
    "StartTime",
    "EndTime",
    "Duration",
];

/// Writes one CSV of completed calls per reporter.
///
/// The header is the union of the fixed columns and every custom parameter
/// key observed in the run, deduplicated case-insensitively; columns are
/// stable within a file because rows buffer until close. Summary lines go
/// to a sibling `.summary.txt`.
pub struct CsvWriter {
    fs: Arc<dyn FileSystem>,
    params: Option<OutputParameters>,
    limit: LimitOptions,
    rows: VecDeque<ReportItem>,
    summaries: Vec<String>,
    overrides: Option<MethodOverrideManager>,
    directory: Option<PathBuf>,
    base_name: Option<String>,
    closed: bool,
}

impl CsvWriter {
    pub fn new() -> Self {
        Self::with_file_system(default_file_system())
    }

    pub fn with_file_system(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            params: None,
            limit: LimitOptions::default(),
            rows: VecDeque::new(),
            summaries: Vec::new(),
            overrides: None,
            directory: None,
            base_name: None,
            closed: false,
        }
    }

    fn retain_within_limit(&mut self) {
        if let Some(max) = self.limit.max_items {
            while self.rows.len() > max {
                self.rows.pop_front();
            }
        }
    }
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportWriter for CsvWriter {
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
            .ok_or_else(|| TrazaError::State("csv writer initialized without parameters".into()))?;
        let directory = params.output_directory.join(&reporter.name);
        self.fs.create_dir_all(&directory)?;
        if params.archive {
            Archiver::new(Arc::clone(&self.fs)).archive_previous_run(&directory)?;
        }
        self.overrides = Some(MethodOverrideManager::load(
            Arc::clone(&self.fs),
            &directory,
        )?);
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
            debug!("csv item dropped: writer not open");
            return;
        }
        if !matches!(
            item.kind,
            ReportItemKind::End | ReportItemKind::Exception | ReportItemKind::Gap
        ) {
            return;
        }
        self.rows.push_back(item.clone());
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

        let mut manager = self.overrides.take();
        let mut columns: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut final_rows = Vec::with_capacity(self.rows.len());
        for item in self.rows.drain(..) {
            if let Some(manager) = manager.as_mut() {
                manager.observe(&item);
            }
            let mut item = item;
            if let Some(manager) = manager.as_ref() {
                manager.apply(&mut item);
            }
            let keys: Vec<String> = item.parameters.keys().cloned().collect();
            merge_columns(&mut columns, &keys);
            final_rows.push(item);
        }

        let rows = final_rows.iter().map(|item| {
            columns
                .iter()
                .map(|column| match column.as_str() {
                    "Id" => item.id.clone(),
                    "ParentId" => item.parent_id.clone(),
                    "MethodName" => item.method_name.clone(),
                    "FullName" => item.full_name.clone(),
                    "StartTime" => item.start_time_iso(),
                    "EndTime" => item.end_time_iso(),
                    "Duration" => item.duration_field(),
                    custom => item
                        .parameters
                        .iter()
                        .find(|(key, _)| key.eq_ignore_ascii_case(custom))
                        .map(|(_, value)| value.clone())
                        .unwrap_or_default(),
                })
                .collect::<Vec<_>>()
        });
        let bytes = csv_bytes(&columns, rows)?;
        self.fs
            .write(&directory.join(format!("{base_name}.csv")), &bytes)?;

        if !self.summaries.is_empty() {
            let text = self.summaries.join("\n");
            self.fs.write(
                &directory.join(format!("{base_name}.summary.txt")),
                text.as_bytes(),
            )?;
        }
        if let Some(manager) = manager.as_ref() {
            manager.save_template()?;
        }
        Ok(())
    }
}
