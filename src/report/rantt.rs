use std::collections::VecDeque;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer as XmlWriter;
use tracing::debug;

use crate::error::{Result, TrazaError};
use crate::fs::{default_file_system, FileSystem};
use crate::report::csv_writer::FIXED_COLUMNS;
use crate::report::{
    csv_bytes, merge_columns, Archiver, LimitOptions, MethodOverrideManager, OutputParameters,
    ReportItem, ReportItemKind, ReportWriter, ReporterMeta,
};

const RANTT_VERSION: &str = "2.0";

/// Writes a Rantt project: a `.rprjx` descriptor plus an operations CSV and
/// a relationships CSV.
///
/// Relationship rows cover every non-root record as
/// `ChildId,ParentId,RelationshipKind`, the kind chosen by inspecting the
/// `IsStatic` / `IsExtension` / `IsGeneric` parameters in that priority
/// order.
pub struct RanttWriter {
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

impl RanttWriter {
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

    fn project_descriptor(operations: &str, relationships: &str) -> Result<Vec<u8>> {
        let mut xml = XmlWriter::new_with_indent(Vec::new(), b' ', 2);
        xml.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_error)?;
        let mut project = BytesStart::new("Project");
        project.push_attribute(("RanttVersion", RANTT_VERSION));
        xml.write_event(Event::Start(project)).map_err(xml_error)?;
        xml.write_event(Event::Start(BytesStart::new("DataSets")))
            .map_err(xml_error)?;
        let mut ops = BytesStart::new("Operations");
        ops.push_attribute(("Source", operations));
        xml.write_event(Event::Empty(ops)).map_err(xml_error)?;
        let mut rels = BytesStart::new("Relationships");
        rels.push_attribute(("Source", relationships));
        xml.write_event(Event::Empty(rels)).map_err(xml_error)?;
        xml.write_event(Event::End(BytesEnd::new("DataSets")))
            .map_err(xml_error)?;
        xml.write_event(Event::End(BytesEnd::new("Project")))
            .map_err(xml_error)?;
        Ok(xml.into_inner())
    }
}

impl Default for RanttWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn xml_error(err: impl Display) -> TrazaError {
    TrazaError::State(format!("rantt project xml: {err}"))
}

/// Relationship kind by parameter inspection, `IsStatic` first, then
/// `IsExtension`, then `IsGeneric`. The record's structural flags back the
/// parameters up when the parameter is absent.
fn relationship_kind(item: &ReportItem) -> &'static str {
    let flag = |name: &str, structural: bool| {
        item.parameters
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.eq_ignore_ascii_case("true"))
            .unwrap_or(structural)
    };
    if flag("IsStatic", item.is_static) {
        "Static"
    } else if flag("IsExtension", item.is_extension) {
        "Extension"
    } else if flag("IsGeneric", item.is_generic) {
        "Generic"
    } else {
        "Regular"
    }
}

impl ReportWriter for RanttWriter {
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
        let params = self.params.clone().ok_or_else(|| {
            TrazaError::State("rantt writer initialized without parameters".into())
        })?;
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
            debug!("rantt item dropped: writer not open");
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

        let operations_file = format!("{base_name}.csv");
        let relationships_file = format!("{base_name}.relationships.csv");

        let operation_rows = final_rows.iter().map(|item| {
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
        let bytes = csv_bytes(&columns, operation_rows)?;
        self.fs.write(&directory.join(&operations_file), &bytes)?;

        let relationship_header: Vec<String> = ["ChildId", "ParentId", "RelationshipKind"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let relationship_rows = final_rows
            .iter()
            .filter(|item| !item.parent_id.is_empty())
            .map(|item| {
                vec![
                    item.id.clone(),
                    item.parent_id.clone(),
                    relationship_kind(item).to_string(),
                ]
            });
        let bytes = csv_bytes(&relationship_header, relationship_rows)?;
        self.fs
            .write(&directory.join(&relationships_file), &bytes)?;

        let descriptor = Self::project_descriptor(&operations_file, &relationships_file)?;
        self.fs
            .write(&directory.join(format!("{base_name}.rprjx")), &descriptor)?;

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
