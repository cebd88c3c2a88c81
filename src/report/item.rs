use indexmap::IndexMap;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::record::{CallStackItem, GAP_METHOD_NAME};

/// What lifecycle event a [`ReportItem`] was projected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportItemKind {
    Start,
    End,
    Exception,
    Gap,
}

/// Flattened projection of a call record for file output.
#[derive(Debug, Clone)]
pub struct ReportItem {
    pub kind: ReportItemKind,
    pub id: String,
    pub parent_id: String,
    pub method_name: String,
    pub full_name: String,
    pub level: u32,
    pub start_time: OffsetDateTime,
    pub end_time: Option<OffsetDateTime>,
    pub duration_ms: Option<i64>,
    pub is_static: bool,
    pub is_extension: bool,
    pub is_generic: bool,
    pub parameters: IndexMap<String, String>,
    /// Names of the static (attribute-sourced) parameters; only these are
    /// eligible for override.
    pub attribute_parameters: Vec<String>,
}

impl ReportItem {
    /// Projects a lifecycle event into a row. `Empty` carries no record and
    /// projects to `None`.
    pub fn from_stack_item(item: &CallStackItem) -> Option<Self> {
        let kind = match item {
            CallStackItem::Start(_) => ReportItemKind::Start,
            CallStackItem::End(_) => ReportItemKind::End,
            CallStackItem::Exception(_) => ReportItemKind::Exception,
            CallStackItem::Gap(_) => ReportItemKind::Gap,
            CallStackItem::Empty => return None,
        };
        let record = item.record()?;
        Some(Self {
            kind,
            id: record.id().to_string(),
            parent_id: record
                .parent_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            method_name: record.method_name().to_string(),
            full_name: record.full_name(),
            level: record.level(),
            start_time: record.start_time(),
            end_time: record.end_time(),
            duration_ms: record.elapsed().map(|e| e.whole_milliseconds() as i64),
            is_static: record.is_static(),
            is_extension: record.is_extension(),
            is_generic: record.is_generic(),
            parameters: record.parameters(),
            attribute_parameters: record.attribute_parameters(),
        })
    }

    pub fn is_gap(&self) -> bool {
        self.kind == ReportItemKind::Gap || self.method_name == GAP_METHOD_NAME
    }

    /// ISO-8601 rendering of the start time.
    pub fn start_time_iso(&self) -> String {
        format_iso(self.start_time)
    }

    pub fn end_time_iso(&self) -> String {
        self.end_time.map(format_iso).unwrap_or_default()
    }

    pub fn duration_field(&self) -> String {
        self.duration_ms
            .map(|ms| ms.to_string())
            .unwrap_or_default()
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn is_attribute_parameter(&self, name: &str) -> bool {
        self.attribute_parameters
            .iter()
            .any(|p| p.eq_ignore_ascii_case(name))
    }
}

fn format_iso(moment: OffsetDateTime) -> String {
    moment
        .format(&Rfc3339)
        .unwrap_or_else(|_| moment.to_string())
}
