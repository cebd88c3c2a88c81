use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fs::FileSystem;
use crate::report::{csv_bytes, ReportItem, OVERRIDES_FILE_NAME, TEMPLATE_FILE_NAME};

/// Applies the per-directory static-parameter override table and rewrites
/// the observation template.
///
/// `method_overrides.csv` rows are keyed by `FullName`; the remaining
/// columns replace the values of matching static parameters before a row
/// is written. Dynamic parameters are never touched. On completion,
/// `method_overrides.template` is rewritten with every `(FullName, static
/// columns…)` tuple observed during the run, case-insensitively
/// deduplicated and sorted, so identical runs produce byte-identical
/// templates. Gap records never enter the template.
pub struct MethodOverrideManager {
    fs: Arc<dyn FileSystem>,
    directory: PathBuf,
    /// Keyed by case-folded full name; values are `column -> override`.
    overrides: FxHashMap<String, Vec<(String, String)>>,
    /// Case-folded full name -> (display full name, column -> (display
    /// column, value)). BTreeMaps keep template output deterministic.
    observed: BTreeMap<String, ObservedMethod>,
}

struct ObservedMethod {
    full_name: String,
    columns: BTreeMap<String, (String, String)>,
}

impl MethodOverrideManager {
    /// Loads `method_overrides.csv` from `directory` if present. A missing
    /// file means no overrides; a malformed file is reported and skipped.
    pub fn load(fs: Arc<dyn FileSystem>, directory: &Path) -> Result<Self> {
        let mut manager = Self {
            fs,
            directory: directory.to_path_buf(),
            overrides: FxHashMap::default(),
            observed: BTreeMap::new(),
        };
        let path = directory.join(OVERRIDES_FILE_NAME);
        if !manager.fs.file_exists(&path) {
            return Ok(manager);
        }
        let contents = manager.fs.read_to_string(&path)?;
        match parse_overrides(&contents) {
            Ok(overrides) => {
                debug!(
                    path = %path.display(),
                    methods = overrides.len(),
                    "override table loaded"
                );
                manager.overrides = overrides;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "override table ignored");
            }
        }
        Ok(manager)
    }

    /// Replaces the values of matching static parameters on `item`.
    pub fn apply(&self, item: &mut ReportItem) {
        let Some(columns) = self.overrides.get(&item.full_name.to_ascii_lowercase()) else {
            return;
        };
        for (column, value) in columns {
            if !item.is_attribute_parameter(column) {
                continue;
            }
            match item
                .parameters
                .keys()
                .find(|key| key.eq_ignore_ascii_case(column))
                .cloned()
            {
                Some(key) => {
                    item.parameters.insert(key, value.clone());
                }
                None => {
                    item.parameters.insert(column.clone(), value.clone());
                }
            }
        }
    }

    /// Records the static columns of `item` for the template. Gap records
    /// are excluded.
    pub fn observe(&mut self, item: &ReportItem) {
        if item.is_gap() {
            return;
        }
        if item.attribute_parameters.is_empty() {
            return;
        }
        let key = item.full_name.to_ascii_lowercase();
        let entry = self.observed.entry(key).or_insert_with(|| ObservedMethod {
            full_name: item.full_name.clone(),
            columns: BTreeMap::new(),
        });
        for name in &item.attribute_parameters {
            let value = item.parameter(name).unwrap_or_default().to_string();
            entry
                .columns
                .entry(name.to_ascii_lowercase())
                .or_insert((name.clone(), value));
        }
    }

    /// Rewrites `method_overrides.template` from the observations.
    pub fn save_template(&self) -> Result<()> {
        let mut columns: BTreeMap<String, String> = BTreeMap::new();
        for method in self.observed.values() {
            for (folded, (display, _)) in &method.columns {
                columns
                    .entry(folded.clone())
                    .or_insert_with(|| display.clone());
            }
        }
        let mut header = vec!["FullName".to_string()];
        header.extend(columns.values().cloned());

        let rows = self.observed.values().map(|method| {
            let mut row = vec![method.full_name.clone()];
            for folded in columns.keys() {
                row.push(
                    method
                        .columns
                        .get(folded)
                        .map(|(_, value)| value.clone())
                        .unwrap_or_default(),
                );
            }
            row
        });
        let bytes = csv_bytes(&header, rows)?;
        self.fs
            .write(&self.directory.join(TEMPLATE_FILE_NAME), &bytes)
    }

    #[cfg(test)]
    fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

/// Parses the override CSV: header must contain `FullName`; every other
/// column is a static parameter name.
fn parse_overrides(contents: &str) -> Result<FxHashMap<String, Vec<(String, String)>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(contents.as_bytes());
    let headers = reader.headers()?.clone();
    let full_name_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("FullName"))
        .ok_or_else(|| {
            crate::error::TrazaError::InvalidArgument(
                "override file header must contain FullName".into(),
            )
        })?;
    let mut overrides: FxHashMap<String, Vec<(String, String)>> = FxHashMap::default();
    for record in reader.records() {
        let record = record?;
        let Some(full_name) = record.get(full_name_idx) else {
            continue;
        };
        if full_name.is_empty() {
            continue;
        }
        let mut columns = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == full_name_idx {
                continue;
            }
            if let Some(value) = record.get(idx) {
                if !value.is_empty() {
                    columns.push((header.to_string(), value.to_string()));
                }
            }
        }
        overrides.insert(full_name.to_ascii_lowercase(), columns);
    }
    Ok(overrides)
}
