use std::path::Path;
use std::sync::Arc;

use time::format_description::FormatItem;
use time::macros::format_description;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::fs::FileSystem;
use crate::report::OVERRIDES_FILE_NAME;

const ARCHIVE_DIR_NAME: &str = "archive";
const STAMP_FMT: &[FormatItem<'static>] =
    format_description!("[year][month][day]-[hour][minute][second]");

/// Rotates a reporter's prior-run output files into `archive/<timestamp>/`
/// before fresh outputs are opened.
///
/// The override input file stays in place: it is user configuration, not
/// run output. Files that fail to move are left behind with a warning so
/// one stuck file never blocks a run.
pub struct Archiver {
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
}

impl Archiver {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_clock(fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>) -> Self {
        Self { fs, clock }
    }

    /// Moves every file directly inside `directory` (except the override
    /// input) into a timestamped archive subdirectory. A directory with no
    /// prior outputs is left untouched.
    pub fn archive_previous_run(&self, directory: &Path) -> Result<()> {
        let files = self.fs.list_files(directory)?;
        let movable: Vec<_> = files
            .into_iter()
            .filter(|file| {
                file.file_name()
                    .map(|name| name != OVERRIDES_FILE_NAME)
                    .unwrap_or(false)
            })
            .collect();
        if movable.is_empty() {
            return Ok(());
        }
        let stamp = self
            .clock
            .now()
            .format(STAMP_FMT)
            .unwrap_or_else(|_| "unknown".to_string());
        let target = directory.join(ARCHIVE_DIR_NAME).join(stamp);
        self.fs.create_dir_all(&target)?;
        for file in movable {
            let Some(name) = file.file_name() else { continue };
            let destination = target.join(name);
            match self.fs.rename(&file, &destination) {
                Ok(()) => debug!(from = %file.display(), to = %destination.display(), "archived"),
                Err(err) => {
                    warn!(file = %file.display(), error = %err, "archive skipped a file");
                }
            }
        }
        Ok(())
    }
}
