//! Pluggable file-system abstraction used by the report writers.

mod mem;

pub use mem::MemoryFileSystem;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TrazaError};

/// The subset of file-system operations the report output engine needs.
///
/// Production code uses [`StdFileSystem`]; tests usually swap in
/// [`MemoryFileSystem`].
pub trait FileSystem: Send + Sync + 'static {
    fn create_dir_all(&self, path: &Path) -> Result<()>;
    /// Creates or truncates `path` with `contents`.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|err| {
            TrazaError::InvalidArgument(format!("{}: not UTF-8: {err}", path.display()))
        })
    }
    fn file_exists(&self, path: &Path) -> bool;
    fn directory_exists(&self, path: &Path) -> bool;
    /// Files directly inside `dir`, sorted by path. An absent directory
    /// lists as empty.
    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    fn delete_file(&self, path: &Path) -> Result<()>;
}

pub fn default_file_system() -> Arc<dyn FileSystem> {
    Arc::new(StdFileSystem)
}

/// Real file system via `std::fs`. Permission failures surface as
/// [`TrazaError::Unauthorized`].
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|err| TrazaError::from_io(err, &path.to_string_lossy()))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).map_err(|err| TrazaError::from_io(err, &path.to_string_lossy()))
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|err| TrazaError::from_io(err, &path.to_string_lossy()))
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let entries =
            fs::read_dir(dir).map_err(|err| TrazaError::from_io(err, &dir.to_string_lossy()))?;
        for entry in entries {
            let entry = entry.map_err(|err| TrazaError::from_io(err, &dir.to_string_lossy()))?;
            if entry.path().is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|err| TrazaError::from_io(err, &from.to_string_lossy()))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|err| TrazaError::from_io(err, &path.to_string_lossy()))
    }
}
