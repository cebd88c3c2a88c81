use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, TrazaError};
use crate::fs::FileSystem;

#[derive(Default)]
struct MemState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    dirs: BTreeSet<PathBuf>,
    read_only: BTreeSet<PathBuf>,
}

/// In-memory [`FileSystem`] for tests.
///
/// Writing a file makes every ancestor of its path count as an existing
/// directory, so `write("/a/b/f.txt")` implies `directory_exists("/a/b")`.
/// Roots marked read-only reject writes with
/// [`TrazaError::Unauthorized`].
#[derive(Default)]
pub struct MemoryFileSystem {
    state: Mutex<MemState>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every path under `root` reject writes.
    pub fn set_read_only(&self, root: impl Into<PathBuf>) {
        self.state.lock().read_only.insert(root.into());
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    fn check_writable(state: &MemState, path: &Path) -> Result<()> {
        for root in &state.read_only {
            if path.starts_with(root) {
                return Err(TrazaError::Unauthorized(format!(
                    "{} is read-only",
                    root.display()
                )));
            }
        }
        Ok(())
    }
}

impl FileSystem for MemoryFileSystem {
    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, path)?;
        let mut current = PathBuf::new();
        for part in path.components() {
            current.push(part);
            state.dirs.insert(current.clone());
        }
        Ok(())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, path)?;
        state.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        self.state.lock().files.get(path).cloned().ok_or_else(|| {
            TrazaError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.state.lock().files.contains_key(path)
    }

    fn directory_exists(&self, path: &Path) -> bool {
        let state = self.state.lock();
        if state.dirs.contains(path) {
            return true;
        }
        state
            .files
            .keys()
            .any(|file| file.ancestors().skip(1).any(|ancestor| ancestor == path))
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock();
        Ok(state
            .files
            .keys()
            .filter(|file| file.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, to)?;
        let contents = state.files.remove(from).ok_or_else(|| {
            TrazaError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", from.display()),
            ))
        })?;
        state.files.insert(to.to_path_buf(), contents);
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, path)?;
        state.files.remove(path).ok_or_else(|| {
            TrazaError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            ))
        })?;
        Ok(())
    }
}
