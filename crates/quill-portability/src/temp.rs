//! Temp extraction file lifecycle
//!
//! Every import extracts the archive payload to a freshly named file inside
//! a controlled directory. The name is a UUID, so no user-influenced
//! characters ever reach a later query string. Files are deleted on every
//! exit path via [`TempFileGuard`] and swept at process start if a crash
//! orphaned them.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Filename prefix for extraction files
const EXTRACTION_PREFIX: &str = "import-";

/// Age past which an orphaned extraction file is considered stale
pub const STALE_EXTRACTION_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Controlled directory that owns all archive extraction files.
#[derive(Debug, Clone)]
pub struct ExtractionDir {
    root: PathBuf,
}

impl ExtractionDir {
    /// Open (creating if needed) the extraction directory
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    /// Directory path
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh, unpredictable extraction file path
    pub fn allocate(&self) -> PathBuf {
        self.root
            .join(format!("{}{}.db", EXTRACTION_PREFIX, uuid::Uuid::new_v4()))
    }

    /// Remove extraction files older than `max_age`. Run once at process
    /// start; live operations hold guards over their own files, so anything
    /// old enough to match here was orphaned by a crash.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let now = SystemTime::now();
        let mut removed = 0;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(EXTRACTION_PREFIX) {
                continue;
            }

            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age {
                match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        tracing::info!(
                            event = "stale_extraction_removed",
                            path = %entry.path().display(),
                            "Removed stale extraction file"
                        );
                        removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Could not remove stale extraction file {}: {}",
                            entry.path().display(),
                            e
                        );
                    }
                }
            }
        }

        Ok(removed)
    }
}

/// RAII guard for one extraction file. Dropping the guard deletes the file
/// together with any `-wal`/`-shm` journal siblings SQLite created beside
/// it, so handled failures and early returns all clean up the same way.
#[derive(Debug)]
pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    /// Guard the given path
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Guarded path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        for path in sibling_paths(&self.path) {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    tracing::warn!(
                        "Could not remove extraction file {}: {}",
                        path.display(),
                        e
                    );
                }
            }
        }
    }
}

fn sibling_paths(path: &Path) -> [PathBuf; 3] {
    let mut wal = path.as_os_str().to_os_string();
    wal.push("-wal");
    let mut shm = path.as_os_str().to_os_string();
    shm.push("-shm");
    [path.to_path_buf(), PathBuf::from(wal), PathBuf::from(shm)]
}
