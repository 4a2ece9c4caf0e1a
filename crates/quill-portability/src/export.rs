//! Export orchestration
//!
//! Snapshots the live store under its exclusive lock, writes the archive to
//! a temp sibling of the destination, verifies it structurally, then renames
//! it into place. The live store is never modified; any failure only has to
//! clean up the temp file.

use crate::archive::{self, ArchiveMetadata, ARCHIVE_FORMAT_VERSION};
use crate::progress::{ExportStage, ProgressEvent, ProgressSender};
use crate::temp::TempFileGuard;
use crate::{Error, Result};
use parking_lot::Mutex;
use quill_storage_sqlite::{
    hash_sha256, load_salt, migrations, table_row_counts, SharedDatabase,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Window during which a second export is rejected outright
pub const EXPORT_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

/// Process-scoped export rate-limit state. Lives as long as the
/// orchestrator that owns it and resets with the process; never persisted.
#[derive(Debug, Default)]
pub struct ExportRateLimiter {
    last_success: Option<Instant>,
}

impl ExportRateLimiter {
    /// Create a limiter with no prior export recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject if a successful export completed inside the window
    pub fn check(&self) -> Result<()> {
        if let Some(last) = self.last_success {
            let elapsed = last.elapsed();
            if elapsed < EXPORT_RATE_LIMIT_WINDOW {
                let retry_after_secs = (EXPORT_RATE_LIMIT_WINDOW - elapsed).as_secs().max(1);
                return Err(Error::RateLimited { retry_after_secs });
            }
        }
        Ok(())
    }

    /// Record a successful export completion
    pub fn record_success(&mut self) {
        self.last_success = Some(Instant::now());
    }
}

/// Result of a completed export
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Final archive path
    pub path: PathBuf,
    /// Total archive size in bytes
    pub size_bytes: u64,
    /// Per-table row counts included in the archive
    pub table_counts: BTreeMap<String, u64>,
}

/// Export orchestrator
pub struct ExportOrchestrator {
    db: SharedDatabase,
    app_version: String,
    limiter: Mutex<ExportRateLimiter>,
    progress: ProgressSender,
}

impl ExportOrchestrator {
    /// Create an orchestrator over the live store
    pub fn new(db: SharedDatabase, app_version: impl Into<String>, progress: ProgressSender) -> Self {
        Self {
            db,
            app_version: app_version.into(),
            limiter: Mutex::new(ExportRateLimiter::new()),
            progress,
        }
    }

    /// Export the entire live store into a single archive at `dest`.
    ///
    /// The destination path comes from an external save dialog. On any
    /// failure the temp file is removed and nothing exists at `dest` that
    /// was not there before.
    pub fn export_archive(
        &self,
        dest: &Path,
        passphrase_hint: Option<&str>,
    ) -> Result<ExportSummary> {
        self.limiter.lock().check()?;

        self.progress.send(ProgressEvent::Export {
            stage: ExportStage::Preparing,
        });

        // Snapshot under the exclusive lock: checkpoint first so the main
        // file reflects all committed writes, then read file and salt while
        // no writer can interleave.
        let (db_bytes, salt) = {
            let db = self.db.lock();
            db.checkpoint()?;
            let db_bytes = fs::read(db.path())?;
            let salt = load_salt(db.path())?;
            (db_bytes, salt)
        };

        let (table_counts, schema_version) = {
            let db = self.db.lock();
            (
                table_row_counts(db.conn())?,
                migrations::stored_schema_version(db.conn())?,
            )
        };

        let metadata = ArchiveMetadata {
            format_version: ARCHIVE_FORMAT_VERSION,
            app_version: self.app_version.clone(),
            schema_version,
            exported_at: chrono::Utc::now().to_rfc3339(),
            passphrase_hint: passphrase_hint.map(|h| h.to_string()),
            table_counts: table_counts.clone(),
            db_size_bytes: db_bytes.len() as u64,
        };

        let temp_guard = TempFileGuard::new(temp_sibling(dest)?);

        self.progress.send(ProgressEvent::Export {
            stage: ExportStage::Copying,
        });
        archive::write_archive(temp_guard.path(), &metadata, &salt, &db_bytes)?;

        self.progress.send(ProgressEvent::Export {
            stage: ExportStage::Verifying,
        });
        verify_written_archive(temp_guard.path(), db_bytes.len() as u64)?;

        fs::rename(temp_guard.path(), dest)?;
        let size_bytes = fs::metadata(dest)?.len();

        self.limiter.lock().record_success();
        self.progress.send(ProgressEvent::Export {
            stage: ExportStage::Complete,
        });

        tracing::info!(
            event = "archive_export",
            path = %dest.display(),
            size_bytes = %size_bytes,
            payload_sha256 = %hex::encode(hash_sha256(&db_bytes)),
            verified = true,
            exported_at = %metadata.exported_at,
            "Archive export completed"
        );

        Ok(ExportSummary {
            path: dest.to_path_buf(),
            size_bytes,
            table_counts,
        })
    }
}

/// Structural verification of a freshly written archive: header, metadata
/// and salt re-parse, and the declared payload size matches both the bytes
/// on disk and the bytes we intended to write. Deliberately not a decrypt
/// check; the derived key is not resident at export time.
fn verify_written_archive(path: &Path, expected_payload: u64) -> Result<()> {
    let preview = archive::read_metadata_only(path)?;
    if preview.payload_size != expected_payload {
        return Err(Error::CorruptArchive(format!(
            "Verification found {} payload bytes on disk, expected {}",
            preview.payload_size, expected_payload
        )));
    }
    if preview.metadata.db_size_bytes != expected_payload {
        return Err(Error::CorruptArchive(format!(
            "Verification found declared payload size {}, expected {}",
            preview.metadata.db_size_bytes, expected_payload
        )));
    }
    Ok(())
}

/// Temp path in the same directory as `dest`, so the final rename never
/// crosses a filesystem boundary.
fn temp_sibling(dest: &Path) -> Result<PathBuf> {
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidArchive("Destination path has no file name".to_string()))?;
    Ok(dest.with_file_name(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4())))
}
