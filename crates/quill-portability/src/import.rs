//! Import orchestration
//!
//! Validates an archive, decrypts it for preview, then executes a
//! transactional copy into the live store. Preview and execute share no
//! state: execute re-reads the archive, re-extracts the payload and
//! re-derives the key, so key material never outlives the operation that
//! needed it.

use crate::archive::{self, ArchiveMetadata, MAX_ARCHIVE_BYTES};
use crate::progress::{CancelFlag, ImportStage, ProgressEvent, ProgressSender};
use crate::schema::{self, SchemaCompatibility};
use crate::temp::{ExtractionDir, TempFileGuard};
use crate::{Error, Result};
use parking_lot::RwLock;
use quill_storage_sqlite::{
    migrations, table_row_counts, Database, EncryptionKey, SharedDatabase,
    PROTECTED_SETTING_KEYS, USER_TABLE_COPY_ORDER,
};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Alias under which the extracted archive store is attached
const ARCHIVE_ALIAS: &str = "archive";

/// Rows copied per batch for tables larger than one batch
const COPY_BATCH_SIZE: u64 = 100;

/// Import strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Delete live rows (except process-managed settings) and copy
    /// everything from the archive
    ReplaceAll,
    /// Insert archive rows that do not collide with existing primary keys;
    /// existing rows always win
    MergeSkipDuplicates,
}

impl ImportMode {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplaceAll => "Replace All",
            Self::MergeSkipDuplicates => "Merge (skip duplicates)",
        }
    }
}

/// Import flow state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportState {
    /// No import in flight
    Idle,
    /// Reading archive metadata without a passphrase
    MetadataPreview,
    /// Extracting and unlocking the payload for preview
    Decrypting,
    /// Preview finished; awaiting the user's mode choice
    PreviewReady,
    /// Transactional copy in progress
    Importing,
    /// Import committed
    Success,
    /// Import failed; the live store was rolled back untouched
    Failed,
}

/// External collaborator that snapshots the current state before a
/// destructive import. `ReplaceAll` refuses to run if it fails.
pub trait BackupProvider: Send + Sync {
    /// Create a full backup of the current live store state
    fn create_full_backup(&self) -> Result<()>;
}

/// Per-table copy outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableImportCounts {
    /// Table name
    pub table: String,
    /// Rows written into the live store
    pub imported: u64,
    /// Archive rows not written (existing keys won, or protected settings)
    pub skipped: u64,
}

/// Result of a completed import
#[derive(Debug, Clone)]
pub struct ImportSummary {
    /// Per-table counts, in copy order
    pub tables: Vec<TableImportCounts>,
    /// Grand total of rows written
    pub total_imported: u64,
    /// Grand total of rows skipped
    pub total_skipped: u64,
}

impl ImportSummary {
    fn from_tables(tables: Vec<TableImportCounts>) -> Self {
        let total_imported = tables.iter().map(|t| t.imported).sum();
        let total_skipped = tables.iter().map(|t| t.skipped).sum();
        Self {
            tables,
            total_imported,
            total_skipped,
        }
    }

    /// Counts for one table, if it was part of the copy
    pub fn table(&self, name: &str) -> Option<&TableImportCounts> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Result of a decrypt-and-preview pass
#[derive(Debug, Clone)]
pub struct ImportPreview {
    /// Archive metadata, re-read from the file
    pub metadata: ArchiveMetadata,
    /// Archive schema vs. live schema
    pub schema_compat: SchemaCompatibility,
    /// Current live per-table row counts, for side-by-side display
    pub table_counts_current: BTreeMap<String, u64>,
}

/// Import orchestrator
pub struct ImportOrchestrator {
    db: SharedDatabase,
    extraction: ExtractionDir,
    backup: Arc<dyn BackupProvider>,
    progress: ProgressSender,
    state: RwLock<ImportState>,
    #[cfg(test)]
    copy_fault: parking_lot::Mutex<Option<usize>>,
}

impl ImportOrchestrator {
    /// Create an orchestrator over the live store
    pub fn new(
        db: SharedDatabase,
        extraction: ExtractionDir,
        backup: Arc<dyn BackupProvider>,
        progress: ProgressSender,
    ) -> Self {
        Self {
            db,
            extraction,
            backup,
            progress,
            state: RwLock::new(ImportState::Idle),
            #[cfg(test)]
            copy_fault: parking_lot::Mutex::new(None),
        }
    }

    /// Get current flow state
    pub fn state(&self) -> ImportState {
        *self.state.read()
    }

    fn set_state(&self, state: ImportState) {
        *self.state.write() = state;
        tracing::debug!("Import state: {:?}", state);
    }

    /// Read archive metadata for display. Requires no passphrase and reads
    /// nothing proportional to the payload size.
    pub fn preview_metadata(&self, archive_path: &Path) -> Result<ArchiveMetadata> {
        self.set_state(ImportState::MetadataPreview);
        let result = self.preview_metadata_inner(archive_path);
        if result.is_err() {
            // Bad input never dead-ends the flow; the user may pick another file
            self.set_state(ImportState::Idle);
        }
        result
    }

    fn preview_metadata_inner(&self, archive_path: &Path) -> Result<ArchiveMetadata> {
        check_archive_file_size(archive_path)?;
        let preview = archive::read_metadata_only(archive_path)?;
        Ok(preview.metadata)
    }

    /// Extract and unlock the archive, compare schemas, and report what an
    /// import would involve. Closes its connection and zeroes the derived
    /// key before returning; nothing carries over to [`Self::execute_import`].
    ///
    /// A wrong passphrase returns [`Error::DecryptionFailed`] with a
    /// constant message; retrying is always permitted.
    pub fn decrypt_and_preview(
        &self,
        archive_path: &Path,
        passphrase: &str,
    ) -> Result<ImportPreview> {
        self.set_state(ImportState::Decrypting);
        let result = self.decrypt_and_preview_inner(archive_path, passphrase);
        match &result {
            Ok(_) => self.set_state(ImportState::PreviewReady),
            Err(_) => self.set_state(ImportState::Idle),
        }
        result
    }

    fn decrypt_and_preview_inner(
        &self,
        archive_path: &Path,
        passphrase: &str,
    ) -> Result<ImportPreview> {
        check_archive_file_size(archive_path)?;
        let (metadata, salt, db_bytes) = archive::read_full(archive_path)?;

        let guard = TempFileGuard::new(self.extraction.allocate());
        fs::write(guard.path(), &db_bytes)?;

        let key = EncryptionKey::from_passphrase(passphrase, &salt)?;

        // Decrypt-open consistency check. Every sub-check maps to the same
        // constant error so failures reveal nothing about which one tripped.
        let archive_db =
            Database::open_existing(guard.path(), &key).map_err(|_| Error::DecryptionFailed)?;
        let _object_count: i64 = archive_db
            .conn()
            .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))
            .map_err(|_| Error::DecryptionFailed)?;
        drop(archive_db);

        let (current_version, table_counts_current) = {
            let db = self.db.lock();
            (
                migrations::stored_schema_version(db.conn())?,
                table_row_counts(db.conn())?,
            )
        };
        let schema_compat = schema::compare(metadata.schema_version, current_version);

        tracing::info!(
            event = "archive_preview",
            path = %archive_path.display(),
            archive_schema = %metadata.schema_version,
            live_schema = %current_version,
            "Archive preview completed"
        );

        Ok(ImportPreview {
            metadata,
            schema_compat,
            table_counts_current,
        })
    }

    /// Execute the import under `mode`.
    ///
    /// Re-reads the archive, re-extracts and re-derives everything
    /// independently of any earlier preview. All row changes happen inside
    /// one exclusive transaction: on any failure the transaction is rolled
    /// back, temp files are removed, and the live store is unchanged.
    pub fn execute_import(
        &self,
        archive_path: &Path,
        passphrase: &str,
        mode: ImportMode,
        cancel: &CancelFlag,
    ) -> Result<ImportSummary> {
        self.set_state(ImportState::Importing);
        let result = self.execute_import_inner(archive_path, passphrase, mode, cancel);
        match &result {
            Ok(summary) => {
                self.set_state(ImportState::Success);
                tracing::info!(
                    event = "archive_import",
                    path = %archive_path.display(),
                    mode = %mode.name(),
                    total_imported = %summary.total_imported,
                    total_skipped = %summary.total_skipped,
                    "Archive import committed"
                );
            }
            Err(e) => {
                self.set_state(ImportState::Failed);
                tracing::warn!(
                    event = "archive_import_failed",
                    path = %archive_path.display(),
                    mode = %mode.name(),
                    error = %e,
                    "Archive import failed; live store unchanged"
                );
            }
        }
        result
    }

    fn execute_import_inner(
        &self,
        archive_path: &Path,
        passphrase: &str,
        mode: ImportMode,
        cancel: &CancelFlag,
    ) -> Result<ImportSummary> {
        self.progress.send(ProgressEvent::Import {
            stage: ImportStage::Preparing,
        });

        // Preflights run against a metadata-only read and fail fast before
        // anything proportional to the payload is read or written
        check_archive_file_size(archive_path)?;
        let declared = archive::read_metadata_only(archive_path)?;

        self.check_disk_space(&declared.metadata)?;

        let current_version = {
            let db = self.db.lock();
            migrations::stored_schema_version(db.conn())?
        };
        let compat = schema::compare(declared.metadata.schema_version, current_version);
        if let SchemaCompatibility::NewerArchive { version } = compat {
            return Err(Error::NewerArchiveBlocked {
                archive_version: version,
            });
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Full read, independent of any earlier preview
        let (_metadata, salt, db_bytes) = archive::read_full(archive_path)?;

        // Extract and unlock
        let guard = TempFileGuard::new(self.extraction.allocate());
        fs::write(guard.path(), &db_bytes)?;
        let key = EncryptionKey::from_passphrase(passphrase, &salt)?;
        {
            let archive_db =
                Database::open_existing(guard.path(), &key).map_err(|_| Error::DecryptionFailed)?;
            archive_db
                .conn()
                .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(|_| Error::DecryptionFailed)?;
        }

        // Destructive mode requires a successful external backup first
        if mode == ImportMode::ReplaceAll {
            self.backup
                .create_full_backup()
                .map_err(|e| Error::ImportFailed(format!("Pre-import backup failed: {}", e)))?;
        }

        // Last cancellation point: nothing has been changed yet
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // The lock is held from here through commit/rollback
        let db = self.db.lock();
        db.attach_with_key(guard.path(), ARCHIVE_ALIAS, &key)?;

        // Attach and detach cannot run inside a transaction, so the
        // transaction brackets only the row copies
        if let Err(e) = db.begin_exclusive() {
            detach_best_effort(&db);
            return Err(e.into());
        }

        let copy_result = self.copy_all_tables(&db, mode, compat);

        let summary = match copy_result {
            Ok(tables) => {
                self.progress.send(ProgressEvent::Import {
                    stage: ImportStage::Finalizing,
                });
                match db.commit() {
                    Ok(()) => {
                        detach_best_effort(&db);
                        ImportSummary::from_tables(tables)
                    }
                    Err(commit_err) => {
                        let err = rollback_and_detach(&db, commit_err.to_string());
                        return Err(err);
                    }
                }
            }
            Err(copy_err) => {
                let err = rollback_and_detach(&db, copy_err.to_string());
                return Err(err);
            }
        };
        drop(db);
        drop(key);
        drop(guard);

        self.progress.send(ProgressEvent::Import {
            stage: ImportStage::Complete,
        });
        Ok(summary)
    }

    /// Copy every user table inside one exclusive transaction. Foreign-key
    /// checks are deferred to commit so the fixed per-table order can
    /// delete and insert freely within the transaction.
    fn copy_all_tables(
        &self,
        db: &Database,
        mode: ImportMode,
        compat: SchemaCompatibility,
    ) -> Result<Vec<TableImportCounts>> {
        db.conn().execute_batch("PRAGMA defer_foreign_keys = ON")?;

        self.progress.send(ProgressEvent::Import {
            stage: ImportStage::Copying,
        });

        let mut tables = Vec::with_capacity(USER_TABLE_COPY_ORDER.len());
        for (index, table) in USER_TABLE_COPY_ORDER.iter().enumerate() {
            #[cfg(test)]
            if let Some(fail_at) = *self.copy_fault.lock() {
                if fail_at == index {
                    return Err(Error::ImportFailed(format!(
                        "Simulated write failure on table {}",
                        table
                    )));
                }
            }

            let counts = self.copy_table(db.conn(), table, mode, compat)?;
            tables.push(counts);
        }

        Ok(tables)
    }

    fn copy_table(
        &self,
        conn: &Connection,
        table: &str,
        mode: ImportMode,
        compat: SchemaCompatibility,
    ) -> Result<TableImportCounts> {
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}.{}", ARCHIVE_ALIAS, table),
            [],
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;

        if mode == ImportMode::ReplaceAll {
            delete_live_rows(conn, table)?;
        }

        let insert_sql = build_insert_sql(conn, table, mode, compat)?;

        let mut imported = 0u64;
        if total > COPY_BATCH_SIZE {
            let mut offset = 0u64;
            while offset < total {
                let batch_sql = format!(
                    "{} ORDER BY rowid LIMIT {} OFFSET {}",
                    insert_sql, COPY_BATCH_SIZE, offset
                );
                imported += conn.execute(&batch_sql, [])? as u64;
                offset += COPY_BATCH_SIZE;
                self.progress.send(ProgressEvent::TableProgress {
                    table: table.to_string(),
                    current: offset.min(total),
                    total,
                });
            }
        } else if total > 0 {
            imported = conn.execute(&insert_sql, [])? as u64;
        }

        Ok(TableImportCounts {
            table: table.to_string(),
            imported,
            skipped: total - imported,
        })
    }

    fn check_disk_space(&self, metadata: &ArchiveMetadata) -> Result<()> {
        let live_dir = {
            let db = self.db.lock();
            db.path()
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."))
        };
        let available = fs2::available_space(&live_dir)?;
        // Extracted temp copy plus live-store growth share the volume
        let required = metadata.db_size_bytes.saturating_mul(2);
        if available < required {
            return Err(Error::DiskSpaceInsufficient {
                required,
                available,
            });
        }
        Ok(())
    }

    #[cfg(test)]
    fn inject_copy_fault(&self, fail_at_table_index: usize) {
        *self.copy_fault.lock() = Some(fail_at_table_index);
    }
}

fn check_archive_file_size(path: &Path) -> Result<()> {
    let size = fs::metadata(path)?.len();
    if size > MAX_ARCHIVE_BYTES {
        return Err(Error::ArchiveTooLarge {
            size,
            max: MAX_ARCHIVE_BYTES,
        });
    }
    Ok(())
}

/// Delete the live rows an incoming `ReplaceAll` will replace. Rows whose
/// keys the process manages survive every import.
fn delete_live_rows(conn: &Connection, table: &str) -> Result<()> {
    if table == "app_settings" {
        let placeholders = PROTECTED_SETTING_KEYS
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(
            &format!("DELETE FROM main.{} WHERE key NOT IN ({})", table, placeholders),
            rusqlite::params_from_iter(PROTECTED_SETTING_KEYS.iter()),
        )?;
    } else {
        conn.execute(&format!("DELETE FROM main.{}", table), [])?;
    }
    Ok(())
}

#[derive(Debug)]
struct ColumnInfo {
    name: String,
    decl_type: String,
    not_null: bool,
    has_default: bool,
}

fn table_columns(conn: &Connection, db_name: &str, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA {}.table_info({})", db_name, table))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get::<_, String>("name")?,
                decl_type: row.get::<_, String>("type")?,
                not_null: row.get::<_, bool>("notnull")?,
                has_default: row.get::<_, Option<String>>("dflt_value")?.is_some(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Build the INSERT ... SELECT statement copying `table` from the attached
/// archive into the live store.
///
/// The column list is the intersection of archive and live columns (they
/// are identical for a same-version archive). A live-only column with a
/// declared DEFAULT is simply omitted and SQLite fills it; a live-only
/// NOT NULL column without a default is filled with the documented typed
/// default: '' for TEXT, 0 for numeric types, a zero-length blob for BLOB.
fn build_insert_sql(
    conn: &Connection,
    table: &str,
    mode: ImportMode,
    compat: SchemaCompatibility,
) -> Result<String> {
    let live_cols = table_columns(conn, "main", table)?;
    let archive_cols = table_columns(conn, ARCHIVE_ALIAS, table)?;
    let archive_names: HashSet<&str> = archive_cols.iter().map(|c| c.name.as_str()).collect();

    let mut insert_cols = Vec::new();
    let mut select_exprs = Vec::new();
    for col in &live_cols {
        if archive_names.contains(col.name.as_str()) {
            insert_cols.push(col.name.clone());
            select_exprs.push(format!("{}.{}.{}", ARCHIVE_ALIAS, table, col.name));
        } else if col.not_null && !col.has_default {
            insert_cols.push(col.name.clone());
            select_exprs.push(typed_default_literal(&col.decl_type).to_string());
        }
    }

    if insert_cols.is_empty() {
        return Err(Error::ImportFailed(format!(
            "Table {} shares no columns with the archive",
            table
        )));
    }

    // A same-version archive must match the live schema exactly
    if compat == SchemaCompatibility::Compatible && archive_cols.len() != live_cols.len() {
        return Err(Error::CorruptArchive(format!(
            "Table {} declares {} columns, live store has {}",
            table,
            archive_cols.len(),
            live_cols.len()
        )));
    }

    // Existing primary keys always win in a merge. ReplaceAll only needs
    // conflict tolerance for the protected settings rows it left in place.
    let or_ignore = match mode {
        ImportMode::MergeSkipDuplicates => "OR IGNORE ",
        ImportMode::ReplaceAll if table == "app_settings" => "OR IGNORE ",
        ImportMode::ReplaceAll => "",
    };

    Ok(format!(
        "INSERT {}INTO main.{} ({}) SELECT {} FROM {}.{}",
        or_ignore,
        table,
        insert_cols.join(", "),
        select_exprs.join(", "),
        ARCHIVE_ALIAS,
        table
    ))
}

fn typed_default_literal(decl_type: &str) -> &'static str {
    let upper = decl_type.to_ascii_uppercase();
    if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
        "''"
    } else if upper.contains("BLOB") {
        "x''"
    } else {
        "0"
    }
}

/// Roll back the in-flight transaction and detach the archive schema.
/// Returns `ImportFailed` carrying `cause`, or `RollbackFailed` if even the
/// rollback could not complete.
fn rollback_and_detach(db: &Database, cause: String) -> Error {
    let result = match db.rollback() {
        Ok(()) => Error::ImportFailed(cause),
        Err(rollback_err) => Error::RollbackFailed(format!(
            "{} (import failure: {})",
            rollback_err, cause
        )),
    };
    detach_best_effort(db);
    result
}

fn detach_best_effort(db: &Database) {
    if let Err(e) = db.detach(ARCHIVE_ALIAS) {
        tracing::warn!("Could not detach archive schema: {}", e);
    }
}
