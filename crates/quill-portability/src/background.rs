//! Background task entry points
//!
//! Each export or import runs as one blocking task on the runtime's
//! blocking pool, so a UI thread driving the wizard never blocks on
//! checkpointing, key derivation or the copy itself.

use crate::export::{ExportOrchestrator, ExportSummary};
use crate::import::{ImportMode, ImportOrchestrator, ImportSummary};
use crate::progress::CancelFlag;
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Run one export as a background task
pub async fn run_export_task(
    orchestrator: Arc<ExportOrchestrator>,
    dest: PathBuf,
    passphrase_hint: Option<String>,
) -> Result<ExportSummary> {
    tokio::task::spawn_blocking(move || {
        orchestrator.export_archive(&dest, passphrase_hint.as_deref())
    })
    .await
    .map_err(|e| Error::Background(e.to_string()))?
}

/// Run one import as a background task
pub async fn run_import_task(
    orchestrator: Arc<ImportOrchestrator>,
    archive_path: PathBuf,
    passphrase: String,
    mode: ImportMode,
    cancel: CancelFlag,
) -> Result<ImportSummary> {
    tokio::task::spawn_blocking(move || {
        orchestrator.execute_import(&archive_path, &passphrase, mode, &cancel)
    })
    .await
    .map_err(|e| Error::Background(e.to_string()))?
}
