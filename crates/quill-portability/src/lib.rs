//! Encrypted store portability for Quill
//!
//! Exports the entire encrypted local store into a single self-contained
//! archive file, and imports such archives back into a live store without
//! corrupting or losing existing data, possibly under a different
//! passphrase, on a different machine, against an older schema version.
//!
//! ## Guarantees
//!
//! - **All-or-nothing imports**: every row change happens inside one
//!   exclusive transaction; any failure rolls back to the pre-import state
//! - **Bounded parsing**: every archive length field is checked before
//!   anything proportional to it is allocated
//! - **Key hygiene**: passphrase-derived keys live only for the operation
//!   that needs them and are zeroed on every exit path; preview and
//!   execute never share key material
//! - **Crash-safe temp files**: extraction files are removed on every exit
//!   path and swept at startup past an age threshold

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
pub mod background;
pub mod error;
pub mod export;
pub mod import;
pub mod progress;
pub mod schema;
pub mod temp;

pub use archive::{
    read_full, read_metadata_only, write_archive, ArchiveMetadata, ArchivePreview,
    ARCHIVE_FORMAT_VERSION, ARCHIVE_MAGIC, MAX_ARCHIVE_BYTES, MAX_METADATA_LEN, MAX_SALT_LEN,
};
pub use background::{run_export_task, run_import_task};
pub use error::{Error, Result};
pub use export::{
    ExportOrchestrator, ExportRateLimiter, ExportSummary, EXPORT_RATE_LIMIT_WINDOW,
};
pub use import::{
    BackupProvider, ImportMode, ImportOrchestrator, ImportPreview, ImportState, ImportSummary,
    TableImportCounts,
};
pub use progress::{CancelFlag, ExportStage, ImportStage, ProgressEvent, ProgressSender};
pub use schema::{compare, SchemaCompatibility};
pub use temp::{ExtractionDir, TempFileGuard, STALE_EXTRACTION_MAX_AGE};
