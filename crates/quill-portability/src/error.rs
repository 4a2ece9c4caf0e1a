//! Error types

/// Portability errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Archive header or structure is not valid
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// Archive structure parsed but its contents are inconsistent
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// Archive exceeds the configured maximum size
    #[error("Archive too large: {size} bytes exceeds the {max} byte maximum")]
    ArchiveTooLarge {
        /// Declared or measured archive size
        size: u64,
        /// Configured maximum
        max: u64,
    },

    /// Not enough free disk space to import safely
    #[error("Insufficient disk space: {required} bytes required, {available} available")]
    DiskSpaceInsufficient {
        /// Bytes the import needs
        required: u64,
        /// Bytes the volume has free
        available: u64,
    },

    /// Wrong passphrase or corrupted payload. The message is constant: it
    /// never narrows down which internal check failed.
    #[error("Could not unlock the archive with the given passphrase")]
    DecryptionFailed,

    /// Archive was written by a newer schema than this application knows
    #[error(
        "Archive uses schema version {archive_version}, which is newer than this \
         application supports. Update the application, then import again."
    )]
    NewerArchiveBlocked {
        /// Schema version recorded in the archive
        archive_version: i32,
    },

    /// Import failed mid-operation; the transaction was rolled back
    #[error("Import failed: {0}")]
    ImportFailed(String),

    /// Import failed and the rollback itself also failed
    #[error("Rollback failed: {0}")]
    RollbackFailed(String),

    /// A successful export completed too recently
    #[error("Export rate limited: retry in {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window reopens
        retry_after_secs: u64,
    },

    /// Operation was cancelled before any change was made
    #[error("Operation cancelled")]
    Cancelled,

    /// Background task failed to complete
    #[error("Background task failed: {0}")]
    Background(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] quill_storage_sqlite::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
