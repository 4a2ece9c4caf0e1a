//! Schema compatibility resolution

use serde::{Deserialize, Serialize};

/// Outcome of comparing an archive's schema version with the live store's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaCompatibility {
    /// Same version; rows copy column-for-column
    Compatible,
    /// Archive predates the live schema; import proceeds with the
    /// column-intersection + default-fill strategy
    OlderArchive {
        /// Schema version recorded in the archive
        version: i32,
    },
    /// Archive postdates the live schema; import is blocked before any
    /// row is touched
    NewerArchive {
        /// Schema version recorded in the archive
        version: i32,
    },
}

impl SchemaCompatibility {
    /// Whether an import may proceed at all
    pub fn allows_import(&self) -> bool {
        !matches!(self, Self::NewerArchive { .. })
    }
}

/// Compare an archive schema version against the live store's version.
pub fn compare(archive_version: i32, current_version: i32) -> SchemaCompatibility {
    if archive_version == current_version {
        SchemaCompatibility::Compatible
    } else if archive_version < current_version {
        SchemaCompatibility::OlderArchive {
            version: archive_version,
        }
    } else {
        SchemaCompatibility::NewerArchive {
            version: archive_version,
        }
    }
}
