//! Archive container codec
//!
//! Binary layout, in order:
//!
//! ```text
//! magic(4) | metadata_len(u32 LE) | metadata JSON | salt_len(u32 LE) | salt | encrypted payload
//! ```
//!
//! All length fields are parsed and bounds-checked before anything
//! proportional to them is allocated or read.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic identifier at offset 0 of every archive
pub const ARCHIVE_MAGIC: [u8; 4] = *b"QARC";

/// Container format version recorded in the metadata block
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// Maximum serialized metadata size (1 MiB)
pub const MAX_METADATA_LEN: u32 = 1024 * 1024;

/// Maximum salt size
pub const MAX_SALT_LEN: u32 = 512;

/// Maximum total archive file size accepted by import (500 MB)
pub const MAX_ARCHIVE_BYTES: u64 = 500 * 1024 * 1024;

/// Archive metadata block. Immutable once written; preview and execute each
/// re-read it independently from the file, never from a cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    /// Container format version
    pub format_version: u32,
    /// Application version that wrote the archive
    pub app_version: String,
    /// Schema version of the exported store
    pub schema_version: i32,
    /// Export timestamp, RFC 3339
    pub exported_at: String,
    /// Optional hint the user recorded for the passphrase
    pub passphrase_hint: Option<String>,
    /// Per-table row counts at export time
    pub table_counts: BTreeMap<String, u64>,
    /// Size of the encrypted payload in bytes
    pub db_size_bytes: u64,
}

/// Result of a metadata-only read: everything except the payload bytes.
#[derive(Debug, Clone)]
pub struct ArchivePreview {
    /// Parsed metadata block
    pub metadata: ArchiveMetadata,
    /// Key-derivation salt stored in the archive
    pub salt: Vec<u8>,
    /// Payload size inferred from the file length minus the header
    pub payload_size: u64,
}

/// Write an archive file at `path`.
///
/// Fails with [`Error::InvalidArchive`] if the metadata or salt exceed their
/// configured maximums, before any bytes are written.
pub fn write_archive(
    path: &Path,
    metadata: &ArchiveMetadata,
    salt: &[u8],
    db_bytes: &[u8],
) -> Result<()> {
    let metadata_json = serde_json::to_vec(metadata)?;

    if metadata_json.len() as u64 >= MAX_METADATA_LEN as u64 {
        return Err(Error::InvalidArchive(format!(
            "Metadata block is {} bytes, maximum is {}",
            metadata_json.len(),
            MAX_METADATA_LEN
        )));
    }
    if salt.len() as u64 > MAX_SALT_LEN as u64 {
        return Err(Error::InvalidArchive(format!(
            "Salt is {} bytes, maximum is {}",
            salt.len(),
            MAX_SALT_LEN
        )));
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&ARCHIVE_MAGIC)?;
    writer.write_all(&(metadata_json.len() as u32).to_le_bytes())?;
    writer.write_all(&metadata_json)?;
    writer.write_all(&(salt.len() as u32).to_le_bytes())?;
    writer.write_all(salt)?;
    writer.write_all(db_bytes)?;

    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    Ok(())
}

/// Read the entire archive: metadata, salt and payload.
///
/// Validates the magic first and every length field before reading the
/// section it describes. Never partially succeeds.
pub fn read_full(path: &Path) -> Result<(ArchiveMetadata, Vec<u8>, Vec<u8>)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let (metadata, salt, header_len) = read_header(&mut reader, file_len)?;

    let payload_declared = file_len - header_len;
    if payload_declared != metadata.db_size_bytes {
        return Err(Error::CorruptArchive(format!(
            "Archive payload is {} bytes but metadata declares {}",
            payload_declared, metadata.db_size_bytes
        )));
    }

    let mut db_bytes = Vec::with_capacity(payload_declared as usize);
    reader.read_to_end(&mut db_bytes)?;
    if db_bytes.len() as u64 != payload_declared {
        return Err(Error::CorruptArchive(format!(
            "Archive payload truncated: read {} of {} bytes",
            db_bytes.len(),
            payload_declared
        )));
    }

    Ok((metadata, salt, db_bytes))
}

/// Read only the header, metadata and salt.
///
/// The payload size is inferred from the total file size, so previewing a
/// large archive costs a few header-sized reads regardless of payload size.
pub fn read_metadata_only(path: &Path) -> Result<ArchivePreview> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let (metadata, salt, header_len) = read_header(&mut reader, file_len)?;

    Ok(ArchivePreview {
        payload_size: file_len - header_len,
        metadata,
        salt,
    })
}

/// Parse magic, metadata and salt sections. Returns the parsed blocks and
/// the total header length consumed.
fn read_header<R: Read>(reader: &mut R, file_len: u64) -> Result<(ArchiveMetadata, Vec<u8>, u64)> {
    let mut magic = [0u8; 4];
    read_exact_or_invalid(reader, &mut magic, "magic")?;
    if magic != ARCHIVE_MAGIC {
        return Err(Error::InvalidArchive(
            "File is not a Quill archive".to_string(),
        ));
    }

    let metadata_len = read_u32_le(reader, "metadata length")?;
    if metadata_len >= MAX_METADATA_LEN {
        return Err(Error::InvalidArchive(format!(
            "Declared metadata length {} exceeds the {} byte maximum",
            metadata_len, MAX_METADATA_LEN
        )));
    }
    if u64::from(metadata_len) + 12 > file_len {
        return Err(Error::InvalidArchive(
            "Declared metadata length exceeds the file size".to_string(),
        ));
    }

    let mut metadata_json = vec![0u8; metadata_len as usize];
    read_exact_or_invalid(reader, &mut metadata_json, "metadata block")?;
    let metadata: ArchiveMetadata = serde_json::from_slice(&metadata_json)
        .map_err(|e| Error::CorruptArchive(format!("Metadata block does not parse: {}", e)))?;

    if metadata.format_version != ARCHIVE_FORMAT_VERSION {
        return Err(Error::InvalidArchive(format!(
            "Unsupported archive format version {}",
            metadata.format_version
        )));
    }

    let salt_len = read_u32_le(reader, "salt length")?;
    if salt_len > MAX_SALT_LEN {
        return Err(Error::InvalidArchive(format!(
            "Declared salt length {} exceeds the {} byte maximum",
            salt_len, MAX_SALT_LEN
        )));
    }

    let header_len = 4 + 4 + u64::from(metadata_len) + 4 + u64::from(salt_len);
    if header_len > file_len {
        return Err(Error::InvalidArchive(
            "Declared salt length exceeds the file size".to_string(),
        ));
    }

    let mut salt = vec![0u8; salt_len as usize];
    read_exact_or_invalid(reader, &mut salt, "salt block")?;

    Ok((metadata, salt, header_len))
}

fn read_u32_le<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_or_invalid(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_exact_or_invalid<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|_| Error::InvalidArchive(format!("Archive truncated while reading {}", what)))
}
