//! Encrypted SQLite storage for Quill
//!
//! Provides the encrypted-at-rest database with WAL mode, migrations,
//! and the schema for clients, projects, proposals and app settings.
//!
//! ## Security Features
//!
//! - **Database Encryption**: SQLCipher page encryption via rusqlite's
//!   bundled SQLCipher build
//! - **Passphrase KDF**: Argon2id with 64 MiB memory, 3 iterations, 4 lanes
//! - **Key Hygiene**: derived key bytes held in [`zeroize::Zeroizing`]
//!   buffers and wiped on every drop path
//! - **Cross-Store Access**: attach/detach of a second encrypted store for
//!   archive import, always under the single exclusive connection lock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod encryption;
pub mod error;
pub mod migrations;
pub mod models;
pub mod repository;
pub mod security;

pub use database::{Database, SharedDatabase};
pub use encryption::EncryptionKey;
pub use error::{Error, Result};
pub use migrations::SCHEMA_VERSION;
pub use models::*;
pub use repository::{
    table_row_counts, Repository, PROTECTED_SETTING_KEYS, USER_TABLE_COPY_ORDER,
};
pub use security::{
    derive_key_bytes, generate_salt, hash_sha256, load_or_create_salt, load_salt, salt_path_for,
    SALT_LEN,
};
