//! Security primitives
//!
//! Argon2id passphrase derivation with fixed parameters shared by first-run
//! setup and every archive operation, salt persistence, and key zeroization.

use crate::{Error, Result};
use argon2::{Argon2, ParamsBuilder, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Argon2id parameters (MANDATORY, shared across all derivations)
/// Memory: 64 MiB (65536 KiB), Iterations: 3, Parallelism: 4
const ARGON2_PARAMS: (u32, u32, u32) = (65536, 3, 4); // m_cost (KiB), t_cost, p_cost

/// Salt length written to the salt file
pub const SALT_LEN: usize = 32;

/// Derive raw key bytes from passphrase using Argon2id.
pub fn derive_key_bytes(passphrase: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    if salt.len() < 16 {
        return Err(Error::Encryption("Salt too short".to_string()));
    }

    let params = ParamsBuilder::new()
        .m_cost(ARGON2_PARAMS.0)
        .t_cost(ARGON2_PARAMS.1)
        .p_cost(ARGON2_PARAMS.2)
        .output_len(32)
        .build()
        .map_err(|e| Error::Encryption(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
        .map_err(|e| Error::Encryption(e.to_string()))?;

    Ok(key)
}

/// Generate secure random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Path of the salt file stored beside the database file
pub fn salt_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".salt");
    db_path.with_file_name(name)
}

/// Load the salt stored beside the database, creating one on first run
pub fn load_or_create_salt(db_path: &Path) -> Result<Vec<u8>> {
    let path = salt_path_for(db_path);
    if path.exists() {
        return load_salt(db_path);
    }
    let salt = generate_salt();
    fs::write(&path, salt)?;
    tracing::debug!("Created new salt file at {}", path.display());
    Ok(salt.to_vec())
}

/// Load the salt stored beside the database
pub fn load_salt(db_path: &Path) -> Result<Vec<u8>> {
    let path = salt_path_for(db_path);
    let salt = fs::read(&path)?;
    if salt.len() < 16 {
        return Err(Error::Encryption(format!(
            "Salt file {} is truncated",
            path.display()
        )));
    }
    Ok(salt)
}

/// Hash data with SHA-256
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
