//! Encryption key derivation

use crate::security::derive_key_bytes;
use crate::{Error, Result};
use zeroize::Zeroizing;

/// Encryption key for the database. Key bytes are zeroed on drop.
pub struct EncryptionKey(Zeroizing<[u8; 32]>);

impl EncryptionKey {
    /// Derive from passphrase using Argon2id + salt
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self> {
        let key = derive_key_bytes(passphrase, salt)?;
        Ok(Self(key))
    }

    /// Create from raw key bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Create from raw key bytes slice
    pub fn from_bytes_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Encryption("Invalid key length".to_string()));
        }
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Get key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}
