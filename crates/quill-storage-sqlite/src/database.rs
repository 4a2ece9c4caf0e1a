//! Database connection and initialization

use crate::{encryption::EncryptionKey, migrations, Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The live store behind its single exclusive lock. Export snapshots and
/// import transactions hold this lock for their entire critical section.
pub type SharedDatabase = Arc<Mutex<Database>>;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Open database with encryption, creating and migrating as needed
    pub fn open<P: AsRef<Path>>(path: P, key: &EncryptionKey) -> Result<Self> {
        let db = Self::open_with_flags(
            path.as_ref(),
            key,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        migrations::run_migrations(&db.conn)?;

        Ok(db)
    }

    /// Open an existing encrypted database without creating or migrating it.
    ///
    /// Used for archive copies, which must be read exactly as written: running
    /// migrations here would silently rewrite the archived schema.
    pub fn open_existing<P: AsRef<Path>>(path: P, key: &EncryptionKey) -> Result<Self> {
        if !path.as_ref().exists() {
            return Err(Error::NotFound(format!(
                "Database file {} does not exist",
                path.as_ref().display()
            )));
        }
        Self::open_with_flags(
            path.as_ref(),
            key,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    fn open_with_flags(path: &Path, key: &EncryptionKey, flags: OpenFlags) -> Result<Self> {
        // Check if database exists before opening (path is moved in open_with_flags)
        let db_exists = path.exists();
        let path_buf = path.to_path_buf();

        let conn = Connection::open_with_flags(&path_buf, flags)?;

        // CRITICAL: PRAGMA key MUST be the FIRST statement executed after opening the connection
        // Any other PRAGMA or SQL statement executed before PRAGMA key will cause the database
        // to be created in an unencrypted state, leading to "file is not a database" errors
        let key_hex = hex::encode(key.as_bytes());
        if let Err(e) = conn.execute(&format!("PRAGMA key = '{}';", key_hex), []) {
            // PRAGMA statements can return values; that is not a failure
            if !e.to_string().contains("Execute returned results") {
                return Err(Error::Encryption(format!(
                    "Failed to set database encryption key: {}",
                    e
                )));
            }
        }

        // Now we can safely set other PRAGMAs after the encryption key is set
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        // Verify SQLCipher encryption is active
        let cipher_version: std::result::Result<String, rusqlite::Error> =
            conn.query_row("PRAGMA cipher_version", [], |row| row.get(0));

        match cipher_version {
            Ok(version) if !version.is_empty() => {
                tracing::debug!("SQLCipher version: {}", version);
            }
            Ok(_) | Err(_) => {
                return Err(Error::Encryption(
                    "SQLCipher encryption verification failed. Database may not be encrypted."
                        .to_string(),
                ));
            }
        }

        // Test that we can read encrypted data. For new databases, skip this
        // check as the database is empty.
        if db_exists {
            let test_result: std::result::Result<i64, rusqlite::Error> =
                conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0));

            if test_result.is_err() {
                let file_size = std::fs::metadata(&path_buf).map(|m| m.len()).unwrap_or(0);

                // Files below the SQLite header size were never valid databases
                if file_size < 100 {
                    tracing::warn!(
                        "Database file exists but is too small ({} bytes), may be corrupted",
                        file_size
                    );
                    return Err(Error::Encryption(
                        "Database file appears to be corrupted.".to_string(),
                    ));
                }

                return Err(Error::Encryption(
                    "Database encryption verification failed: cannot read from encrypted database. The database may have been created with a different encryption key.".to_string()
                ));
            }
        }

        Ok(Self {
            conn,
            path: path_buf,
        })
    }

    /// Get connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the write-ahead log into the main database file so the on-disk
    /// file reflects all committed writes.
    pub fn checkpoint(&self) -> Result<()> {
        // wal_checkpoint returns a (busy, log, checkpointed) row
        let busy: i64 = self
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))?;
        if busy != 0 {
            return Err(Error::Storage(
                "WAL checkpoint could not complete while writers are active".to_string(),
            ));
        }
        Ok(())
    }

    /// Attach a second encrypted database under `alias`, enabling cross-store
    /// reads on this connection. Must be called outside any transaction.
    pub fn attach_with_key(&self, path: &Path, alias: &str, key: &EncryptionKey) -> Result<()> {
        validate_alias(alias)?;
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Validation("Attach path is not valid UTF-8".to_string()))?;
        let key_hex = hex::encode(key.as_bytes());
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {} KEY ?2", alias),
            params![path_str, key_hex],
        )?;
        Ok(())
    }

    /// Detach a previously attached database. Must be called outside any
    /// transaction.
    pub fn detach(&self, alias: &str) -> Result<()> {
        validate_alias(alias)?;
        self.conn.execute(&format!("DETACH DATABASE {}", alias), [])?;
        Ok(())
    }

    /// Begin an exclusive transaction
    pub fn begin_exclusive(&self) -> Result<()> {
        self.conn.execute_batch("BEGIN EXCLUSIVE")?;
        Ok(())
    }

    /// Commit the current transaction
    pub fn commit(&self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    /// Roll back the current transaction
    pub fn rollback(&self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Rekey database with a new encryption key
    pub fn rekey(&self, new_key: &EncryptionKey) -> Result<()> {
        let key_hex = hex::encode(new_key.as_bytes());
        if let Err(e) = self
            .conn
            .execute(&format!("PRAGMA rekey = '{}';", key_hex), [])
        {
            if !e.to_string().contains("Execute returned results") {
                return Err(Error::Encryption(format!("Failed to rekey database: {}", e)));
            }
        }
        Ok(())
    }
}

// Aliases come from fixed constants in this workspace; reject anything else
// so no caller-supplied string can reach a query.
fn validate_alias(alias: &str) -> Result<()> {
    if alias.is_empty()
        || !alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Validation(format!(
            "Invalid schema alias: {:?}",
            alias
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::generate_salt;
    use tempfile::TempDir;

    fn test_key(passphrase: &str, salt: &[u8]) -> EncryptionKey {
        EncryptionKey::from_passphrase(passphrase, salt).unwrap()
    }

    #[test]
    fn test_open_database() {
        let dir = TempDir::new().unwrap();
        let salt = generate_salt();
        let key = test_key("test", &salt);
        let result = Database::open(dir.path().join("quill.db"), &key);
        assert!(result.is_ok());
    }

    #[test]
    fn test_wrong_database_key_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quill.db");
        let salt = generate_salt();

        let key1 = test_key("correct-key", &salt);
        let db = Database::open(&path, &key1).unwrap();
        db.conn()
            .execute(
                "INSERT INTO clients (name, email, created_at) VALUES ('a', 'a@b.c', 0)",
                [],
            )
            .unwrap();
        drop(db);

        let key2 = test_key("wrong-key", &salt);
        let result = Database::open_existing(&path, &key2);
        assert!(result.is_err(), "Wrong key must not open the database");
    }

    #[test]
    fn test_open_existing_requires_file() {
        let dir = TempDir::new().unwrap();
        let key = test_key("test", &generate_salt());
        let result = Database::open_existing(dir.path().join("missing.db"), &key);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_database_file_is_encrypted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quill.db");
        let key = test_key("test-passphrase", &generate_salt());

        let db = Database::open(&path, &key).unwrap();
        db.conn()
            .execute(
                "INSERT INTO clients (name, email, created_at) VALUES ('sensitive client', 'x@y.z', 0)",
                [],
            )
            .unwrap();
        db.checkpoint().unwrap();
        drop(db);

        let file_contents = std::fs::read(&path).unwrap();
        let file_string = String::from_utf8_lossy(&file_contents);
        assert!(
            !file_string.contains("sensitive client"),
            "Database file should not contain plaintext data"
        );
    }

    #[test]
    fn test_checkpoint_flushes_wal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quill.db");
        let key = test_key("test", &generate_salt());

        let db = Database::open(&path, &key).unwrap();
        db.conn()
            .execute(
                "INSERT INTO clients (name, email, created_at) VALUES ('a', 'a@b.c', 0)",
                [],
            )
            .unwrap();
        db.checkpoint().unwrap();

        let wal = std::fs::metadata(dir.path().join("quill.db-wal"))
            .map(|m| m.len())
            .unwrap_or(0);
        assert_eq!(wal, 0, "WAL should be empty after a truncating checkpoint");
    }

    #[test]
    fn test_attach_and_detach_second_store() {
        let dir = TempDir::new().unwrap();
        let salt = generate_salt();
        let key = test_key("main", &salt);
        let other_key = test_key("other", &salt);

        let other_path = dir.path().join("other.db");
        let other = Database::open(&other_path, &other_key).unwrap();
        other
            .conn()
            .execute(
                "INSERT INTO clients (name, email, created_at) VALUES ('attached', 'a@b.c', 0)",
                [],
            )
            .unwrap();
        other.checkpoint().unwrap();
        drop(other);

        let db = Database::open(dir.path().join("quill.db"), &key).unwrap();
        db.attach_with_key(&other_path, "archive", &other_key).unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM archive.clients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        db.detach("archive").unwrap();
        assert!(db
            .conn()
            .query_row("SELECT COUNT(*) FROM archive.clients", [], |row| row
                .get::<_, i64>(0))
            .is_err());
    }

    #[test]
    fn test_alias_validation() {
        let dir = TempDir::new().unwrap();
        let key = test_key("main", &generate_salt());
        let db = Database::open(dir.path().join("quill.db"), &key).unwrap();

        let err = db.detach("archive; DROP TABLE clients").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rekey_allows_reopen_with_new_key_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quill.db");
        let salt = generate_salt();
        let old_key = test_key("old-passphrase", &salt);
        let new_key = test_key("new-passphrase", &salt);

        let db = Database::open(&path, &old_key).unwrap();
        db.conn()
            .execute(
                "INSERT INTO clients (name, email, created_at) VALUES ('kept', 'k@k.k', 0)",
                [],
            )
            .unwrap();
        db.rekey(&new_key).unwrap();
        db.checkpoint().unwrap();
        drop(db);

        assert!(Database::open_existing(&path, &old_key).is_err());

        let db = Database::open_existing(&path, &new_key).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_exclusive_transaction_rollback() {
        let dir = TempDir::new().unwrap();
        let key = test_key("main", &generate_salt());
        let db = Database::open(dir.path().join("quill.db"), &key).unwrap();

        db.begin_exclusive().unwrap();
        db.conn()
            .execute(
                "INSERT INTO clients (name, email, created_at) VALUES ('temp', 't@t.t', 0)",
                [],
            )
            .unwrap();
        db.rollback().unwrap();

        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM clients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
