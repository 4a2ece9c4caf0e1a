//! Data access layer

use crate::{models::*, Database, Result};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

/// User-data tables in foreign-key dependency order: tables without
/// foreign keys first, dependents after. Imports copy (and exports count)
/// tables in exactly this order.
pub const USER_TABLE_COPY_ORDER: &[&str] = &["clients", "projects", "proposals", "app_settings"];

/// Settings keys managed by the process itself. Imports never clobber
/// these rows regardless of mode.
pub const PROTECTED_SETTING_KEYS: &[&str] = &["installation_id", "onboarding_complete"];

/// Repository for database operations
pub struct Repository<'a> {
    db: &'a Database,
}

impl<'a> Repository<'a> {
    /// Create repository
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Insert a client, returning its row id
    pub fn insert_client(&self, client: &Client) -> Result<i64> {
        self.db.conn().execute(
            r#"
            INSERT INTO clients (name, email, company, archived, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                client.name,
                client.email,
                client.company,
                client.archived,
                client.created_at
            ],
        )?;
        Ok(self.db.conn().last_insert_rowid())
    }

    /// Insert a project, returning its row id
    pub fn insert_project(&self, project: &Project) -> Result<i64> {
        self.db.conn().execute(
            r#"
            INSERT INTO projects (client_id, title, currency, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                project.client_id,
                project.title,
                project.currency,
                project.created_at
            ],
        )?;
        Ok(self.db.conn().last_insert_rowid())
    }

    /// Insert a proposal, returning its row id
    pub fn insert_proposal(&self, proposal: &Proposal) -> Result<i64> {
        self.db.conn().execute(
            r#"
            INSERT INTO proposals (project_id, body, word_count, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                proposal.project_id,
                proposal.body,
                proposal.word_count,
                proposal.status.as_str(),
                proposal.created_at
            ],
        )?;
        Ok(self.db.conn().last_insert_rowid())
    }

    /// Set a setting value, inserting or replacing
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.db.conn().execute(
            "INSERT OR REPLACE INTO app_settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a setting value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .db
            .conn()
            .query_row(
                "SELECT value FROM app_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Lightweight per-table row counts over the user-data tables
    pub fn table_row_counts(&self) -> Result<BTreeMap<String, u64>> {
        table_row_counts(self.db.conn())
    }
}

/// Per-table row counts for the user-data tables of any connection (live
/// store or an attached archive schema).
pub fn table_row_counts(conn: &rusqlite::Connection) -> Result<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();
    for table in USER_TABLE_COPY_ORDER {
        let count: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table),
            [],
            |row| row.get::<_, i64>(0).map(|n| n as u64),
        )?;
        counts.insert((*table).to_string(), count);
    }
    Ok(counts)
}
