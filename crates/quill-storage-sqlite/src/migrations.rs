//! Database schema migrations

use crate::{Error, Result};
use rusqlite::Connection;

/// Current schema version. A store is always migrated to this version on
/// open; archives record the version their store was at when exported.
pub const SCHEMA_VERSION: i32 = 7;

/// Run all migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    migrate_to(conn, SCHEMA_VERSION)
}

/// Migrate up to `target` and no further.
///
/// Exposed so tests and tooling can build stores at historical schema
/// versions; the application itself always migrates to [`SCHEMA_VERSION`].
pub fn migrate_to(conn: &Connection, target: i32) -> Result<()> {
    if target < 1 || target > SCHEMA_VERSION {
        return Err(Error::Migration(format!(
            "Target version {} out of range 1..={}",
            target, SCHEMA_VERSION
        )));
    }

    let current_version = stored_schema_version(conn)?;

    tracing::debug!(
        "Running migrations: current_version={}, target_version={}",
        current_version,
        target
    );

    if current_version < 1 && target >= 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 && target >= 2 {
        migrate_v2(conn)?;
    }

    if current_version < 3 && target >= 3 {
        migrate_v3(conn)?;
    }

    if current_version < 4 && target >= 4 {
        migrate_v4(conn)?;
    }

    if current_version < 5 && target >= 5 {
        migrate_v5(conn)?;
    }

    if current_version < 6 && target >= 6 {
        migrate_v6(conn)?;
    }

    if current_version < 7 && target >= 7 {
        migrate_v7(conn)?;
    }

    // Only set schema version if it changed (to avoid UNIQUE constraint errors)
    let final_version = stored_schema_version(conn)?;
    if final_version < target {
        set_schema_version(conn, target)?;
    }

    Ok(())
}

/// Read the schema version recorded in the store (0 for a fresh file)
pub fn stored_schema_version(conn: &Connection) -> Result<i32> {
    let result = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    match result {
        Ok(v) => Ok(v),
        Err(_) => Ok(0),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
        [],
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )?;

    tracing::debug!("Schema version set to {}", version);
    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE clients (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE projects (
            id INTEGER PRIMARY KEY,
            client_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (client_id) REFERENCES clients(id)
        );

        CREATE TABLE proposals (
            id INTEGER PRIMARY KEY,
            project_id INTEGER NOT NULL,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (project_id) REFERENCES projects(id)
        );

        CREATE TABLE app_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    // Process-managed settings seeded once per installation
    let installation_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO app_settings (key, value) VALUES ('installation_id', ?1)",
        [installation_id],
    )?;
    conn.execute(
        "INSERT INTO app_settings (key, value) VALUES ('onboarding_complete', '0')",
        [],
    )?;

    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX idx_projects_client ON projects(client_id);
        CREATE INDEX idx_proposals_project ON proposals(project_id);
        "#,
    )?;
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE clients ADD COLUMN company TEXT;")?;
    Ok(())
}

fn migrate_v4(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "ALTER TABLE proposals ADD COLUMN word_count INTEGER NOT NULL DEFAULT 0;",
    )?;
    Ok(())
}

fn migrate_v5(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE proposals ADD COLUMN status TEXT NOT NULL DEFAULT 'draft';")?;
    Ok(())
}

fn migrate_v6(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE clients ADD COLUMN archived INTEGER NOT NULL DEFAULT 0;")?;
    Ok(())
}

fn migrate_v7(conn: &Connection) -> Result<()> {
    conn.execute_batch("ALTER TABLE projects ADD COLUMN currency TEXT NOT NULL DEFAULT 'USD';")?;
    Ok(())
}
