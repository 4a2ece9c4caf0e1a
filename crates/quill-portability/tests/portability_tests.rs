//! End-to-end portability scenarios
//!
//! Exercises the full export → archive → import pipeline across stores
//! with different passphrases and schema versions.

use parking_lot::Mutex;
use quill_portability::{
    read_full, write_archive, ArchiveMetadata, BackupProvider, CancelFlag, ExportOrchestrator,
    ImportMode, ImportOrchestrator, ProgressSender, Result, SchemaCompatibility,
    ARCHIVE_FORMAT_VERSION,
};
use quill_portability::temp::ExtractionDir;
use quill_storage_sqlite::{
    load_or_create_salt, migrations, table_row_counts, Client, Database, EncryptionKey, Project,
    Proposal, ProposalStatus, Repository, SharedDatabase,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

struct OkBackup;

impl BackupProvider for OkBackup {
    fn create_full_backup(&self) -> Result<()> {
        Ok(())
    }
}

fn open_store(dir: &TempDir, name: &str, passphrase: &str) -> SharedDatabase {
    let db_path = dir.path().join(name);
    let salt = load_or_create_salt(&db_path).unwrap();
    let key = EncryptionKey::from_passphrase(passphrase, &salt).unwrap();
    Arc::new(Mutex::new(Database::open(&db_path, &key).unwrap()))
}

fn seed_scenario_rows(db: &SharedDatabase) {
    let db = db.lock();
    let repo = Repository::new(&db);

    let mut client_ids = Vec::new();
    for i in 0..47 {
        client_ids.push(
            repo.insert_client(&Client {
                id: None,
                name: format!("client-{}", i),
                email: format!("client{}@example.com", i),
                company: (i % 3 == 0).then(|| "Acme".to_string()),
                archived: false,
                created_at: 1_700_000_000 + i,
            })
            .unwrap(),
        );
    }

    let mut project_ids = Vec::new();
    for i in 0..12 {
        project_ids.push(
            repo.insert_project(&Project {
                id: None,
                client_id: client_ids[(i as usize) % client_ids.len()],
                title: format!("project-{}", i),
                currency: "EUR".to_string(),
                created_at: 1_700_000_100 + i,
            })
            .unwrap(),
        );
    }

    repo.insert_proposal(&Proposal {
        id: None,
        project_id: project_ids[0],
        body: "Lone proposal".to_string(),
        word_count: 2,
        status: ProposalStatus::Sent,
        created_at: 1_700_000_200,
    })
    .unwrap();

    // 2 seeded process-managed settings + 83 user preferences = 85
    for i in 0..83 {
        repo.set_setting(&format!("pref_{}", i), &format!("value-{}", i)).unwrap();
    }
}

fn export(dir: &TempDir, db: &SharedDatabase) -> PathBuf {
    let orchestrator = ExportOrchestrator::new(db.clone(), "0.1.0", ProgressSender::disabled());
    let dest = dir.path().join("backup.qarc");
    orchestrator.export_archive(&dest, None).unwrap();
    dest
}

fn importer(dir: &TempDir, db: &SharedDatabase) -> ImportOrchestrator {
    ImportOrchestrator::new(
        db.clone(),
        ExtractionDir::new(dir.path().join("extract")).unwrap(),
        Arc::new(OkBackup),
        ProgressSender::disabled(),
    )
}

fn live_counts(db: &SharedDatabase) -> BTreeMap<String, u64> {
    let db = db.lock();
    table_row_counts(db.conn()).unwrap()
}

#[test]
fn test_export_counts_match_store_contents() {
    let dir = TempDir::new().unwrap();
    let source = open_store(&dir, "source.db", "source-pass");
    seed_scenario_rows(&source);

    let orchestrator = ExportOrchestrator::new(source, "0.1.0", ProgressSender::disabled());
    let dest = dir.path().join("backup.qarc");
    let summary = orchestrator.export_archive(&dest, None).unwrap();

    assert_eq!(summary.table_counts["clients"], 47);
    assert_eq!(summary.table_counts["projects"], 12);
    assert_eq!(summary.table_counts["proposals"], 1);
    assert_eq!(summary.table_counts["app_settings"], 85);
}

#[test]
fn test_merge_into_fresh_store_then_remerge() {
    let dir = TempDir::new().unwrap();
    let source = open_store(&dir, "source.db", "source-pass");
    seed_scenario_rows(&source);
    let archive_path = export(&dir, &source);

    let target = open_store(&dir, "target.db", "target-pass");
    let imp = importer(&dir, &target);
    let cancel = CancelFlag::new();

    let first = imp
        .execute_import(
            &archive_path,
            "source-pass",
            ImportMode::MergeSkipDuplicates,
            &cancel,
        )
        .unwrap();

    assert_eq!(first.table("clients").unwrap().imported, 47);
    assert_eq!(first.table("projects").unwrap().imported, 12);
    assert_eq!(first.table("proposals").unwrap().imported, 1);
    // The fresh store already carries its own process-managed settings
    // rows, which existing-keys-win semantics preserve
    assert_eq!(first.table("app_settings").unwrap().imported, 83);
    assert_eq!(first.table("app_settings").unwrap().skipped, 2);
    for table in ["clients", "projects", "proposals"] {
        assert_eq!(first.table(table).unwrap().skipped, 0);
    }

    // Re-running the same merge imports nothing and skips everything
    let second = imp
        .execute_import(
            &archive_path,
            "source-pass",
            ImportMode::MergeSkipDuplicates,
            &cancel,
        )
        .unwrap();
    assert_eq!(second.total_imported, 0);
    assert_eq!(second.table("clients").unwrap().skipped, 47);
    assert_eq!(second.table("projects").unwrap().skipped, 12);
    assert_eq!(second.table("proposals").unwrap().skipped, 1);
    assert_eq!(second.table("app_settings").unwrap().skipped, 85);

    // Row counts did not move between the runs
    let counts = live_counts(&target);
    assert_eq!(counts["clients"], 47);
    assert_eq!(counts["projects"], 12);
    assert_eq!(counts["proposals"], 1);
    assert_eq!(counts["app_settings"], 85);
}

#[test]
fn test_replace_all_yields_archive_state() {
    let dir = TempDir::new().unwrap();
    let source = open_store(&dir, "source.db", "source-pass");
    seed_scenario_rows(&source);
    let archive_path = export(&dir, &source);

    let target = open_store(&dir, "target.db", "target-pass");
    {
        let db = target.lock();
        let repo = Repository::new(&db);
        repo.insert_client(&Client {
            id: None,
            name: "pre-existing".to_string(),
            email: "pre@existing.com".to_string(),
            company: None,
            archived: false,
            created_at: 1,
        })
        .unwrap();
    }

    let imp = importer(&dir, &target);
    imp.execute_import(
        &archive_path,
        "source-pass",
        ImportMode::ReplaceAll,
        &CancelFlag::new(),
    )
    .unwrap();

    let counts = live_counts(&target);
    assert_eq!(counts["clients"], 47);
    assert_eq!(counts["projects"], 12);
    assert_eq!(counts["proposals"], 1);

    // The pre-existing live client is gone
    let db = target.lock();
    let pre_existing: i64 = db
        .conn()
        .query_row(
            "SELECT COUNT(*) FROM clients WHERE name = 'pre-existing'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(pre_existing, 0);
}

/// Build an encrypted store frozen at schema v5 (two versions behind),
/// before `clients.archived` and `projects.currency` existed, and archive
/// it through the codec exactly as an old release would have.
fn build_v5_archive(dir: &TempDir, passphrase: &str) -> PathBuf {
    let db_path = dir.path().join("old-source.db");
    let salt = load_or_create_salt(&db_path).unwrap();
    let key = EncryptionKey::from_passphrase(passphrase, &salt).unwrap();

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let _ = conn.execute(&format!("PRAGMA key = '{}';", hex::encode(key.as_bytes())), []);
    conn.execute_batch("PRAGMA journal_mode=WAL;").unwrap();
    migrations::migrate_to(&conn, 5).unwrap();

    conn.execute(
        "INSERT INTO clients (name, email, company, created_at) VALUES ('old client', 'old@example.com', NULL, 1)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO projects (client_id, title, created_at) VALUES (1, 'old project', 2)",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO proposals (project_id, body, word_count, status, created_at) VALUES (1, 'old body', 2, 'sent', 3)",
        [],
    )
    .unwrap();

    let _busy: i64 = conn
        .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))
        .unwrap();
    let table_counts = table_row_counts(&conn).unwrap();
    drop(conn);

    let db_bytes = std::fs::read(&db_path).unwrap();
    let metadata = ArchiveMetadata {
        format_version: ARCHIVE_FORMAT_VERSION,
        app_version: "0.0.9".to_string(),
        schema_version: 5,
        exported_at: "2025-01-15T09:00:00Z".to_string(),
        passphrase_hint: None,
        table_counts,
        db_size_bytes: db_bytes.len() as u64,
    };

    let archive_path = dir.path().join("old-backup.qarc");
    write_archive(&archive_path, &metadata, &salt, &db_bytes).unwrap();
    archive_path
}

#[test]
fn test_older_archive_fills_missing_not_null_columns() {
    let dir = TempDir::new().unwrap();
    let archive_path = build_v5_archive(&dir, "old-pass");

    let target = open_store(&dir, "target.db", "target-pass");
    let imp = importer(&dir, &target);

    // Preview reports the archive as older
    let preview = imp.decrypt_and_preview(&archive_path, "old-pass").unwrap();
    assert_eq!(
        preview.schema_compat,
        SchemaCompatibility::OlderArchive { version: 5 }
    );

    let summary = imp
        .execute_import(
            &archive_path,
            "old-pass",
            ImportMode::MergeSkipDuplicates,
            &CancelFlag::new(),
        )
        .unwrap();
    assert_eq!(summary.table("clients").unwrap().imported, 1);
    assert_eq!(summary.table("projects").unwrap().imported, 1);
    assert_eq!(summary.table("proposals").unwrap().imported, 1);

    // Columns added after v5 carry their documented defaults
    let db = target.lock();
    let (name, archived): (String, i64) = db
        .conn()
        .query_row(
            "SELECT name, archived FROM clients WHERE name = 'old client'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(name, "old client");
    assert_eq!(archived, 0);

    let currency: String = db
        .conn()
        .query_row(
            "SELECT currency FROM projects WHERE title = 'old project'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(currency, "USD");
}

#[test]
fn test_archive_roundtrip_through_export() {
    let dir = TempDir::new().unwrap();
    let source = open_store(&dir, "source.db", "pass");
    seed_scenario_rows(&source);
    let archive_path = export(&dir, &source);

    let (metadata, salt, payload) = read_full(&archive_path).unwrap();
    assert_eq!(metadata.format_version, ARCHIVE_FORMAT_VERSION);
    assert_eq!(metadata.schema_version, migrations::SCHEMA_VERSION);
    assert_eq!(metadata.db_size_bytes, payload.len() as u64);
    assert!(!salt.is_empty());
}

#[test]
fn test_import_summary_totals_are_consistent() {
    let dir = TempDir::new().unwrap();
    let source = open_store(&dir, "source.db", "pass");
    seed_scenario_rows(&source);
    let archive_path = export(&dir, &source);

    let target = open_store(&dir, "target.db", "other");
    let imp = importer(&dir, &target);
    let summary = imp
        .execute_import(
            &archive_path,
            "pass",
            ImportMode::MergeSkipDuplicates,
            &CancelFlag::new(),
        )
        .unwrap();

    let imported: u64 = summary.tables.iter().map(|t| t.imported).sum();
    let skipped: u64 = summary.tables.iter().map(|t| t.skipped).sum();
    assert_eq!(summary.total_imported, imported);
    assert_eq!(summary.total_skipped, skipped);
    assert_eq!(imported + skipped, 47 + 12 + 1 + 85);
}

#[test]
fn test_preview_does_not_disturb_live_store() {
    let dir = TempDir::new().unwrap();
    let source = open_store(&dir, "source.db", "pass");
    seed_scenario_rows(&source);
    let archive_path = export(&dir, &source);

    let target = open_store(&dir, "target.db", "other");
    let before = live_counts(&target);

    let imp = importer(&dir, &target);
    let preview = imp.decrypt_and_preview(&archive_path, "pass").unwrap();
    assert_eq!(preview.metadata.table_counts["clients"], 47);
    assert_eq!(preview.table_counts_current, before);
    assert_eq!(live_counts(&target), before);
}
