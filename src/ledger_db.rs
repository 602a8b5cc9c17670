use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::MigrationError;

const LEDGER_DATA_TABLES: &[&str] = &[
    "invoices",
    "payments",
    "bill_items",
    "invoice_bill_items",
    "migration_jobs",
];

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init.sql",
        include_str!("../db/migrations/0001_init.sql"),
    ),
    (
        "0002_add_invoice_bill_items.sql",
        include_str!("../db/migrations/0002_add_invoice_bill_items.sql"),
    ),
    (
        "0003_add_migration_jobs.sql",
        include_str!("../db/migrations/0003_add_migration_jobs.sql"),
    ),
];

#[derive(Debug, Serialize)]
pub struct LedgerDbStatus {
    pub db_path: String,
    pub exists: bool,
    pub migration_files: Vec<String>,
    pub applied_versions: Vec<String>,
    pub pending_versions: Vec<String>,
    pub schema_migrations_table_exists: bool,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerDbMigrateResult {
    pub db_path: String,
    pub created: bool,
    pub applied_now: Vec<String>,
    pub skipped: Vec<String>,
    pub applied_total: usize,
    pub pending_total: usize,
}

#[derive(Debug, Serialize)]
pub struct LedgerTableCountRow {
    pub table: String,
    pub row_count: i64,
}

fn ensure_schema_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
}

fn has_schema_migrations_table(conn: &Connection) -> rusqlite::Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_migrations')",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|v| v != 0)?;
    Ok(exists)
}

fn load_applied_versions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut versions = Vec::new();
    for row in rows {
        versions.push(row?);
    }
    Ok(versions)
}

fn list_non_system_tables(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut names = HashSet::new();
    for row in rows {
        names.insert(row?);
    }
    Ok(names)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn inspect_status_at_path(db_path: &Path) -> Result<LedgerDbStatus, MigrationError> {
    let migration_files = MIGRATIONS
        .iter()
        .map(|(v, _)| (*v).to_string())
        .collect::<Vec<_>>();
    if !db_path.exists() {
        return Ok(LedgerDbStatus {
            db_path: db_path.to_string_lossy().to_string(),
            exists: false,
            migration_files: migration_files.clone(),
            applied_versions: Vec::new(),
            pending_versions: migration_files,
            schema_migrations_table_exists: false,
            ready: false,
        });
    }

    let conn = Connection::open(db_path)?;
    let schema_table_exists = has_schema_migrations_table(&conn)?;
    let applied_versions = if schema_table_exists {
        load_applied_versions(&conn)?
    } else {
        Vec::new()
    };
    let applied_set = applied_versions.iter().cloned().collect::<HashSet<_>>();
    let pending_versions = migration_files
        .iter()
        .filter(|v| !applied_set.contains(*v))
        .cloned()
        .collect::<Vec<_>>();

    Ok(LedgerDbStatus {
        db_path: db_path.to_string_lossy().to_string(),
        exists: true,
        migration_files,
        applied_versions,
        ready: pending_versions.is_empty(),
        pending_versions,
        schema_migrations_table_exists: schema_table_exists,
    })
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<(Vec<String>, Vec<String>), MigrationError> {
    ensure_schema_migrations_table(conn)?;
    let already = load_applied_versions(conn)?
        .into_iter()
        .collect::<HashSet<_>>();

    let mut applied_now = Vec::new();
    let mut skipped = Vec::new();
    for (version, sql) in MIGRATIONS {
        if already.contains(*version) {
            skipped.push((*version).to_string());
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute(
            "INSERT INTO schema_migrations(version) VALUES (?1)",
            [*version],
        )?;
        tx.commit()?;
        tracing::info!(version = *version, "applied ledger migration");
        applied_now.push((*version).to_string());
    }
    Ok((applied_now, skipped))
}

fn open_with_foreign_keys(db_path: &Path) -> Result<Connection, MigrationError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

pub fn apply_embedded_migrations(db_path: &Path) -> Result<LedgerDbMigrateResult, MigrationError> {
    let created = !db_path.exists();
    let mut conn = open_with_foreign_keys(db_path)?;
    let (applied_now, skipped) = apply_pending_migrations(&mut conn)?;

    let final_applied_total = load_applied_versions(&conn)?.len();
    let pending_total = MIGRATIONS.len().saturating_sub(final_applied_total);

    Ok(LedgerDbMigrateResult {
        db_path: db_path.to_string_lossy().to_string(),
        created,
        applied_now,
        skipped,
        applied_total: final_applied_total,
        pending_total,
    })
}

/// Opens the ledger, creating it when missing, and brings the schema up to date.
pub fn open_migrated_ledger(db_path: &Path) -> Result<Connection, MigrationError> {
    let mut conn = open_with_foreign_keys(db_path)?;
    apply_pending_migrations(&mut conn)?;
    Ok(conn)
}

pub fn ledger_table_counts(conn: &Connection) -> Result<Vec<LedgerTableCountRow>, MigrationError> {
    let existing = list_non_system_tables(conn)?;
    let mut rows = Vec::new();
    for table in LEDGER_DATA_TABLES {
        if !existing.contains(*table) {
            continue;
        }
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let row_count = conn.query_row(&sql, [], |row| row.get::<_, i64>(0))?;
        rows.push(LedgerTableCountRow {
            table: (*table).to_string(),
            row_count,
        });
    }
    Ok(rows)
}
