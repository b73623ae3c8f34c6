//! Schema migrations for the places database.
//!
//! Uses a `schema_version` table to track which migrations have been applied.
//! Each migration runs exactly once and is recorded with a timestamp.

use rusqlite::Connection;

/// Current schema version. Bump this when adding a new migration.
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Local ids of the well-known roots, fixed by migration v1.
pub const PLACES_ROOT_ID: i64 = 1;
pub const MENU_ROOT_ID: i64 = 2;
pub const TOOLBAR_ROOT_ID: i64 = 3;
pub const TAGS_ROOT_ID: i64 = 4;
pub const UNFILED_ROOT_ID: i64 = 5;

/// Returns the current schema version from the database (0 if table doesn't exist).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Runs all pending schema migrations against the provided connection.
///
/// Migrations are versioned: each runs exactly once and is recorded in
/// the `schema_version` table. Safe to call on every startup.
///
/// # Errors
/// Returns `rusqlite::Error` if any SQL statement fails.
pub fn run_all(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS schema_version (
             version INTEGER PRIMARY KEY,
             applied_at INTEGER NOT NULL,
             description TEXT NOT NULL
         );",
    )?;

    let current = get_schema_version(conn);

    if current < 1 {
        migration_v1(conn)?;
        record_version(conn, 1, "Places tree, annotations and well-known roots")?;
    }

    if current < 2 {
        migration_v2(conn)?;
        record_version(conn, 2, "Per-collection sync metadata")?;
    }

    if current < 3 {
        migration_v3(conn)?;
        record_version(conn, 3, "Pending local changes per collection")?;
    }

    Ok(())
}

fn record_version(conn: &Connection, version: i32, description: &str) -> Result<(), rusqlite::Error> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
        rusqlite::params![version, now, description],
    )?;
    Ok(())
}

/// V1: Items tree, annotations, and the five roots.
fn migration_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            parent INTEGER,
            position INTEGER NOT NULL DEFAULT 0,
            type INTEGER NOT NULL,
            title TEXT,
            url TEXT,
            keyword TEXT,
            date_added INTEGER NOT NULL DEFAULT 0,
            last_modified INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_items_parent ON items(parent, position);
        CREATE INDEX IF NOT EXISTS idx_items_url ON items(url);

        CREATE TABLE IF NOT EXISTS item_annos (
            item_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (item_id, name),
            FOREIGN KEY (item_id) REFERENCES items(id) ON DELETE CASCADE
        );

        INSERT OR IGNORE INTO items (id, guid, parent, position, type, title) VALUES
            (1, 'places', NULL, 0, 2, ''),
            (2, 'menu', 1, 0, 2, 'Bookmarks Menu'),
            (3, 'toolbar', 1, 1, 2, 'Bookmarks Toolbar'),
            (4, 'tags', 1, 2, 2, 'Tags'),
            (5, 'unfiled', 1, 3, 2, 'Other Bookmarks');
        ",
    )
}

/// V2: Last-sync server timestamps.
fn migration_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_meta (
            collection TEXT PRIMARY KEY,
            last_sync REAL NOT NULL DEFAULT 0
        );
        ",
    )
}

/// V3: GUIDs changed locally and not yet uploaded.
fn migration_v3(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sync_changes (
            collection TEXT NOT NULL,
            guid TEXT NOT NULL,
            PRIMARY KEY (collection, guid)
        );
        ",
    )
}
