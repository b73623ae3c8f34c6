//! SQLite connection management for the places database.
//!
//! Provides the [`Database`] struct that wraps a `rusqlite::Connection`
//! and automatically runs schema migrations on open.

use rusqlite::{params, Connection};
use std::path::Path;

use super::migrations;

/// Owns the `rusqlite::Connection` holding the local bookmark tree.
///
/// Opening runs the migrations, so the well-known roots always exist.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) a SQLite database at the given file path and runs migrations.
    ///
    /// # Arguments
    /// * `path` - File system path where the SQLite database file will be stored.
    ///
    /// # Errors
    /// Returns `rusqlite::Error` if the connection cannot be established or migrations fail.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Opens an in-memory SQLite database and runs migrations.
    ///
    /// The database is discarded when the `Database` is dropped.
    ///
    /// # Errors
    /// Returns `rusqlite::Error` if the connection cannot be established or migrations fail.
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Runs all schema migrations, creating tables and indexes if they do not exist.
    ///
    /// Uses `CREATE TABLE IF NOT EXISTS` and `CREATE INDEX IF NOT EXISTS` so the
    /// method is idempotent and safe to call on every startup.
    fn run_migrations(&self) -> Result<(), rusqlite::Error> {
        migrations::run_all(&self.conn)
    }

    /// Returns a reference to the underlying `rusqlite::Connection`.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Reads the last-sync server timestamp for `collection` (0 if never synced).
    pub fn last_sync(&self, collection: &str) -> Result<f64, rusqlite::Error> {
        match self.conn.query_row(
            "SELECT last_sync FROM sync_meta WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        ) {
            Ok(ts) => Ok(ts),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0.0),
            Err(e) => Err(e),
        }
    }

    /// Records the last-sync server timestamp for `collection`.
    pub fn set_last_sync(&self, collection: &str, timestamp: f64) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT INTO sync_meta (collection, last_sync) VALUES (?1, ?2) \
             ON CONFLICT(collection) DO UPDATE SET last_sync = excluded.last_sync",
            params![collection, timestamp],
        )?;
        Ok(())
    }

    /// GUIDs recorded as changed for `collection`, in no particular order.
    pub fn changed_ids(&self, collection: &str) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT guid FROM sync_changes WHERE collection = ?1")?;
        let rows = stmt.query_map(params![collection], |row| row.get(0))?;
        rows.collect()
    }

    pub fn add_changed_id(&self, collection: &str, guid: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "INSERT OR IGNORE INTO sync_changes (collection, guid) VALUES (?1, ?2)",
            params![collection, guid],
        )?;
        Ok(())
    }

    pub fn remove_changed_id(&self, collection: &str, guid: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM sync_changes WHERE collection = ?1 AND guid = ?2",
            params![collection, guid],
        )?;
        Ok(())
    }

    pub fn clear_changed_ids(&self, collection: &str) -> Result<(), rusqlite::Error> {
        self.conn.execute(
            "DELETE FROM sync_changes WHERE collection = ?1",
            params![collection],
        )?;
        Ok(())
    }
}
