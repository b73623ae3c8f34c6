//! Places database layer.
//!
//! Provides SQLite connection management, schema migrations, and the
//! per-collection sync metadata.
//!
//! # Usage
//!
//! ```no_run
//! use bookmark_sync::database::Database;
//!
//! let db = Database::open("places.sqlite").expect("failed to open database");
//! let last = db.last_sync("bookmarks").expect("failed to read sync metadata");
//! assert!(last >= 0.0);
//! ```

pub mod connection;
pub mod migrations;

pub use connection::Database;
