//! bookmark-sync: a bookmarks sync client.
//!
//! Mirrors a local places tree to a storage server, authenticating through a
//! token server and signing storage requests with HAWK. This library crate
//! exposes all modules for use by the binary and integration tests.

pub mod app;
pub mod database;
pub mod managers;
pub mod platform;
pub mod services;
pub mod types;
