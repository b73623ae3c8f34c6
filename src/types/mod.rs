// Shared type definitions
// Each submodule defines types used across the sync client.

pub mod bookmark;
pub mod errors;
pub mod record;
pub mod settings;
pub mod token;
