use serde::{Deserialize, Serialize};

/// Client configuration persisted as JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Token server endpoint that exchanges identity assertions for tokens.
    pub token_server_uri: String,
    /// Upper bound, in seconds, on any blocking wait over an async operation.
    pub auth_timeout_secs: u64,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
    /// File name of the places database inside the data directory.
    pub database_file: String,
    /// File name of the signed-in account description inside the config directory.
    pub account_file: String,
    /// Storage collection holding bookmark records.
    pub collection: String,
    /// Default `tracing` filter when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            token_server_uri: "https://token.services.mozilla.com/1.0/sync/1.5".to_string(),
            auth_timeout_secs: 30,
            request_timeout_secs: 30,
            database_file: "places.sqlite".to_string(),
            account_file: "account.json".to_string(),
            collection: "bookmarks".to_string(),
            log_filter: "info".to_string(),
        }
    }
}
