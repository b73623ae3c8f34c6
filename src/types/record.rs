use serde::{Deserialize, Serialize};

/// Record taxonomy on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Bookmark,
    Query,
    Microsummary,
    Folder,
    Livemark,
    Separator,
    #[default]
    Item,
    #[serde(other)]
    Unknown,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Bookmark => "bookmark",
            RecordKind::Query => "query",
            RecordKind::Microsummary => "microsummary",
            RecordKind::Folder => "folder",
            RecordKind::Livemark => "livemark",
            RecordKind::Separator => "separator",
            RecordKind::Item => "item",
            RecordKind::Unknown => "unknown",
        }
    }
}

/// Portable representation of one places tree node.
///
/// Every payload field is optional: an incoming record only changes the
/// fields it carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacesRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parentid: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: RecordKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmk_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_in_sidebar: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl PlacesRecord {
    pub fn new(id: &str, parentid: Option<&str>, kind: RecordKind) -> Self {
        Self {
            id: id.to_string(),
            parentid: parentid.map(str::to_string),
            kind,
            ..Default::default()
        }
    }

    /// A deletion marker for `id`.
    pub fn tombstone(id: &str) -> Self {
        Self {
            id: id.to_string(),
            deleted: true,
            ..Default::default()
        }
    }
}

/// Encrypted envelope stored in a server record's `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 ciphertext without the GCM tag.
    pub ciphertext: String,
    #[serde(rename = "IV")]
    pub iv: String,
    /// Base64 GCM authentication tag.
    pub tag: String,
    /// Hex HMAC-SHA256 over the base64 ciphertext, keyed by the bundle's HMAC key.
    pub hmac: String,
}

/// A record as held by the storage server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    /// Server timestamp in seconds.
    #[serde(default)]
    pub modified: f64,
    pub payload: String,
}

/// Outcome of a storage upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Server timestamp of the write.
    #[serde(default)]
    pub modified: f64,
    #[serde(default)]
    pub success: Vec<String>,
    #[serde(default)]
    pub failed: std::collections::HashMap<String, Vec<String>>,
}
