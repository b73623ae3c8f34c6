use serde::{Deserialize, Serialize};

/// GUIDs of the well-known roots. These never change across devices.
pub const PLACES_ROOT_GUID: &str = "places";
pub const MENU_GUID: &str = "menu";
pub const TOOLBAR_GUID: &str = "toolbar";
pub const UNFILED_GUID: &str = "unfiled";
pub const TAGS_GUID: &str = "tags";

/// All well-known root GUIDs, in creation order.
pub const ROOT_GUIDS: [&str; 5] = [PLACES_ROOT_GUID, MENU_GUID, TOOLBAR_GUID, UNFILED_GUID, TAGS_GUID];

/// Annotation names understood by the places store and the sync layer.
pub mod annos {
    pub const DESCRIPTION: &str = "bookmarkProperties/description";
    pub const LOAD_IN_SIDEBAR: &str = "bookmarkProperties/loadInSidebar";
    pub const STATIC_TITLE: &str = "bookmarks/staticTitle";
    pub const LIVEMARK_FEED_URI: &str = "livemark/feedURI";
    pub const LIVEMARK_SITE_URI: &str = "livemark/siteURI";
    pub const MICROSUMMARY_GENERATOR_URI: &str = "microsummary/generatorURI";
    /// Intended parent GUID of an orphaned item, prefixed with `T`.
    pub const SYNC_PARENT: &str = "sync/parent";
}

/// Storage-level kind of a local tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemType {
    Bookmark,
    Folder,
    Separator,
}

impl ItemType {
    pub fn as_i64(self) -> i64 {
        match self {
            ItemType::Bookmark => 1,
            ItemType::Folder => 2,
            ItemType::Separator => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(ItemType::Bookmark),
            2 => Some(ItemType::Folder),
            3 => Some(ItemType::Separator),
            _ => None,
        }
    }
}

/// A row of the local places tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacesItem {
    pub id: i64,
    pub guid: String,
    /// `None` only for the places root.
    pub parent_id: Option<i64>,
    pub position: i64,
    pub item_type: ItemType,
    pub title: Option<String>,
    pub url: Option<String>,
}
