//! Local places tree.
//!
//! SQLite-backed bookmark tree keyed by integer ids with stable GUIDs.
//! Tags are folders under the `tags` root holding one bookmark per tagged
//! URI; livemarks are folders annotated with site and feed URIs. Every
//! mutation is reported to registered [`BookmarkObserver`]s.

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Url;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::database::migrations::{
    MENU_ROOT_ID, TAGS_ROOT_ID, TOOLBAR_ROOT_ID, UNFILED_ROOT_ID,
};
use crate::database::Database;
use crate::types::bookmark::{annos, ItemType, PlacesItem};
use crate::types::errors::PlacesError;

/// Append at the end of the folder.
pub const DEFAULT_INDEX: i64 = -1;

/// Receives mutation notifications from a [`PlacesStore`].
///
/// Callbacks run synchronously on the mutating thread. `on_before_item_removed`
/// fires while the item still exists, so observers may inspect it.
pub trait BookmarkObserver {
    fn on_begin_update_batch(&self) {}
    fn on_end_update_batch(&self) {}
    fn on_item_added(&self, store: &PlacesStore, item_id: i64, folder: i64, index: i64);
    fn on_before_item_removed(&self, store: &PlacesStore, item_id: i64);
    fn on_item_changed(
        &self,
        store: &PlacesStore,
        item_id: i64,
        property: &str,
        is_anno: bool,
        value: &str,
    );
    fn on_item_moved(
        &self,
        store: &PlacesStore,
        item_id: i64,
        old_parent: i64,
        old_index: i64,
        new_parent: i64,
        new_index: i64,
    );
}

/// Bookmark tree backed by the places database.
pub struct PlacesStore {
    db: Arc<Database>,
    observers: RefCell<Vec<Arc<dyn BookmarkObserver>>>,
    batch_depth: Cell<u32>,
}

impl PlacesStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            observers: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn bookmarks_menu_folder(&self) -> i64 {
        MENU_ROOT_ID
    }

    pub fn toolbar_folder(&self) -> i64 {
        TOOLBAR_ROOT_ID
    }

    pub fn tags_folder(&self) -> i64 {
        TAGS_ROOT_ID
    }

    pub fn unfiled_bookmarks_folder(&self) -> i64 {
        UNFILED_ROOT_ID
    }

    /// Returns the current UNIX timestamp in seconds.
    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    /// Generates a fresh 12-character URL-safe GUID.
    pub fn make_guid() -> String {
        let uuid = Uuid::new_v4();
        URL_SAFE_NO_PAD.encode(&uuid.as_bytes()[..9])
    }

    // --- observers ---

    pub fn add_observer(&self, observer: Arc<dyn BookmarkObserver>) {
        self.observers.borrow_mut().push(observer);
    }

    fn notify(&self, f: impl Fn(&dyn BookmarkObserver)) {
        let observers: Vec<_> = self.observers.borrow().clone();
        for observer in observers {
            f(observer.as_ref());
        }
    }

    /// Runs `f` as one update batch. Nested batches collapse into the outermost.
    pub fn run_in_batch<T>(&self, f: impl FnOnce() -> T) -> T {
        let depth = self.batch_depth.get();
        self.batch_depth.set(depth + 1);
        if depth == 0 {
            self.notify(|o| o.on_begin_update_batch());
        }
        let result = f();
        self.batch_depth.set(depth);
        if depth == 0 {
            self.notify(|o| o.on_end_update_batch());
        }
        result
    }

    pub fn in_batch(&self) -> bool {
        self.batch_depth.get() > 0
    }

    // --- lookups ---

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<PlacesItem> {
        let raw_type: i64 = row.get(4)?;
        let item_type = ItemType::from_i64(raw_type)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, raw_type))?;
        Ok(PlacesItem {
            id: row.get(0)?,
            guid: row.get(1)?,
            parent_id: row.get(2)?,
            position: row.get(3)?,
            item_type,
            title: row.get(5)?,
            url: row.get(6)?,
        })
    }

    pub fn get_item(&self, item_id: i64) -> Result<Option<PlacesItem>, PlacesError> {
        Ok(self
            .db
            .connection()
            .query_row(
                "SELECT id, guid, parent, position, type, title, url FROM items WHERE id = ?1",
                params![item_id],
                Self::row_to_item,
            )
            .optional()?)
    }

    fn require_item(&self, item_id: i64) -> Result<PlacesItem, PlacesError> {
        self.get_item(item_id)?
            .ok_or(PlacesError::ItemNotFound(item_id))
    }

    pub fn id_for_guid(&self, guid: &str) -> Result<Option<i64>, PlacesError> {
        Ok(self
            .db
            .connection()
            .query_row(
                "SELECT id FROM items WHERE guid = ?1",
                params![guid],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn guid_for_id(&self, item_id: i64) -> Result<Option<String>, PlacesError> {
        Ok(self
            .db
            .connection()
            .query_row(
                "SELECT guid FROM items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Reassigns the GUID of an item. Fails if another item already owns it.
    pub fn set_item_guid(&self, item_id: i64, guid: &str) -> Result<(), PlacesError> {
        if let Some(owner) = self.id_for_guid(guid)? {
            if owner != item_id {
                return Err(PlacesError::GuidInUse(guid.to_string()));
            }
            return Ok(());
        }
        let affected = self.db.connection().execute(
            "UPDATE items SET guid = ?1 WHERE id = ?2",
            params![guid, item_id],
        )?;
        if affected == 0 {
            return Err(PlacesError::ItemNotFound(item_id));
        }
        Ok(())
    }

    pub fn item_type(&self, item_id: i64) -> Result<Option<ItemType>, PlacesError> {
        Ok(self.get_item(item_id)?.map(|item| item.item_type))
    }

    /// The parent column of an item. May name a folder that no longer exists.
    pub fn folder_id_for_item(&self, item_id: i64) -> Result<Option<i64>, PlacesError> {
        Ok(self.get_item(item_id)?.and_then(|item| item.parent_id))
    }

    pub fn item_title(&self, item_id: i64) -> Result<Option<String>, PlacesError> {
        Ok(self.require_item(item_id)?.title)
    }

    pub fn bookmark_uri(&self, item_id: i64) -> Result<Option<String>, PlacesError> {
        Ok(self.require_item(item_id)?.url)
    }

    pub fn keyword_for_bookmark(&self, item_id: i64) -> Result<Option<String>, PlacesError> {
        let keyword: Option<Option<String>> = self
            .db
            .connection()
            .query_row(
                "SELECT keyword FROM items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()?;
        keyword.ok_or(PlacesError::ItemNotFound(item_id))
    }

    /// Direct children of `folder_id`, ordered by position.
    pub fn children(&self, folder_id: i64) -> Result<Vec<PlacesItem>, PlacesError> {
        let mut stmt = self.db.connection().prepare(
            "SELECT id, guid, parent, position, type, title, url \
             FROM items WHERE parent = ?1 ORDER BY position, id",
        )?;
        let rows = stmt.query_map(params![folder_id], Self::row_to_item)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    fn is_descendant_of(&self, item_id: i64, ancestor: i64) -> Result<bool, PlacesError> {
        let mut current = Some(item_id);
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = self.folder_id_for_item(id)?;
        }
        Ok(false)
    }

    // --- positions ---

    fn require_folder(&self, folder_id: i64) -> Result<(), PlacesError> {
        match self.item_type(folder_id)? {
            Some(ItemType::Folder) => Ok(()),
            _ => Err(PlacesError::InvalidParent(folder_id)),
        }
    }

    fn next_position(&self, folder_id: i64) -> Result<i64, PlacesError> {
        Ok(self.db.connection().query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM items WHERE parent = ?1",
            params![folder_id],
            |row| row.get(0),
        )?)
    }

    /// Opens a gap at `index` (or returns the append slot for [`DEFAULT_INDEX`]).
    fn reserve_position(&self, folder_id: i64, index: i64) -> Result<i64, PlacesError> {
        let append = self.next_position(folder_id)?;
        if index < 0 || index >= append {
            return Ok(append);
        }
        self.db.connection().execute(
            "UPDATE items SET position = position + 1 WHERE parent = ?1 AND position >= ?2",
            params![folder_id, index],
        )?;
        Ok(index)
    }

    fn close_gap(&self, folder_id: i64, position: i64) -> Result<(), PlacesError> {
        self.db.connection().execute(
            "UPDATE items SET position = position - 1 WHERE parent = ?1 AND position > ?2",
            params![folder_id, position],
        )?;
        Ok(())
    }

    fn insert_item(
        &self,
        parent: i64,
        index: i64,
        item_type: ItemType,
        title: Option<&str>,
        url: Option<&str>,
    ) -> Result<i64, PlacesError> {
        self.require_folder(parent)?;
        let position = self.reserve_position(parent, index)?;
        let now = Self::now();
        let conn = self.db.connection();
        conn.execute(
            "INSERT INTO items (guid, parent, position, type, title, url, date_added, last_modified) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![Self::make_guid(), parent, position, item_type.as_i64(), title, url, now, now],
        )?;
        let id = conn.last_insert_rowid();
        self.notify(|o| o.on_item_added(self, id, parent, position));
        Ok(id)
    }

    fn touch(&self, item_id: i64) -> Result<(), PlacesError> {
        self.db.connection().execute(
            "UPDATE items SET last_modified = ?1 WHERE id = ?2",
            params![Self::now(), item_id],
        )?;
        Ok(())
    }

    // --- mutations ---

    pub fn insert_bookmark(
        &self,
        parent: i64,
        uri: &str,
        index: i64,
        title: Option<&str>,
    ) -> Result<i64, PlacesError> {
        let uri = validate_uri(uri)?;
        self.insert_item(parent, index, ItemType::Bookmark, title, Some(&uri))
    }

    pub fn create_folder(&self, parent: i64, title: &str, index: i64) -> Result<i64, PlacesError> {
        self.insert_item(parent, index, ItemType::Folder, Some(title), None)
    }

    pub fn insert_separator(&self, parent: i64, index: i64) -> Result<i64, PlacesError> {
        self.insert_item(parent, index, ItemType::Separator, None, None)
    }

    pub fn set_item_title(&self, item_id: i64, title: &str) -> Result<(), PlacesError> {
        let affected = self.db.connection().execute(
            "UPDATE items SET title = ?1, last_modified = ?2 WHERE id = ?3",
            params![title, Self::now(), item_id],
        )?;
        if affected == 0 {
            return Err(PlacesError::ItemNotFound(item_id));
        }
        self.notify(|o| o.on_item_changed(self, item_id, "title", false, title));
        Ok(())
    }

    pub fn change_bookmark_uri(&self, item_id: i64, uri: &str) -> Result<(), PlacesError> {
        let uri = validate_uri(uri)?;
        let affected = self.db.connection().execute(
            "UPDATE items SET url = ?1, last_modified = ?2 WHERE id = ?3 AND type = ?4",
            params![uri, Self::now(), item_id, ItemType::Bookmark.as_i64()],
        )?;
        if affected == 0 {
            return Err(PlacesError::ItemNotFound(item_id));
        }
        self.notify(|o| o.on_item_changed(self, item_id, "uri", false, &uri));
        Ok(())
    }

    /// Sets or clears (`None` or empty) the keyword of a bookmark.
    pub fn set_keyword_for_bookmark(
        &self,
        item_id: i64,
        keyword: Option<&str>,
    ) -> Result<(), PlacesError> {
        let keyword = keyword.filter(|k| !k.is_empty());
        let affected = self.db.connection().execute(
            "UPDATE items SET keyword = ?1, last_modified = ?2 WHERE id = ?3",
            params![keyword, Self::now(), item_id],
        )?;
        if affected == 0 {
            return Err(PlacesError::ItemNotFound(item_id));
        }
        self.notify(|o| {
            o.on_item_changed(self, item_id, "keyword", false, keyword.unwrap_or(""))
        });
        Ok(())
    }

    /// Moves an item to `new_parent` at `index`. Moving a folder into its own
    /// subtree is rejected.
    pub fn move_item(&self, item_id: i64, new_parent: i64, index: i64) -> Result<(), PlacesError> {
        let item = self.require_item(item_id)?;
        self.require_folder(new_parent)?;
        if self.is_descendant_of(new_parent, item_id)? {
            return Err(PlacesError::InvalidParent(new_parent));
        }

        let old_parent = item.parent_id.unwrap_or(-1);
        let old_index = item.position;
        if old_parent >= 0 {
            self.close_gap(old_parent, old_index)?;
        }
        // Park the item so it does not count toward the destination's slots.
        self.db.connection().execute(
            "UPDATE items SET parent = NULL WHERE id = ?1",
            params![item_id],
        )?;
        let new_index = self.reserve_position(new_parent, index)?;
        self.db.connection().execute(
            "UPDATE items SET parent = ?1, position = ?2, last_modified = ?3 WHERE id = ?4",
            params![new_parent, new_index, Self::now(), item_id],
        )?;
        self.notify(|o| {
            o.on_item_moved(self, item_id, old_parent, old_index, new_parent, new_index)
        });
        Ok(())
    }

    /// Removes a bookmark or separator. Folders are removed with their contents.
    pub fn remove_item(&self, item_id: i64) -> Result<(), PlacesError> {
        let item = self.require_item(item_id)?;
        if item.item_type == ItemType::Folder {
            return self.remove_folder(item_id);
        }
        self.delete_row(&item)
    }

    /// Removes a folder and everything below it, children first.
    pub fn remove_folder(&self, folder_id: i64) -> Result<(), PlacesError> {
        let folder = self.require_item(folder_id)?;
        self.remove_folder_children(folder_id)?;
        self.delete_row(&folder)
    }

    pub fn remove_folder_children(&self, folder_id: i64) -> Result<(), PlacesError> {
        for child in self.children(folder_id)?.into_iter().rev() {
            if child.item_type == ItemType::Folder {
                self.remove_folder(child.id)?;
            } else {
                self.delete_row(&child)?;
            }
        }
        Ok(())
    }

    fn delete_row(&self, item: &PlacesItem) -> Result<(), PlacesError> {
        self.notify(|o| o.on_before_item_removed(self, item.id));
        // Positions in `item` may be stale after earlier sibling removals.
        let current = self.require_item(item.id)?;
        self.db
            .connection()
            .execute("DELETE FROM items WHERE id = ?1", params![current.id])?;
        if let Some(parent) = current.parent_id {
            self.close_gap(parent, current.position)?;
        }
        Ok(())
    }

    // --- annotations ---

    pub fn set_item_annotation(&self, item_id: i64, name: &str, value: &str) -> Result<(), PlacesError> {
        self.require_item(item_id)?;
        self.db.connection().execute(
            "INSERT INTO item_annos (item_id, name, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT(item_id, name) DO UPDATE SET value = excluded.value",
            params![item_id, name, value],
        )?;
        self.touch(item_id)?;
        self.notify(|o| o.on_item_changed(self, item_id, name, true, value));
        Ok(())
    }

    pub fn get_item_annotation(&self, item_id: i64, name: &str) -> Result<Option<String>, PlacesError> {
        Ok(self
            .db
            .connection()
            .query_row(
                "SELECT value FROM item_annos WHERE item_id = ?1 AND name = ?2",
                params![item_id, name],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn item_has_annotation(&self, item_id: i64, name: &str) -> Result<bool, PlacesError> {
        Ok(self.get_item_annotation(item_id, name)?.is_some())
    }

    /// Removing an absent annotation is a no-op.
    pub fn remove_item_annotation(&self, item_id: i64, name: &str) -> Result<(), PlacesError> {
        let affected = self.db.connection().execute(
            "DELETE FROM item_annos WHERE item_id = ?1 AND name = ?2",
            params![item_id, name],
        )?;
        if affected > 0 {
            self.touch(item_id)?;
            self.notify(|o| o.on_item_changed(self, item_id, name, true, ""));
        }
        Ok(())
    }

    /// All `(item_id, value)` pairs carrying annotation `name`.
    pub fn items_with_annotation(&self, name: &str) -> Result<Vec<(i64, String)>, PlacesError> {
        let mut stmt = self
            .db
            .connection()
            .prepare("SELECT item_id, value FROM item_annos WHERE name = ?1 ORDER BY item_id")?;
        let rows = stmt.query_map(params![name], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    // --- tags ---

    fn tag_folder(&self, tag: &str) -> Result<Option<i64>, PlacesError> {
        Ok(self
            .children(TAGS_ROOT_ID)?
            .into_iter()
            .find(|f| f.item_type == ItemType::Folder && f.title.as_deref() == Some(tag))
            .map(|f| f.id))
    }

    /// Tags `uri` with each non-empty tag, creating tag folders as needed.
    pub fn tag_uri(&self, uri: &str, tags: &[String]) -> Result<(), PlacesError> {
        let uri = validate_uri(uri)?;
        for tag in tags.iter().filter(|t| !t.is_empty()) {
            let folder = match self.tag_folder(tag)? {
                Some(id) => id,
                None => self.create_folder(TAGS_ROOT_ID, tag, DEFAULT_INDEX)?,
            };
            let tagged = self
                .children(folder)?
                .iter()
                .any(|c| c.url.as_deref() == Some(uri.as_str()));
            if !tagged {
                self.insert_bookmark(folder, &uri, DEFAULT_INDEX, None)?;
            }
        }
        Ok(())
    }

    /// Removes `tags` from `uri` (all tags when `None`). Tag folders left
    /// empty are removed.
    pub fn untag_uri(&self, uri: &str, tags: Option<&[String]>) -> Result<(), PlacesError> {
        let uri = validate_uri(uri)?;
        for folder in self.children(TAGS_ROOT_ID)? {
            let title = folder.title.clone().unwrap_or_default();
            if let Some(wanted) = tags {
                if !wanted.iter().any(|t| *t == title) {
                    continue;
                }
            }
            let children = self.children(folder.id)?;
            let mut remaining = children.len();
            for child in children {
                if child.url.as_deref() == Some(uri.as_str()) {
                    self.delete_row(&child)?;
                    remaining -= 1;
                }
            }
            if remaining == 0 {
                self.delete_row(&folder)?;
            }
        }
        Ok(())
    }

    /// Sorted tag names applied to `uri`.
    pub fn tags_for_uri(&self, uri: &str) -> Result<Vec<String>, PlacesError> {
        let uri = validate_uri(uri)?;
        let mut tags = Vec::new();
        for folder in self.children(TAGS_ROOT_ID)? {
            let tagged = self
                .children(folder.id)?
                .iter()
                .any(|c| c.url.as_deref() == Some(uri.as_str()));
            if tagged {
                tags.push(folder.title.unwrap_or_default());
            }
        }
        tags.sort();
        Ok(tags)
    }

    // --- livemarks ---

    pub fn create_livemark(
        &self,
        parent: i64,
        title: &str,
        site_uri: Option<&str>,
        feed_uri: &str,
        index: i64,
    ) -> Result<i64, PlacesError> {
        let feed_uri = validate_uri(feed_uri)?;
        let site_uri = site_uri.map(validate_uri).transpose()?;
        let id = self.create_folder(parent, title, index)?;
        self.set_item_annotation(id, annos::LIVEMARK_FEED_URI, &feed_uri)?;
        if let Some(site) = site_uri {
            self.set_item_annotation(id, annos::LIVEMARK_SITE_URI, &site)?;
        }
        Ok(id)
    }

    pub fn is_livemark(&self, item_id: i64) -> Result<bool, PlacesError> {
        self.item_has_annotation(item_id, annos::LIVEMARK_FEED_URI)
    }

    pub fn livemark_site_uri(&self, item_id: i64) -> Result<Option<String>, PlacesError> {
        self.get_item_annotation(item_id, annos::LIVEMARK_SITE_URI)
    }

    pub fn livemark_feed_uri(&self, item_id: i64) -> Result<Option<String>, PlacesError> {
        self.get_item_annotation(item_id, annos::LIVEMARK_FEED_URI)
    }

    pub fn set_livemark_site_uri(&self, item_id: i64, uri: &str) -> Result<(), PlacesError> {
        let uri = validate_uri(uri)?;
        self.set_item_annotation(item_id, annos::LIVEMARK_SITE_URI, &uri)
    }

    pub fn set_livemark_feed_uri(&self, item_id: i64, uri: &str) -> Result<(), PlacesError> {
        let uri = validate_uri(uri)?;
        self.set_item_annotation(item_id, annos::LIVEMARK_FEED_URI, &uri)
    }
}

/// Checks that `uri` parses as an absolute URI and returns it unchanged.
pub fn validate_uri(uri: &str) -> Result<String, PlacesError> {
    Url::parse(uri)
        .map(|_| uri.to_string())
        .map_err(|e| PlacesError::InvalidUri(format!("{}: {}", uri, e)))
}
