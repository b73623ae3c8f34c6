//! Translation between the local places tree and sync records.
//!
//! Incoming records are applied to the tree with orphan handling: an item
//! whose parent has not arrived yet is filed under `unfiled` and annotated
//! with the parent it wants, and [`SyncStore::reparent_orphans`] moves it
//! once that parent exists.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use crate::managers::places_store::{PlacesStore, DEFAULT_INDEX};
use crate::types::bookmark::{
    annos, ItemType, PlacesItem, PLACES_ROOT_GUID, ROOT_GUIDS, TAGS_GUID, UNFILED_GUID,
};
use crate::types::errors::StoreError;
use crate::types::record::{PlacesRecord, RecordKind};

/// Throwaway URI tagged while resolving a query's tag folder.
const PREPROCESS_DUMMY_URI: &str = "about:bookmark-sync#preprocess";

/// Throwaway URI that keeps tag folders alive while a bookmark is retagged.
const TAG_DUMMY_URI: &str = "about:bookmark-sync#tag-uri";

/// Prefix stored before the intended parent GUID in the orphan annotation.
const ORPHAN_PREFIX: char = 'T';

/// Trait defining what the sync engine needs from a record store.
pub trait SyncStore {
    fn item_exists(&self, guid: &str) -> Result<bool, StoreError>;

    /// Applies one incoming record to the local tree.
    fn apply_incoming(&self, record: PlacesRecord) -> Result<(), StoreError>;

    /// Serializes the local item `guid`. Unknown GUIDs yield a tombstone.
    fn create_record(&self, guid: &str) -> Result<PlacesRecord, StoreError>;

    fn change_item_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError>;

    /// Every GUID reachable from the synced roots.
    fn get_all_ids(&self) -> Result<HashSet<String>, StoreError>;

    /// Removes all synced content.
    fn wipe(&self) -> Result<(), StoreError>;

    /// Moves orphans under parents that have since arrived. Returns how many moved.
    fn reparent_orphans(&self) -> Result<usize, StoreError>;

    fn clear_cache(&self);

    /// Runs `f` inside the local store's batch scope.
    fn run_in_batch<R>(&self, f: impl FnOnce() -> R) -> R;
}

/// Optional live-title capability. Stores without it still sync
/// microsummary records as plain bookmarks with a static title.
pub trait MicrosummaryService {
    /// Generator URI bound to `item_id`, if it has a microsummary.
    fn generator_for(&self, places: &PlacesStore, item_id: i64) -> Result<Option<String>, StoreError>;

    /// Binds `generator_uri` to the bookmark. Fails with
    /// [`StoreError::GeneratorNotFound`] if no such generator is installed.
    fn set_microsummary(
        &self,
        places: &PlacesStore,
        item_id: i64,
        page_uri: &str,
        generator_uri: &str,
    ) -> Result<(), StoreError>;
}

/// Microsummaries recorded as item annotations, restricted to a set of
/// installed generators.
#[derive(Debug, Default)]
pub struct AnnotationMicrosummaries {
    generators: HashSet<String>,
}

impl AnnotationMicrosummaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_generator(&mut self, uri: &str) {
        self.generators.insert(uri.to_string());
    }
}

impl MicrosummaryService for AnnotationMicrosummaries {
    fn generator_for(&self, places: &PlacesStore, item_id: i64) -> Result<Option<String>, StoreError> {
        Ok(places.get_item_annotation(item_id, annos::MICROSUMMARY_GENERATOR_URI)?)
    }

    fn set_microsummary(
        &self,
        places: &PlacesStore,
        item_id: i64,
        _page_uri: &str,
        generator_uri: &str,
    ) -> Result<(), StoreError> {
        if !self.generators.contains(generator_uri) {
            return Err(StoreError::GeneratorNotFound(generator_uri.to_string()));
        }
        places.set_item_annotation(item_id, annos::MICROSUMMARY_GENERATOR_URI, generator_uri)?;
        Ok(())
    }
}

/// Record store for the bookmarks collection.
pub struct BookmarksStore {
    places: Rc<PlacesStore>,
    microsummaries: Option<Box<dyn MicrosummaryService>>,
    cache: RefCell<HashMap<String, PlacesRecord>>,
}

impl BookmarksStore {
    pub fn new(places: Rc<PlacesStore>) -> Self {
        Self {
            places,
            microsummaries: None,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn with_microsummaries(mut self, service: Box<dyn MicrosummaryService>) -> Self {
        self.microsummaries = Some(service);
        self
    }

    pub fn places(&self) -> &Rc<PlacesStore> {
        &self.places
    }

    /// Resolves a query's `folderName` into the local tag folder id and
    /// rewrites the `folder=` reference in its URI.
    fn preprocess_query(&self, record: &mut PlacesRecord) -> Result<(), StoreError> {
        let (Some(uri), Some(tag)) = (record.bmk_uri.as_deref(), record.folder_name.as_deref()) else {
            return Ok(());
        };

        // Tagging something guarantees the tag folder exists.
        self.places.tag_uri(PREPROCESS_DUMMY_URI, &[tag.to_string()])?;

        let tag_folder = self
            .places
            .children(self.places.tags_folder())?
            .into_iter()
            .find(|child| child.title.as_deref() == Some(tag));
        if let Some(folder) = tag_folder {
            debug!(tag, folder = folder.id, "query folder");
            if let Some(rewritten) = rewrite_query_folder(uri, folder.id) {
                record.bmk_uri = Some(rewritten);
            }
        }
        Ok(())
    }

    fn create(&self, record: &PlacesRecord, parent: Option<i64>) -> Result<(), StoreError> {
        let parent = parent.ok_or(StoreError::MissingField("parentid"))?;
        let new_id = match record.kind {
            RecordKind::Bookmark | RecordKind::Query | RecordKind::Microsummary => {
                let uri = record.bmk_uri.as_deref().ok_or(StoreError::MissingField("bmkUri"))?;
                debug!(title = ?record.title, uri, parent, "creating bookmark");
                let id = self
                    .places
                    .insert_bookmark(parent, uri, DEFAULT_INDEX, record.title.as_deref())?;
                if let Some(tags) = &record.tags {
                    self.tag_uri(uri, tags)?;
                }
                self.places.set_keyword_for_bookmark(id, record.keyword.as_deref())?;
                if let Some(description) = record.description.as_deref().filter(|d| !d.is_empty()) {
                    self.places.set_item_annotation(id, annos::DESCRIPTION, description)?;
                }
                if record.load_in_sidebar == Some(true) {
                    self.places.set_item_annotation(id, annos::LOAD_IN_SIDEBAR, "true")?;
                }
                if record.kind == RecordKind::Microsummary {
                    debug!("bookmark is a microsummary");
                    let static_title = record.static_title.as_deref().unwrap_or("");
                    self.places.set_item_annotation(id, annos::STATIC_TITLE, static_title)?;
                    if let Some(generator) = record.generator_uri.as_deref() {
                        self.bind_generator(id, uri, generator);
                    }
                }
                Some(id)
            }
            RecordKind::Folder => {
                debug!(title = ?record.title, "creating folder");
                let title = record.title.as_deref().unwrap_or("");
                Some(self.places.create_folder(parent, title, DEFAULT_INDEX)?)
            }
            RecordKind::Livemark => {
                debug!(title = ?record.title, "creating livemark");
                let feed = record.feed_uri.as_deref().ok_or(StoreError::MissingField("feedUri"))?;
                let title = record.title.as_deref().unwrap_or("");
                Some(self.places.create_livemark(
                    parent,
                    title,
                    record.site_uri.as_deref(),
                    feed,
                    DEFAULT_INDEX,
                )?)
            }
            RecordKind::Separator => {
                debug!("creating separator");
                Some(self.places.insert_separator(parent, DEFAULT_INDEX)?)
            }
            RecordKind::Item => {
                debug!(guid = %record.id, "generic places item, nothing to create");
                None
            }
            RecordKind::Unknown => {
                error!(guid = %record.id, "create: unknown item type");
                return Err(StoreError::UnknownType(record.kind.as_str().to_string()));
            }
        };

        if let Some(id) = new_id {
            trace!(id, guid = %record.id, "setting GUID of new item");
            if self.places.guid_for_id(id)?.as_deref() == Some(record.id.as_str()) {
                warn!(id, guid = %record.id, "item already has GUID");
            } else {
                self.places.set_item_guid(id, &record.id)?;
            }
        }
        Ok(())
    }

    fn update(&self, record: &PlacesRecord, parent: Option<i64>) -> Result<(), StoreError> {
        let Some(item_id) = self.places.id_for_guid(&record.id)? else {
            debug!(guid = %record.id, "skipping update for unknown item");
            return Ok(());
        };
        trace!(guid = %record.id, item_id, "updating");

        if let Some(parent) = parent {
            if self.places.folder_id_for_item(item_id)? != Some(parent) {
                trace!("moving item (changing folder/position)");
                self.places.move_item(item_id, parent, DEFAULT_INDEX)?;
            }
        }

        if let Some(title) = record.title.as_deref() {
            self.places.set_item_title(item_id, title)?;
        }
        if let Some(uri) = record.bmk_uri.as_deref() {
            self.places.change_bookmark_uri(item_id, uri)?;
        }
        if let Some(tags) = &record.tags {
            if let Some(uri) = self.places.bookmark_uri(item_id)? {
                self.tag_uri(&uri, tags)?;
            }
        }
        if let Some(keyword) = record.keyword.as_deref() {
            self.places.set_keyword_for_bookmark(item_id, Some(keyword))?;
        }
        if let Some(description) = record.description.as_deref() {
            if description.is_empty() {
                self.places.remove_item_annotation(item_id, annos::DESCRIPTION)?;
            } else {
                self.places.set_item_annotation(item_id, annos::DESCRIPTION, description)?;
            }
        }
        match record.load_in_sidebar {
            Some(true) => self.places.set_item_annotation(item_id, annos::LOAD_IN_SIDEBAR, "true")?,
            Some(false) => self.places.remove_item_annotation(item_id, annos::LOAD_IN_SIDEBAR)?,
            None => {}
        }
        if let Some(generator) = record.generator_uri.as_deref() {
            match self.places.bookmark_uri(item_id) {
                Ok(Some(page)) => self.bind_generator(item_id, &page, generator),
                Ok(None) => debug!("could not set microsummary generator URI: item has no URI"),
                Err(e) => debug!("could not set microsummary generator URI: {}", e),
            }
        }
        if let Some(site) = record.site_uri.as_deref() {
            self.places.set_livemark_site_uri(item_id, site)?;
        }
        if let Some(feed) = record.feed_uri.as_deref() {
            self.places.set_livemark_feed_uri(item_id, feed)?;
        }
        Ok(())
    }

    fn remove(&self, record: &PlacesRecord) -> Result<(), StoreError> {
        let Some(item_id) = self.places.id_for_guid(&record.id)? else {
            debug!(guid = %record.id, "item already removed");
            return Ok(());
        };
        match self.places.item_type(item_id)? {
            Some(ItemType::Bookmark) => {
                debug!(guid = %record.id, "removing bookmark");
                if let Some(uri) = self.places.bookmark_uri(item_id)? {
                    self.places.untag_uri(&uri, None)?;
                }
                self.places.remove_item(item_id)?;
            }
            Some(ItemType::Folder) => {
                debug!(guid = %record.id, "removing folder");
                self.places.remove_folder(item_id)?;
            }
            Some(ItemType::Separator) => {
                debug!(guid = %record.id, "removing separator");
                self.places.remove_item(item_id)?;
            }
            None => debug!(guid = %record.id, "item vanished before removal"),
        }
        Ok(())
    }

    /// Binds a microsummary generator, logging instead of failing.
    fn bind_generator(&self, item_id: i64, page_uri: &str, generator_uri: &str) {
        let Some(service) = &self.microsummaries else {
            warn!("can't create microsummary: not supported");
            return;
        };
        match service.set_microsummary(&self.places, item_id, page_uri, generator_uri) {
            Ok(()) => {}
            Err(StoreError::GeneratorNotFound(uri)) => trace!(uri = %uri, "no local generator"),
            Err(e) => debug!("could not set microsummary generator URI: {}", e),
        }
    }

    /// Replaces the tags on `uri` without letting shared tag folders be
    /// deleted and recreated under new ids.
    fn tag_uri(&self, uri: &str, tags: &[String]) -> Result<(), StoreError> {
        let tags: Vec<String> = tags.iter().filter(|t| !t.is_empty()).cloned().collect();
        self.places.tag_uri(TAG_DUMMY_URI, &tags)?;
        self.places.untag_uri(uri, None)?;
        self.places.tag_uri(uri, &tags)?;
        self.places.untag_uri(TAG_DUMMY_URI, None)?;
        Ok(())
    }

    fn microsummary_generator(&self, item_id: i64) -> Option<String> {
        let service = self.microsummaries.as_ref()?;
        match service.generator_for(&self.places, item_id) {
            Ok(generator) => generator,
            Err(e) => {
                debug!(item_id, "microsummary lookup failed: {}", e);
                None
            }
        }
    }

    fn serialize_bookmark(&self, item: &PlacesItem) -> Result<PlacesRecord, StoreError> {
        let uri = item.url.clone().unwrap_or_default();
        let mut record = if let Some(generator) = self.microsummary_generator(item.id) {
            let mut record = PlacesRecord::new(&item.guid, None, RecordKind::Microsummary);
            record.generator_uri = Some(generator);
            record.static_title = Some(
                self.places
                    .get_item_annotation(item.id, annos::STATIC_TITLE)?
                    .unwrap_or_default(),
            );
            record
        } else if uri.starts_with("place:") {
            let mut record = PlacesRecord::new(&item.guid, None, RecordKind::Query);
            // The tag may not exist locally yet; leave the name unset then.
            if let Some(folder) = query_folder_id(&uri) {
                if let Ok(Some(name)) = self.places.item_title(folder) {
                    debug!(folder, name = %name, "query id");
                    record.folder_name = Some(name);
                }
            }
            record
        } else {
            PlacesRecord::new(&item.guid, None, RecordKind::Bookmark)
        };

        record.title = item.title.clone();
        record.tags = Some(self.places.tags_for_uri(&uri)?);
        record.keyword = self.places.keyword_for_bookmark(item.id)?;
        record.description = self.places.get_item_annotation(item.id, annos::DESCRIPTION)?;
        record.load_in_sidebar = Some(self.places.item_has_annotation(item.id, annos::LOAD_IN_SIDEBAR)?);
        record.bmk_uri = Some(uri);
        Ok(record)
    }

    /// GUID of the item's parent. An item whose parent is gone is moved
    /// under `unfiled` first.
    fn parent_guid_for(&self, item: &PlacesItem) -> Result<String, StoreError> {
        let parent = match item.parent_id {
            Some(parent) => self.places.guid_for_id(parent)?,
            None => None,
        };
        match parent {
            Some(guid) => Ok(guid),
            None => {
                debug!(guid = %item.guid, "found orphan bookmark, reparenting to unfiled");
                self.places
                    .move_item(item.id, self.places.unfiled_bookmarks_folder(), DEFAULT_INDEX)?;
                Ok(UNFILED_GUID.to_string())
            }
        }
    }

    fn collect_children(&self, folder: i64, items: &mut HashSet<String>) -> Result<(), StoreError> {
        if self.places.is_livemark(folder)? {
            return Ok(());
        }
        for child in self.places.children(folder)? {
            items.insert(child.guid.clone());
            if child.item_type == ItemType::Folder {
                self.collect_children(child.id, items)?;
            }
        }
        Ok(())
    }
}

impl SyncStore for BookmarksStore {
    fn item_exists(&self, guid: &str) -> Result<bool, StoreError> {
        Ok(self.places.id_for_guid(guid)?.is_some())
    }

    fn apply_incoming(&self, mut record: PlacesRecord) -> Result<(), StoreError> {
        if ROOT_GUIDS.contains(&record.id.as_str()) {
            debug!(guid = %record.id, "skipping change to root node");
            return Ok(());
        }

        if record.kind == RecordKind::Query {
            self.preprocess_query(&mut record)?;
        }

        let mut orphan_of = None;
        let parent = match record.parentid.as_deref() {
            Some(parent_guid) => match self.places.id_for_guid(parent_guid)? {
                Some(id) => Some(id),
                None => {
                    trace!(guid = %record.id, parent_guid, "reparenting to unfiled until parent is synced");
                    orphan_of = Some(parent_guid.to_string());
                    Some(self.places.unfiled_bookmarks_folder())
                }
            },
            None => None,
        };

        if record.deleted {
            self.remove(&record)?;
        } else if self.item_exists(&record.id)? {
            self.update(&record, parent)?;
        } else {
            self.create(&record, parent)?;
        }
        self.cache.borrow_mut().remove(&record.id);

        if let Some(item_id) = self.places.id_for_guid(&record.id)? {
            match orphan_of {
                Some(parent_guid) => {
                    let value = format!("{}{}", ORPHAN_PREFIX, parent_guid);
                    self.places.set_item_annotation(item_id, annos::SYNC_PARENT, &value)?;
                }
                None if parent.is_some() => {
                    self.places.remove_item_annotation(item_id, annos::SYNC_PARENT)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    fn create_record(&self, guid: &str) -> Result<PlacesRecord, StoreError> {
        if let Some(record) = self.cache.borrow().get(guid) {
            return Ok(record.clone());
        }

        let item = match self.places.id_for_guid(guid)? {
            Some(id) => self.places.get_item(id)?,
            None => None,
        };
        let Some(item) = item else {
            let record = PlacesRecord::tombstone(guid);
            self.cache.borrow_mut().insert(guid.to_string(), record.clone());
            return Ok(record);
        };

        let mut record = match item.item_type {
            ItemType::Bookmark => self.serialize_bookmark(&item)?,
            ItemType::Folder => {
                let mut record = if self.places.is_livemark(item.id)? {
                    let mut record = PlacesRecord::new(guid, None, RecordKind::Livemark);
                    record.site_uri = self.places.livemark_site_uri(item.id)?;
                    record.feed_uri = self.places.livemark_feed_uri(item.id)?;
                    record
                } else {
                    PlacesRecord::new(guid, None, RecordKind::Folder)
                };
                record.title = item.title.clone();
                record
            }
            ItemType::Separator => PlacesRecord::new(guid, None, RecordKind::Separator),
        };
        record.id = guid.to_string();
        record.parentid = Some(self.parent_guid_for(&item)?);

        self.cache.borrow_mut().insert(guid.to_string(), record.clone());
        Ok(record)
    }

    fn change_item_id(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        if ROOT_GUIDS.contains(&old_id) {
            return Ok(());
        }
        let Some(item_id) = self.places.id_for_guid(old_id)? else {
            warn!(old_id, new_id, "can't change GUID: item does not exist");
            return Err(StoreError::UnknownItem(old_id.to_string()));
        };
        if let Some(owner) = self.places.id_for_guid(new_id)? {
            if owner != item_id {
                warn!(old_id, new_id, "can't change GUID: new ID already in use");
                return Err(StoreError::GuidCollision(new_id.to_string()));
            }
            return Ok(());
        }

        debug!(old_id, new_id, "changing GUID");
        self.places.set_item_guid(item_id, new_id)?;
        self.cache.borrow_mut().remove(old_id);
        Ok(())
    }

    fn get_all_ids(&self) -> Result<HashSet<String>, StoreError> {
        let mut items = HashSet::new();
        for guid in ROOT_GUIDS {
            if guid == PLACES_ROOT_GUID || guid == TAGS_GUID {
                continue;
            }
            if let Some(root) = self.places.id_for_guid(guid)? {
                self.collect_children(root, &mut items)?;
            }
        }
        Ok(items)
    }

    fn wipe(&self) -> Result<(), StoreError> {
        for guid in ROOT_GUIDS {
            if guid == PLACES_ROOT_GUID {
                continue;
            }
            if let Some(root) = self.places.id_for_guid(guid)? {
                self.places.remove_folder_children(root)?;
            }
        }
        self.clear_cache();
        Ok(())
    }

    fn reparent_orphans(&self) -> Result<usize, StoreError> {
        let mut moved = 0;
        for (item_id, value) in self.places.items_with_annotation(annos::SYNC_PARENT)? {
            let parent_guid = value.strip_prefix(ORPHAN_PREFIX).unwrap_or(&value);
            let Some(parent) = self.places.id_for_guid(parent_guid)? else {
                continue;
            };
            trace!(item_id, parent_guid, "reparenting orphan");
            if let Err(e) = self.places.move_item(item_id, parent, DEFAULT_INDEX) {
                warn!(item_id, parent_guid, "could not reparent orphan: {}", e);
                continue;
            }
            self.places.remove_item_annotation(item_id, annos::SYNC_PARENT)?;
            if let Some(guid) = self.places.guid_for_id(item_id)? {
                self.cache.borrow_mut().remove(&guid);
            }
            moved += 1;
        }
        Ok(moved)
    }

    fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    fn run_in_batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.places.run_in_batch(f)
    }
}

/// Byte range of the digits following the first `:folder=` or `&folder=`.
fn query_folder_span(uri: &str) -> Option<(usize, usize)> {
    let mut search = 0;
    while let Some(found) = uri[search..].find("folder=") {
        let at = search + found;
        let start = at + "folder=".len();
        let preceded = at > 0 && matches!(uri.as_bytes()[at - 1], b':' | b'&');
        let digits = uri[start..].bytes().take_while(u8::is_ascii_digit).count();
        if preceded && digits > 0 {
            return Some((start, start + digits));
        }
        search = start;
    }
    None
}

/// Folder id referenced by a `place:` query URI.
pub fn query_folder_id(uri: &str) -> Option<i64> {
    let (start, end) = query_folder_span(uri)?;
    uri[start..end].parse().ok()
}

/// Replaces the folder id in a `place:` query URI.
pub fn rewrite_query_folder(uri: &str, folder: i64) -> Option<String> {
    let (start, end) = query_folder_span(uri)?;
    Some(format!("{}{}{}", &uri[..start], folder, &uri[end..]))
}
