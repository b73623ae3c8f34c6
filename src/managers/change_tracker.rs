//! Change tracking for the bookmarks collection.
//!
//! Listens to places mutations and accumulates the GUIDs that need
//! uploading, together with a score the scheduler uses to decide how soon
//! to sync.
//!
//! A tracker built with [`BookmarksTracker::with_database`] mirrors its
//! dirty set into the `sync_changes` table, so changes made before a restart
//! are still uploaded by the next pass.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::database::Database;
use crate::managers::places_store::{BookmarkObserver, PlacesStore};
use crate::types::bookmark::{annos, ROOT_GUIDS};

/// Score added the first time an item becomes dirty.
pub const SCORE_INCREMENT: u32 = 10;

/// Annotations whose changes are synced. Other annotation changes are noise.
pub const SYNCED_ANNOTATIONS: [&str; 6] = [
    annos::DESCRIPTION,
    annos::LOAD_IN_SIDEBAR,
    annos::STATIC_TITLE,
    annos::LIVEMARK_FEED_URI,
    annos::LIVEMARK_SITE_URI,
    annos::MICROSUMMARY_GENERATOR_URI,
];

/// Trait defining what the sync engine needs from a change tracker.
pub trait SyncTracker {
    /// GUIDs changed since the last successful upload.
    fn changed_ids(&self) -> Vec<String>;

    /// Marks `guid` changed. Returns true only if it was not already dirty.
    fn add_changed_id(&self, guid: &str) -> bool;

    fn remove_changed_id(&self, guid: &str);

    fn clear_changed_ids(&self);

    fn score(&self) -> u32;

    fn reset_score(&self);

    /// While set, every notification is dropped.
    fn set_ignore_all(&self, ignore: bool);

    fn ignore_all(&self) -> bool;
}

#[derive(Default)]
struct TrackerState {
    changed: HashSet<String>,
    ignored: HashSet<String>,
    score: u32,
    ignore_all: bool,
}

/// Where a persistent tracker keeps its dirty set.
struct ChangeJournal {
    db: Arc<Database>,
    collection: String,
}

/// Tracker for the bookmarks collection, registered as a places observer.
pub struct BookmarksTracker {
    state: Mutex<TrackerState>,
    journal: Option<ChangeJournal>,
}

impl Default for BookmarksTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl BookmarksTracker {
    /// Creates a tracker that never reports the well-known roots.
    pub fn new() -> Self {
        let state = TrackerState {
            ignored: ROOT_GUIDS.iter().map(|g| g.to_string()).collect(),
            ..TrackerState::default()
        };
        Self {
            state: Mutex::new(state),
            journal: None,
        }
    }

    /// Creates a tracker whose dirty set survives restarts, starting from
    /// the GUIDs already recorded for `collection`.
    pub fn with_database(db: Arc<Database>, collection: &str) -> Self {
        let mut tracker = Self::new();
        match db.changed_ids(collection) {
            Ok(saved) => {
                debug!(collection, count = saved.len(), "loaded pending changes");
                tracker.state().changed.extend(saved);
            }
            Err(e) => warn!(collection, "could not load pending changes: {}", e),
        }
        tracker.journal = Some(ChangeJournal {
            db,
            collection: collection.to_string(),
        });
        tracker
    }

    fn persist(&self, op: &str, write: impl FnOnce(&Database, &str) -> Result<(), rusqlite::Error>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = write(&journal.db, &journal.collection) {
                warn!(collection = %journal.collection, op, "could not save pending changes: {}", e);
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Never report `guid` as changed.
    pub fn ignore_id(&self, guid: &str) {
        self.state().ignored.insert(guid.to_string());
    }

    pub fn unignore_id(&self, guid: &str) {
        self.state().ignored.remove(guid);
    }

    /// Whether a change to `item_id` in `folder` should be dropped.
    ///
    /// Tag folders, tag entries, and livemark children are not synced as
    /// items of their own.
    fn should_ignore(&self, store: &PlacesStore, item_id: i64, folder: Option<i64>) -> bool {
        if self.ignore_all() {
            return true;
        }
        let folder = match folder {
            Some(folder) => Some(folder),
            None => store.folder_id_for_item(item_id).unwrap_or_else(|e| {
                warn!(item_id, "could not look up parent folder: {}", e);
                None
            }),
        };
        let Some(folder) = folder else {
            return false;
        };

        let tags = store.tags_folder();
        if folder == tags {
            return true;
        }
        if matches!(store.folder_id_for_item(folder), Ok(Some(parent)) if parent == tags) {
            return true;
        }
        store.is_livemark(folder).unwrap_or(false)
    }

    fn add_item(&self, store: &PlacesStore, item_id: i64) {
        let guid = match store.guid_for_id(item_id) {
            Ok(Some(guid)) => guid,
            Ok(None) => {
                warn!(item_id, "changed item has no GUID");
                return;
            }
            Err(e) => {
                warn!(item_id, "GUID lookup failed: {}", e);
                return;
            }
        };
        if self.add_changed_id(&guid) {
            self.state().score += SCORE_INCREMENT;
        }
    }
}

impl SyncTracker for BookmarksTracker {
    fn changed_ids(&self) -> Vec<String> {
        self.state().changed.iter().cloned().collect()
    }

    fn add_changed_id(&self, guid: &str) -> bool {
        let mut state = self.state();
        if state.ignored.contains(guid) || !state.changed.insert(guid.to_string()) {
            return false;
        }
        drop(state);
        self.persist("add", |db, collection| db.add_changed_id(collection, guid));
        true
    }

    fn remove_changed_id(&self, guid: &str) {
        if self.state().changed.remove(guid) {
            self.persist("remove", |db, collection| db.remove_changed_id(collection, guid));
        }
    }

    fn clear_changed_ids(&self) {
        self.state().changed.clear();
        self.persist("clear", |db, collection| db.clear_changed_ids(collection));
    }

    fn score(&self) -> u32 {
        self.state().score
    }

    fn reset_score(&self) {
        self.state().score = 0;
    }

    fn set_ignore_all(&self, ignore: bool) {
        self.state().ignore_all = ignore;
    }

    fn ignore_all(&self) -> bool {
        self.state().ignore_all
    }
}

impl BookmarkObserver for BookmarksTracker {
    fn on_item_added(&self, store: &PlacesStore, item_id: i64, folder: i64, _index: i64) {
        if self.should_ignore(store, item_id, Some(folder)) {
            return;
        }
        trace!(item_id, "on_item_added");
        self.add_item(store, item_id);
    }

    fn on_before_item_removed(&self, store: &PlacesStore, item_id: i64) {
        if self.should_ignore(store, item_id, None) {
            return;
        }
        trace!(item_id, "on_before_item_removed");
        self.add_item(store, item_id);
    }

    fn on_item_changed(
        &self,
        store: &PlacesStore,
        item_id: i64,
        property: &str,
        is_anno: bool,
        value: &str,
    ) {
        if self.should_ignore(store, item_id, None) {
            return;
        }
        if is_anno && !SYNCED_ANNOTATIONS.contains(&property) {
            return;
        }
        trace!(item_id, property, is_anno, value, "on_item_changed");
        self.add_item(store, item_id);
    }

    fn on_item_moved(
        &self,
        store: &PlacesStore,
        item_id: i64,
        _old_parent: i64,
        _old_index: i64,
        _new_parent: i64,
        _new_index: i64,
    ) {
        if self.should_ignore(store, item_id, None) {
            return;
        }
        trace!(item_id, "on_item_moved");
        self.add_item(store, item_id);
    }
}
