//! Tests for the places tree: positions, tags, annotations, livemarks,
//! and observer notifications.

#[path = "../common/mod.rs"]
mod common;

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use bookmark_sync::managers::places_store::{BookmarkObserver, PlacesStore, DEFAULT_INDEX};
use bookmark_sync::types::bookmark::{annos, ItemType};
use bookmark_sync::types::errors::PlacesError;

/// Records every notification as a short string.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl BookmarkObserver for Recorder {
    fn on_begin_update_batch(&self) {
        self.push("begin".into());
    }

    fn on_end_update_batch(&self) {
        self.push("end".into());
    }

    fn on_item_added(&self, _store: &PlacesStore, item_id: i64, folder: i64, index: i64) {
        self.push(format!("added {} {} {}", item_id, folder, index));
    }

    fn on_before_item_removed(&self, store: &PlacesStore, item_id: i64) {
        // The item must still be readable here.
        let exists = store.get_item(item_id).unwrap().is_some();
        self.push(format!("removing {} {}", item_id, exists));
    }

    fn on_item_changed(
        &self,
        _store: &PlacesStore,
        item_id: i64,
        property: &str,
        is_anno: bool,
        _value: &str,
    ) {
        self.push(format!("changed {} {} {}", item_id, property, is_anno));
    }

    fn on_item_moved(
        &self,
        _store: &PlacesStore,
        item_id: i64,
        old_parent: i64,
        _old_index: i64,
        new_parent: i64,
        _new_index: i64,
    ) {
        self.push(format!("moved {} {} {}", item_id, old_parent, new_parent));
    }
}

#[test]
fn test_item_lookups() {
    let (_db, places) = common::places();
    let menu = places.bookmarks_menu_folder();
    let id = places
        .insert_bookmark(menu, "http://example.com/", DEFAULT_INDEX, Some("Example"))
        .unwrap();

    let item = places.get_item(id).unwrap().unwrap();
    assert_eq!(item.item_type, ItemType::Bookmark);
    assert_eq!(item.parent_id, Some(menu));
    assert_eq!(places.item_title(id).unwrap().as_deref(), Some("Example"));
    assert_eq!(places.bookmark_uri(id).unwrap().as_deref(), Some("http://example.com/"));
    assert_eq!(places.id_for_guid(&item.guid).unwrap(), Some(id));
    assert!(places.get_item(9999).unwrap().is_none());
}

/// Removing an item closes the gap it leaves among its siblings.
#[test]
fn test_remove_closes_gap() {
    let (_db, places) = common::places();
    let menu = places.bookmarks_menu_folder();
    let a = places.insert_bookmark(menu, "http://a.example/", DEFAULT_INDEX, None).unwrap();
    let b = places.insert_bookmark(menu, "http://b.example/", DEFAULT_INDEX, None).unwrap();
    let c = places.insert_bookmark(menu, "http://c.example/", DEFAULT_INDEX, None).unwrap();

    places.remove_item(b).unwrap();
    let positions: Vec<(i64, i64)> = places
        .children(menu)
        .unwrap()
        .iter()
        .map(|item| (item.id, item.position))
        .collect();
    assert_eq!(positions, vec![(a, 0), (c, 1)]);
}

#[test]
fn test_move_between_folders() {
    let (_db, places) = common::places();
    let menu = places.bookmarks_menu_folder();
    let folder = places.create_folder(places.toolbar_folder(), "Dev", DEFAULT_INDEX).unwrap();
    let id = places.insert_bookmark(menu, "http://a.example/", DEFAULT_INDEX, None).unwrap();

    places.move_item(id, folder, DEFAULT_INDEX).unwrap();
    assert_eq!(places.folder_id_for_item(id).unwrap(), Some(folder));
    assert!(places.children(menu).unwrap().is_empty());
}

/// Removing a folder removes everything below it.
#[test]
fn test_remove_folder_is_recursive() {
    let (_db, places) = common::places();
    let outer = places.create_folder(places.bookmarks_menu_folder(), "outer", DEFAULT_INDEX).unwrap();
    let inner = places.create_folder(outer, "inner", DEFAULT_INDEX).unwrap();
    let leaf = places.insert_bookmark(inner, "http://leaf.example/", DEFAULT_INDEX, None).unwrap();

    places.remove_folder(outer).unwrap();
    assert!(places.get_item(inner).unwrap().is_none());
    assert!(places.get_item(leaf).unwrap().is_none());
}

#[test]
fn test_insert_into_non_folder_fails() {
    let (_db, places) = common::places();
    let id = places
        .insert_bookmark(places.bookmarks_menu_folder(), "http://a.example/", DEFAULT_INDEX, None)
        .unwrap();
    assert!(matches!(
        places.insert_bookmark(id, "http://b.example/", DEFAULT_INDEX, None),
        Err(PlacesError::InvalidParent(_))
    ));
}

#[test]
fn test_set_item_guid_rejects_duplicate() {
    let (_db, places) = common::places();
    let menu = places.bookmarks_menu_folder();
    let a = places.insert_bookmark(menu, "http://a.example/", DEFAULT_INDEX, None).unwrap();
    let b = places.insert_bookmark(menu, "http://b.example/", DEFAULT_INDEX, None).unwrap();

    places.set_item_guid(a, "aaaaaaaaaaaa").unwrap();
    assert!(matches!(
        places.set_item_guid(b, "aaaaaaaaaaaa"),
        Err(PlacesError::GuidInUse(_))
    ));
    // Re-assigning an item its own GUID is allowed.
    places.set_item_guid(a, "aaaaaaaaaaaa").unwrap();
}

/// Tags are shared folders; removing one URI's tag keeps the folder while
/// another URI still uses it.
#[test]
fn test_tags_shared_between_uris() {
    let (_db, places) = common::places();
    let tags = vec!["rust".to_string(), "code".to_string()];
    places.tag_uri("http://a.example/", &tags).unwrap();
    places.tag_uri("http://b.example/", &["rust".to_string()]).unwrap();

    assert_eq!(places.tags_for_uri("http://a.example/").unwrap(), vec!["code", "rust"]);

    places.untag_uri("http://a.example/", None).unwrap();
    assert!(places.tags_for_uri("http://a.example/").unwrap().is_empty());
    assert_eq!(places.tags_for_uri("http://b.example/").unwrap(), vec!["rust"]);

    let folders: Vec<String> = places
        .children(places.tags_folder())
        .unwrap()
        .into_iter()
        .filter_map(|f| f.title)
        .collect();
    assert_eq!(folders, vec!["rust"]);
}

#[test]
fn test_tagging_twice_is_idempotent() {
    let (_db, places) = common::places();
    let tags = vec!["rust".to_string()];
    places.tag_uri("http://a.example/", &tags).unwrap();
    places.tag_uri("http://a.example/", &tags).unwrap();

    let folder = places.children(places.tags_folder()).unwrap()[0].id;
    assert_eq!(places.children(folder).unwrap().len(), 1);
}

#[test]
fn test_keyword_set_and_clear() {
    let (_db, places) = common::places();
    let id = places
        .insert_bookmark(places.bookmarks_menu_folder(), "http://a.example/", DEFAULT_INDEX, None)
        .unwrap();

    places.set_keyword_for_bookmark(id, Some("a")).unwrap();
    assert_eq!(places.keyword_for_bookmark(id).unwrap().as_deref(), Some("a"));
    places.set_keyword_for_bookmark(id, Some("")).unwrap();
    assert!(places.keyword_for_bookmark(id).unwrap().is_none());
}

#[test]
fn test_annotations() {
    let (_db, places) = common::places();
    let id = places
        .insert_bookmark(places.bookmarks_menu_folder(), "http://a.example/", DEFAULT_INDEX, None)
        .unwrap();

    places.set_item_annotation(id, annos::DESCRIPTION, "first").unwrap();
    places.set_item_annotation(id, annos::DESCRIPTION, "second").unwrap();
    assert_eq!(
        places.get_item_annotation(id, annos::DESCRIPTION).unwrap().as_deref(),
        Some("second")
    );
    assert_eq!(
        places.items_with_annotation(annos::DESCRIPTION).unwrap(),
        vec![(id, "second".to_string())]
    );

    places.remove_item_annotation(id, annos::DESCRIPTION).unwrap();
    places.remove_item_annotation(id, annos::DESCRIPTION).unwrap();
    assert!(!places.item_has_annotation(id, annos::DESCRIPTION).unwrap());
}

#[test]
fn test_livemark_uris() {
    let (_db, places) = common::places();
    let id = places
        .create_livemark(
            places.toolbar_folder(),
            "News",
            Some("http://news.example/"),
            "http://news.example/feed.xml",
            DEFAULT_INDEX,
        )
        .unwrap();

    assert!(places.is_livemark(id).unwrap());
    assert_eq!(places.item_type(id).unwrap(), Some(ItemType::Folder));
    assert_eq!(
        places.livemark_feed_uri(id).unwrap().as_deref(),
        Some("http://news.example/feed.xml")
    );

    places.set_livemark_site_uri(id, "http://news.example/home").unwrap();
    assert_eq!(
        places.livemark_site_uri(id).unwrap().as_deref(),
        Some("http://news.example/home")
    );
    assert!(places.set_livemark_feed_uri(id, "::").is_err());
}

/// Observers see each mutation, and removal is announced while the item
/// still exists.
#[test]
fn test_observer_notifications() {
    let (_db, places) = common::places();
    let recorder = Arc::new(Recorder::default());
    places.add_observer(recorder.clone());
    let menu = places.bookmarks_menu_folder();

    let id = places.insert_bookmark(menu, "http://a.example/", DEFAULT_INDEX, None).unwrap();
    places.set_item_title(id, "A").unwrap();
    places.move_item(id, places.toolbar_folder(), DEFAULT_INDEX).unwrap();
    places.remove_item(id).unwrap();

    assert_eq!(
        recorder.take(),
        vec![
            format!("added {} {} 0", id, menu),
            format!("changed {} title false", id),
            format!("moved {} {} {}", id, menu, places.toolbar_folder()),
            format!("removing {} true", id),
        ]
    );
}

/// Nested batches report a single begin/end pair.
#[test]
fn test_nested_batches_collapse() {
    let (_db, places) = common::places();
    let recorder = Arc::new(Recorder::default());
    places.add_observer(recorder.clone());

    let inner_seen = RefCell::new(false);
    places.run_in_batch(|| {
        places.run_in_batch(|| {
            *inner_seen.borrow_mut() = places.in_batch();
        });
    });

    assert!(*inner_seen.borrow());
    assert!(!places.in_batch());
    assert_eq!(recorder.take(), vec!["begin", "end"]);
}
