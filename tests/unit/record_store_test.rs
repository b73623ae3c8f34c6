//! Tests for BookmarksStore: applying incoming records, serializing local
//! items, orphan handling, and GUID changes.

#[path = "../common/mod.rs"]
mod common;

use std::rc::Rc;

use bookmark_sync::managers::places_store::{PlacesStore, DEFAULT_INDEX};
use bookmark_sync::managers::record_store::{AnnotationMicrosummaries, BookmarksStore, SyncStore};
use bookmark_sync::types::bookmark::{annos, ItemType};
use bookmark_sync::types::errors::StoreError;
use bookmark_sync::types::record::{PlacesRecord, RecordKind};

fn store() -> (Rc<PlacesStore>, BookmarksStore) {
    let (_db, places) = common::places();
    let store = BookmarksStore::new(Rc::clone(&places));
    (places, store)
}

fn bookmark(id: &str, parent: &str, uri: &str, title: &str) -> PlacesRecord {
    let mut record = PlacesRecord::new(id, Some(parent), RecordKind::Bookmark);
    record.bmk_uri = Some(uri.to_string());
    record.title = Some(title.to_string());
    record
}

fn folder(id: &str, parent: &str, title: &str) -> PlacesRecord {
    let mut record = PlacesRecord::new(id, Some(parent), RecordKind::Folder);
    record.title = Some(title.to_string());
    record
}

/// A bookmark created from a record under `unfiled` serializes back to an
/// equivalent record.
#[test]
fn test_create_bookmark_under_unfiled() {
    let (places, store) = store();
    store
        .apply_incoming(bookmark("g1", "unfiled", "http://example.com", "Example"))
        .unwrap();

    let children = places.children(places.unfiled_bookmarks_folder()).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].guid, "g1");
    assert_eq!(children[0].url.as_deref(), Some("http://example.com"));
    assert_eq!(children[0].title.as_deref(), Some("Example"));

    let record = store.create_record("g1").unwrap();
    assert_eq!(record.id, "g1");
    assert_eq!(record.kind, RecordKind::Bookmark);
    assert_eq!(record.parentid.as_deref(), Some("unfiled"));
    assert_eq!(record.bmk_uri.as_deref(), Some("http://example.com"));
    assert_eq!(record.title.as_deref(), Some("Example"));
    assert_eq!(record.tags, Some(vec![]));
    assert!(!record.deleted);
}

/// A child that arrives before its folder waits under `unfiled` and is
/// moved once the folder exists.
#[test]
fn test_orphan_reparented_when_parent_arrives() {
    let (places, store) = store();
    store
        .apply_incoming(bookmark("child0000001", "folder000001", "http://a.example/", "A"))
        .unwrap();

    let child = places.id_for_guid("child0000001").unwrap().unwrap();
    assert_eq!(places.folder_id_for_item(child).unwrap(), Some(places.unfiled_bookmarks_folder()));
    assert_eq!(
        places.get_item_annotation(child, annos::SYNC_PARENT).unwrap().as_deref(),
        Some("Tfolder000001")
    );

    store.apply_incoming(folder("folder000001", "menu", "Dev")).unwrap();
    assert_eq!(store.reparent_orphans().unwrap(), 1);

    let parent = places.id_for_guid("folder000001").unwrap();
    assert_eq!(places.folder_id_for_item(child).unwrap(), parent);
    assert!(!places.item_has_annotation(child, annos::SYNC_PARENT).unwrap());
    assert_eq!(store.reparent_orphans().unwrap(), 0);
    assert_eq!(
        store.create_record("child0000001").unwrap().parentid.as_deref(),
        Some("folder000001")
    );
}

/// An orphan that is later updated with a resolvable parent loses its
/// orphan marker.
#[test]
fn test_update_with_known_parent_clears_orphan_marker() {
    let (places, store) = store();
    store
        .apply_incoming(bookmark("child0000001", "missing00001", "http://a.example/", "A"))
        .unwrap();
    store
        .apply_incoming(bookmark("child0000001", "toolbar", "http://a.example/", "A"))
        .unwrap();

    let child = places.id_for_guid("child0000001").unwrap().unwrap();
    assert_eq!(places.folder_id_for_item(child).unwrap(), Some(places.toolbar_folder()));
    assert!(!places.item_has_annotation(child, annos::SYNC_PARENT).unwrap());
}

#[test]
fn test_update_changes_fields() {
    let (places, store) = store();
    store
        .apply_incoming(bookmark("bmk000000001", "menu", "http://a.example/", "Old"))
        .unwrap();

    let mut update = PlacesRecord::new("bmk000000001", Some("menu"), RecordKind::Bookmark);
    update.title = Some("New".to_string());
    update.keyword = Some("kw".to_string());
    update.description = Some("notes".to_string());
    update.load_in_sidebar = Some(true);
    store.apply_incoming(update).unwrap();

    let id = places.id_for_guid("bmk000000001").unwrap().unwrap();
    assert_eq!(places.item_title(id).unwrap().as_deref(), Some("New"));
    assert_eq!(places.bookmark_uri(id).unwrap().as_deref(), Some("http://a.example/"));
    let record = store.create_record("bmk000000001").unwrap();
    assert_eq!(record.keyword.as_deref(), Some("kw"));
    assert_eq!(record.description.as_deref(), Some("notes"));
    assert_eq!(record.load_in_sidebar, Some(true));
}

/// Retagging replaces the tag set without leaving stray tag folders.
#[test]
fn test_retag_replaces_tags() {
    let (places, store) = store();
    let mut record = bookmark("bmk000000001", "menu", "http://a.example/", "A");
    record.tags = Some(vec!["old".to_string(), "keep".to_string()]);
    store.apply_incoming(record).unwrap();

    let mut update = PlacesRecord::new("bmk000000001", Some("menu"), RecordKind::Bookmark);
    update.tags = Some(vec!["keep".to_string(), "new".to_string()]);
    store.apply_incoming(update).unwrap();

    assert_eq!(places.tags_for_uri("http://a.example/").unwrap(), vec!["keep", "new"]);
    let folders: Vec<String> = places
        .children(places.tags_folder())
        .unwrap()
        .into_iter()
        .filter_map(|f| f.title)
        .collect();
    assert!(!folders.contains(&"old".to_string()));
}

/// A deletion for an item that is not here is a no-op.
#[test]
fn test_remove_absent_item_is_noop() {
    let (places, store) = store();
    store.apply_incoming(PlacesRecord::tombstone("nothing00001")).unwrap();
    assert!(places.children(places.unfiled_bookmarks_folder()).unwrap().is_empty());
}

#[test]
fn test_remove_folder_with_contents() {
    let (places, store) = store();
    store.apply_incoming(folder("folder000001", "menu", "Dev")).unwrap();
    store
        .apply_incoming(bookmark("bmk000000001", "folder000001", "http://a.example/", "A"))
        .unwrap();

    store.apply_incoming(PlacesRecord::tombstone("folder000001")).unwrap();
    assert!(!store.item_exists("folder000001").unwrap());
    assert!(!store.item_exists("bmk000000001").unwrap());
}

/// Changes to the roots themselves are never applied.
#[test]
fn test_root_records_skipped() {
    let (places, store) = store();
    store.apply_incoming(PlacesRecord::tombstone("menu")).unwrap();
    store.apply_incoming(folder("toolbar", "menu", "Renamed")).unwrap();

    assert!(places.id_for_guid("menu").unwrap().is_some());
    assert_ne!(places.item_title(places.toolbar_folder()).unwrap().as_deref(), Some("Renamed"));
}

#[test]
fn test_create_without_parent_fails() {
    let (_places, store) = store();
    let mut record = PlacesRecord::new("bmk000000001", None, RecordKind::Bookmark);
    record.bmk_uri = Some("http://a.example/".to_string());
    assert!(matches!(
        store.apply_incoming(record),
        Err(StoreError::MissingField("parentid"))
    ));
}

#[test]
fn test_unknown_kind_fails() {
    let (_places, store) = store();
    let record: PlacesRecord =
        serde_json::from_str(r#"{"id":"odd000000001","parentid":"menu","type":"widget"}"#).unwrap();
    assert_eq!(record.kind, RecordKind::Unknown);
    assert!(matches!(store.apply_incoming(record), Err(StoreError::UnknownType(_))));
}

#[test]
fn test_separator_and_folder_records() {
    let (_places, store) = store();
    store.apply_incoming(folder("folder000001", "toolbar", "Dev")).unwrap();
    store
        .apply_incoming(PlacesRecord::new("sep000000001", Some("folder000001"), RecordKind::Separator))
        .unwrap();

    let record = store.create_record("folder000001").unwrap();
    assert_eq!(record.kind, RecordKind::Folder);
    assert_eq!(record.title.as_deref(), Some("Dev"));
    assert_eq!(record.parentid.as_deref(), Some("toolbar"));

    let record = store.create_record("sep000000001").unwrap();
    assert_eq!(record.kind, RecordKind::Separator);
    assert_eq!(record.parentid.as_deref(), Some("folder000001"));
}

#[test]
fn test_livemark_record() {
    let (places, store) = store();
    let mut record = PlacesRecord::new("live00000001", Some("toolbar"), RecordKind::Livemark);
    record.title = Some("News".to_string());
    record.site_uri = Some("http://news.example/".to_string());
    record.feed_uri = Some("http://news.example/feed.xml".to_string());
    store.apply_incoming(record).unwrap();

    let id = places.id_for_guid("live00000001").unwrap().unwrap();
    places
        .insert_bookmark(id, "http://news.example/1", DEFAULT_INDEX, Some("story"))
        .unwrap();

    let record = store.create_record("live00000001").unwrap();
    assert_eq!(record.kind, RecordKind::Livemark);
    assert_eq!(record.feed_uri.as_deref(), Some("http://news.example/feed.xml"));
    assert_eq!(record.site_uri.as_deref(), Some("http://news.example/"));

    // Feed entries are not part of the synced id set.
    let ids = store.get_all_ids().unwrap();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains("live00000001"));
}

/// A query's tag name is resolved to the local tag folder id.
#[test]
fn test_query_folder_resolved_by_tag_name() {
    let (places, store) = store();
    let mut record = PlacesRecord::new("query0000001", Some("menu"), RecordKind::Query);
    record.title = Some("Rust".to_string());
    record.bmk_uri = Some("place:folder=999&queryType=1".to_string());
    record.folder_name = Some("rust".to_string());
    store.apply_incoming(record).unwrap();

    let tag_folder = places
        .children(places.tags_folder())
        .unwrap()
        .into_iter()
        .find(|f| f.title.as_deref() == Some("rust"))
        .unwrap();
    let id = places.id_for_guid("query0000001").unwrap().unwrap();
    assert_eq!(
        places.bookmark_uri(id).unwrap(),
        Some(format!("place:folder={}&queryType=1", tag_folder.id))
    );

    let record = store.create_record("query0000001").unwrap();
    assert_eq!(record.kind, RecordKind::Query);
    assert_eq!(record.folder_name.as_deref(), Some("rust"));
}

#[test]
fn test_microsummary_record() {
    let (places, _) = store();
    let mut service = AnnotationMicrosummaries::new();
    service.install_generator("http://gen.example/weather");
    let store = BookmarksStore::new(Rc::clone(&places)).with_microsummaries(Box::new(service));

    let mut record = bookmark("micro0000001", "menu", "http://weather.example/", "Weather");
    record.kind = RecordKind::Microsummary;
    record.static_title = Some("Weather".to_string());
    record.generator_uri = Some("http://gen.example/weather".to_string());
    store.apply_incoming(record).unwrap();

    let record = store.create_record("micro0000001").unwrap();
    assert_eq!(record.kind, RecordKind::Microsummary);
    assert_eq!(record.generator_uri.as_deref(), Some("http://gen.example/weather"));
    assert_eq!(record.static_title.as_deref(), Some("Weather"));
}

/// Without a matching generator the microsummary degrades to a bookmark.
#[test]
fn test_microsummary_without_generator_is_bookmark() {
    let (places, _) = store();
    let store = BookmarksStore::new(Rc::clone(&places))
        .with_microsummaries(Box::new(AnnotationMicrosummaries::new()));

    let mut record = bookmark("micro0000001", "menu", "http://weather.example/", "Weather");
    record.kind = RecordKind::Microsummary;
    record.generator_uri = Some("http://gen.example/weather".to_string());
    store.apply_incoming(record).unwrap();

    let record = store.create_record("micro0000001").unwrap();
    assert_eq!(record.kind, RecordKind::Bookmark);
}

#[test]
fn test_create_record_for_unknown_guid_is_tombstone() {
    let (_places, store) = store();
    let record = store.create_record("gone00000001").unwrap();
    assert!(record.deleted);
    assert_eq!(record.id, "gone00000001");
}

/// A bookmark whose parent row vanished is reported under `unfiled` and
/// moved there.
#[test]
fn test_create_record_repairs_missing_parent() {
    let (places, store) = store();
    let folder = places.create_folder(places.bookmarks_menu_folder(), "Dev", DEFAULT_INDEX).unwrap();
    let id = places.insert_bookmark(folder, "http://a.example/", DEFAULT_INDEX, None).unwrap();
    let guid = places.guid_for_id(id).unwrap().unwrap();
    places
        .database()
        .connection()
        .execute("DELETE FROM items WHERE id = ?1", [folder])
        .unwrap();

    let record = store.create_record(&guid).unwrap();
    assert_eq!(record.parentid.as_deref(), Some("unfiled"));
    assert_eq!(places.folder_id_for_item(id).unwrap(), Some(places.unfiled_bookmarks_folder()));
}

#[test]
fn test_change_item_id() {
    let (places, store) = store();
    store.apply_incoming(bookmark("aaaaaaaaaaaa", "menu", "http://a.example/", "A")).unwrap();
    store.apply_incoming(bookmark("bbbbbbbbbbbb", "menu", "http://b.example/", "B")).unwrap();

    let a = places.id_for_guid("aaaaaaaaaaaa").unwrap().unwrap();
    let b = places.id_for_guid("bbbbbbbbbbbb").unwrap().unwrap();
    assert!(matches!(
        store.change_item_id("aaaaaaaaaaaa", "bbbbbbbbbbbb"),
        Err(StoreError::GuidCollision(_))
    ));
    // A rejected re-key leaves both items untouched.
    assert_eq!(places.id_for_guid("aaaaaaaaaaaa").unwrap(), Some(a));
    assert_eq!(places.id_for_guid("bbbbbbbbbbbb").unwrap(), Some(b));
    assert_eq!(places.bookmark_uri(a).unwrap().as_deref(), Some("http://a.example/"));
    assert_eq!(places.bookmark_uri(b).unwrap().as_deref(), Some("http://b.example/"));
    assert!(matches!(
        store.change_item_id("zzzzzzzzzzzz", "cccccccccccc"),
        Err(StoreError::UnknownItem(_))
    ));

    store.change_item_id("aaaaaaaaaaaa", "cccccccccccc").unwrap();
    assert!(places.id_for_guid("aaaaaaaaaaaa").unwrap().is_none());
    assert!(store.item_exists("cccccccccccc").unwrap());
}

#[test]
fn test_get_all_ids_and_wipe() {
    let (places, store) = store();
    store.apply_incoming(folder("folder000001", "menu", "Dev")).unwrap();
    let mut record = bookmark("bmk000000001", "folder000001", "http://a.example/", "A");
    record.tags = Some(vec!["rust".to_string()]);
    store.apply_incoming(record).unwrap();
    store.apply_incoming(bookmark("bmk000000002", "unfiled", "http://b.example/", "B")).unwrap();

    let mut ids: Vec<String> = store.get_all_ids().unwrap().into_iter().collect();
    ids.sort();
    assert_eq!(ids, vec!["bmk000000001", "bmk000000002", "folder000001"]);

    store.wipe().unwrap();
    assert!(store.get_all_ids().unwrap().is_empty());
    assert!(places.children(places.tags_folder()).unwrap().is_empty());
    assert_eq!(places.item_type(places.bookmarks_menu_folder()).unwrap(), Some(ItemType::Folder));
}
