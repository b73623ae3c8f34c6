// Bookmark sync state managers
// Managers own local state: the places tree, pending changes, and record translation.

pub mod change_tracker;
pub mod places_store;
pub mod record_store;
