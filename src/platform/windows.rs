// Bookmark sync platform paths for Windows
// Config: %APPDATA%/bookmark-sync
// Data:   %LOCALAPPDATA%/bookmark-sync

use std::env;
use std::path::PathBuf;

/// `%APPDATA%/bookmark-sync`, roamed with the user profile.
pub fn get_config_dir() -> PathBuf {
    let appdata = env::var("APPDATA")
        .unwrap_or_else(|_| String::from("C:\\Users\\Default\\AppData\\Roaming"));
    PathBuf::from(appdata).join("bookmark-sync")
}

/// `%LOCALAPPDATA%/bookmark-sync`; the places database stays on this machine.
pub fn get_data_dir() -> PathBuf {
    let local_appdata = env::var("LOCALAPPDATA")
        .unwrap_or_else(|_| String::from("C:\\Users\\Default\\AppData\\Local"));
    PathBuf::from(local_appdata).join("bookmark-sync")
}
