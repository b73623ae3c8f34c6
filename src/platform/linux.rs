// Bookmark sync platform paths for Linux
// Config: ~/.config/bookmark-sync
// Data:   ~/.local/share/bookmark-sync

use std::env;
use std::path::PathBuf;

const APP_DIR: &str = "bookmark-sync";

fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}

/// `$XDG_CONFIG_HOME/bookmark-sync` if set, otherwise `~/.config/bookmark-sync`.
pub fn get_config_dir() -> PathBuf {
    match env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join(APP_DIR),
        _ => home_dir().join(".config").join(APP_DIR),
    }
}

/// `$XDG_DATA_HOME/bookmark-sync` if set, otherwise `~/.local/share/bookmark-sync`.
pub fn get_data_dir() -> PathBuf {
    match env::var("XDG_DATA_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join(APP_DIR),
        _ => home_dir().join(".local").join("share").join(APP_DIR),
    }
}
