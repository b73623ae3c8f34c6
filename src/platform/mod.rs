// Bookmark sync platform abstraction
// Resolves where settings, account state, and the places database live.
//
// Uses `cfg(target_os)` to select the platform implementation at compile time.

use std::path::PathBuf;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

#[cfg(target_os = "windows")]
mod windows;

/// Returns the platform-specific configuration directory.
///
/// - **Linux**: `~/.config/bookmark-sync` (or `$XDG_CONFIG_HOME/bookmark-sync`)
/// - **macOS**: `~/Library/Application Support/bookmark-sync`
/// - **Windows**: `%APPDATA%/bookmark-sync`
pub fn get_config_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        linux::get_config_dir()
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_config_dir()
    }
    #[cfg(target_os = "windows")]
    {
        windows::get_config_dir()
    }
}

/// Returns the platform-specific data directory.
///
/// - **Linux**: `~/.local/share/bookmark-sync` (or `$XDG_DATA_HOME/bookmark-sync`)
/// - **macOS**: `~/Library/Application Support/bookmark-sync`
/// - **Windows**: `%LOCALAPPDATA%/bookmark-sync`
pub fn get_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        linux::get_data_dir()
    }
    #[cfg(target_os = "macos")]
    {
        macos::get_data_dir()
    }
    #[cfg(target_os = "windows")]
    {
        windows::get_data_dir()
    }
}

/// Places database path. Absolute `file` names are used as given.
pub fn database_path(file: &str) -> PathBuf {
    resolve(get_data_dir(), file)
}

/// Account description path. Absolute `file` names are used as given.
pub fn account_path(file: &str) -> PathBuf {
    resolve(get_config_dir(), file)
}

fn resolve(dir: PathBuf, file: &str) -> PathBuf {
    let path = PathBuf::from(file);
    if path.is_absolute() {
        path
    } else {
        dir.join(path)
    }
}
