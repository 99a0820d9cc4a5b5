//! Cross-platform paths.

use std::path::PathBuf;

/// Get the application data directory.
///
/// - Linux: `~/.local/share/courier`
/// - Windows: `%LOCALAPPDATA%\courier`
/// - macOS: `~/Library/Application Support/courier`
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
}

/// Get the configuration directory.
///
/// - Linux: `~/.config/courier`
/// - Windows: `%APPDATA%\courier`
/// - macOS: `~/Library/Application Support/courier`
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
}

/// Get the path to the main config file.
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Get the path of the local message database inside `data_dir`.
pub fn database_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("courier.db")
}
