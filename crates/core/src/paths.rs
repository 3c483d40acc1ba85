//! Centralized path functions for all app storage locations.
//!
//! Single source of truth for where the snapshot and downloads go when the
//! command line does not say otherwise.

use std::path::PathBuf;

/// App data root: `~/Library/Application Support/ytdlp-webui/` (macOS) or
/// `~/.local/share/ytdlp-webui/` (Linux).
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("ytdlp-webui"))
}

/// Registry snapshot: `<app_data_dir>/session.json`.
pub fn snapshot_path() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join("session.json"))
}

/// Default download directory: the user's Downloads folder, else `<app_data_dir>/downloads`.
pub fn download_dir() -> Option<PathBuf> {
    dirs::download_dir().or_else(|| app_data_dir().map(|d| d.join("downloads")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_data_dir() {
        let dir = app_data_dir();
        assert!(dir.is_some());
        let dir = dir.unwrap();
        assert!(dir.to_string_lossy().contains("ytdlp-webui"));
    }

    #[test]
    fn test_snapshot_path() {
        let path = snapshot_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.to_string_lossy().ends_with("session.json"));
    }

    #[test]
    fn test_download_dir() {
        assert!(download_dir().is_some());
    }
}
