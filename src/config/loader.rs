//! Settings loading and saving.
//!
//! The gateway persists the settings document verbatim (raw bytes) so a
//! save/load round trip returns exactly what was posted. The typed helpers
//! below parse into [`SessionConfig`], falling back to defaults when the
//! file is missing or corrupt.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::schema::SessionConfig;
use crate::utils::helpers::get_data_path;

/// Default settings file path (`~/.voxlink/settings.json`).
pub fn settings_path() -> PathBuf {
    get_data_path().join("settings.json")
}

/// Load settings from a file, or return a default [`SessionConfig`] if the
/// file does not exist or cannot be parsed.
pub fn load_settings(path: Option<&Path>) -> SessionConfig {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => settings_path(),
    };

    if path.exists() {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<SessionConfig>(&contents) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        "Failed to parse settings from {}: {}. Using defaults.",
                        path.display(),
                        e
                    );
                }
            },
            Err(e) => {
                warn!(
                    "Failed to read settings from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
            }
        }
    }

    SessionConfig::default()
}

/// Save settings to a JSON file. Parent directories are created if needed.
pub fn save_settings(config: &SessionConfig, path: Option<&Path>) {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => settings_path(),
    };

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            if let Err(e) = fs::write(&path, json) {
                warn!("Failed to write settings to {}: {}", path.display(), e);
            }
        }
        Err(e) => {
            warn!("Failed to serialize settings: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_nonexistent_returns_default() {
        let path = Path::new("/tmp/voxlink_test_does_not_exist_472913.json");
        let cfg = load_settings(Some(path));
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn test_load_corrupt_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let cfg = load_settings(Some(&path));
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn test_load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut cfg = SessionConfig::default();
        cfg.voice = "alloy".into();
        cfg.initial_greeting = Some("Hello!".into());
        save_settings(&cfg, Some(&path));

        let loaded = load_settings(Some(&path));
        assert_eq!(loaded, cfg);
    }
}
