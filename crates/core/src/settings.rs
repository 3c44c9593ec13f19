//! User settings persistence.
//!
//! Remembers the model and output directory between runs so the CLI does
//! not have to be told every time.

use crate::error::Result;
use crate::generation::Model;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// User-configurable settings persisted between sessions.
///
/// Settings are stored as JSON in the user's config directory
/// (e.g., `~/.config/kapros/settings.json` on Linux).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Model used when none is given on the command line.
    pub model: Model,
    /// Where results are written when no output path is given.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Service URL override (takes precedence over environment).
    #[serde(default)]
    pub api_url: String,
}

impl Settings {
    /// Returns the path to the settings file.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "kapros", "kapros").map(|dirs| {
            let config_dir = dirs.config_dir();
            if !config_dir.exists() {
                let _ = fs::create_dir_all(config_dir);
            }
            config_dir.join("settings.json")
        })
    }

    /// Loads settings from disk, falling back to defaults if not found.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Loads settings from a specific file, falling back to defaults if it
    /// is missing or unreadable.
    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|content| match serde_json::from_str(&content) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    log::warn!("Ignoring malformed settings at {}: {}", path.display(), e);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Persists settings to disk.
    ///
    /// # Errors
    /// Returns an error if serialization or file writing fails.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = Self::config_path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Returns whether a service URL override is set.
    pub fn has_api_url(&self) -> bool {
        !self.api_url.trim().is_empty()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: Model::Comic2Face,
            output_dir: None,
            api_url: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kapros-settings-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn missing_file_gives_defaults() {
        let settings = Settings::load_from(&temp_path("missing"));
        assert_eq!(settings, Settings::default());
        assert!(!settings.has_api_url());
    }

    #[test]
    fn saves_and_reloads() {
        let path = temp_path("roundtrip");
        let settings = Settings {
            model: Model::Face2Comic,
            output_dir: Some(PathBuf::from("/tmp/out")),
            api_url: "http://localhost:7860".into(),
        };
        settings.save_to(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"face2comic\""));
        assert_eq!(Settings::load_from(&path), settings);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn malformed_file_falls_back() {
        let path = temp_path("malformed");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn older_files_without_new_fields_still_load() {
        let path = temp_path("old");
        fs::write(&path, r#"{"model":"comic2face"}"#).unwrap();
        let settings = Settings::load_from(&path);
        assert_eq!(settings.model, Model::Comic2Face);
        assert_eq!(settings.output_dir, None);
        fs::remove_file(&path).unwrap();
    }
}
