//! User settings
//!
//! Stored as TOML in `<config dir>/luaproc/settings.toml`. The only setting
//! today is the list of folders scanned for scripts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "luaproc";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Folders scanned for `.lua` scripts
    pub script_folders: Vec<PathBuf>,
}

impl Settings {
    /// Load from the default location; a missing file yields defaults
    pub fn load() -> Result<Self> {
        match settings_path() {
            Some(path) => Self::load_from(&path),
            None => {
                log::debug!("No config directory available, using default settings");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        let path = settings_path().context("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        log::debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Add a folder; returns false if it was already present
    pub fn add_folder(&mut self, folder: PathBuf) -> bool {
        if self.script_folders.contains(&folder) {
            return false;
        }
        self.script_folders.push(folder);
        true
    }

    /// Remove a folder; returns false if it was not present
    pub fn remove_folder(&mut self, folder: &Path) -> bool {
        let before = self.script_folders.len();
        self.script_folders.retain(|f| f != folder);
        self.script_folders.len() != before
    }

    /// Configured folders, or the default user folder when none are set
    pub fn resolve_folders(&self) -> Vec<PathBuf> {
        if self.script_folders.is_empty() {
            default_scripts_folder().into_iter().collect()
        } else {
            self.script_folders.clone()
        }
    }
}

/// `<config dir>/luaproc/settings.toml`
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(SETTINGS_FILE))
}

/// `<data dir>/luaproc/scripts`
pub fn default_scripts_folder() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(APP_DIR).join("scripts"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);

        let mut settings = Settings::default();
        assert!(settings.add_folder(PathBuf::from("/srv/scripts")));
        assert!(!settings.add_folder(PathBuf::from("/srv/scripts")));
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.script_folders, vec![PathBuf::from("/srv/scripts")]);
    }

    #[test]
    fn test_parse_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "script_folders = [\"/a\", \"/b\"]\n").unwrap();

        let mut settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.resolve_folders(), vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(settings.remove_folder(Path::new("/a")));
        assert!(!settings.remove_folder(Path::new("/a")));
    }

    #[test]
    fn test_invalid_toml_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "script_folders = 5").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn test_resolve_defaults_to_user_folder() {
        let settings = Settings::default();
        assert_eq!(
            settings.resolve_folders(),
            default_scripts_folder().into_iter().collect::<Vec<_>>()
        );
    }
}
