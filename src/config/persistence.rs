// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration persistence (save/load).

use crate::config::AppConfig;
use crate::status::EffectParameters;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Manages configuration file persistence.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager in the user's config directory.
    pub fn new() -> Result<Self, ConfigError> {
        let project_dirs =
            ProjectDirs::from("", "", "globalfx").ok_or(ConfigError::NoConfigDir)?;
        Self::with_dir(project_dirs.config_dir())
    }

    /// Create a config manager rooted at `dir`, creating it if needed.
    pub fn with_dir(dir: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            config_dir: dir.to_path_buf(),
        })
    }

    /// Get the path to the main config file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Get the path to the saved effect parameters.
    pub fn parameters_path(&self) -> PathBuf {
        self.config_dir.join("parameters.toml")
    }

    /// Load the application config.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        let path = self.config_path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            Ok(AppConfig::from_toml(&content)?)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Save the application config.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = config.to_toml()?;
        fs::write(self.config_path(), content)?;
        Ok(())
    }

    /// Load the last used effect parameters, clamped into range.
    pub fn load_parameters(&self) -> Result<EffectParameters, ConfigError> {
        let path = self.parameters_path();
        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let params: EffectParameters = toml::from_str(&content)?;
            Ok(params.clamped())
        } else {
            Ok(EffectParameters::default())
        }
    }

    /// Save the effect parameters.
    pub fn save_parameters(&self, params: &EffectParameters) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(params)?;
        fs::write(self.parameters_path(), content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectPolicy;

    #[test]
    fn test_missing_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();
        assert_eq!(manager.load_config().unwrap(), AppConfig::default());
        assert_eq!(
            manager.load_parameters().unwrap(),
            EffectParameters::default()
        );
    }

    #[test]
    fn test_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(&dir.path().join("nested")).unwrap();

        let mut config = AppConfig::default();
        config.effect.reconnect = ReconnectPolicy::RestoreOnReady;
        config.worker.call_timeout_ms = 500;
        manager.save_config(&config).unwrap();

        assert_eq!(manager.load_config().unwrap(), config);
    }

    #[test]
    fn test_parameters_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();

        let params = EffectParameters {
            intensity: 0.25,
            spatial_width: 0.75,
            distance: 0.0,
        };
        manager.save_parameters(&params).unwrap();
        assert_eq!(manager.load_parameters().unwrap(), params);
    }

    #[test]
    fn test_hand_edited_parameters_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();
        fs::write(manager.parameters_path(), "intensity = 3.0\ndistance = -1.0\n").unwrap();

        let params = manager.load_parameters().unwrap();
        assert_eq!(params.intensity, 1.0);
        assert_eq!(params.spatial_width, 1.0);
        assert_eq!(params.distance, 0.0);
    }

    #[test]
    fn test_corrupt_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::with_dir(dir.path()).unwrap();
        fs::write(manager.config_path(), "[worker\n").unwrap();
        assert!(matches!(
            manager.load_config(),
            Err(ConfigError::TomlParse(_))
        ));
    }
}
