//! Configuration file support for the lumawear CLI.
//!
//! Configuration is loaded from multiple sources with the following
//! priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (LUMAWEAR_*)
//! 3. Local config file (./lumawear.toml)
//! 4. Global config file (~/.config/lumawear/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ConnectionConfig {
    /// Preferred endpoint: a serial port path or `pipe:<path>`.
    pub endpoint: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// An explicit `--config` path replaces the search entirely.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut config = Self::default();

        if let Some(path) = explicit {
            match Self::load_from_file(path) {
                Some(loaded) => {
                    debug!("loaded config from {}", path.display());
                    config.merge(loaded);
                }
                None => warn!("could not read config file {}", path.display()),
            }
            return config;
        }

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                if let Some(global) = Self::load_from_file(&global_path) {
                    debug!("loaded global config from {}", global_path.display());
                    config.merge(global);
                }
            }
        }

        // Local config overrides global
        if let Some(local) = Self::load_from_file(Path::new("lumawear.toml")) {
            debug!("loaded local config from lumawear.toml");
            config.merge(local);
        }

        config
    }

    fn merge(&mut self, other: Self) {
        if other.connection.endpoint.is_some() {
            self.connection.endpoint = other.connection.endpoint;
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        match toml::from_str(&text) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("ignoring malformed config {}: {e}", path.display());
                None
            }
        }
    }

    fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lumawear").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Persist `endpoint` as the default in the global config file.
    pub fn save_endpoint(&mut self, endpoint: &str) -> anyhow::Result<()> {
        self.connection.endpoint = Some(endpoint.to_string());

        let Some(path) = Self::global_config_path() else {
            anyhow::bail!("no config directory available");
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!("saved config to {}", path.display());
        Ok(())
    }
}
