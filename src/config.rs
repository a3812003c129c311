use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_SETTINGS_PATH: &str = "settings.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_url: String,
    pub credentials_path: PathBuf,
    pub rules_path: PathBuf,
    /// Gmail search query for the sync step. Empty means the whole mailbox.
    pub query: String,
    pub max_results: u32,
    pub interval_minutes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:gmail-rules.db?mode=rwc".to_string(),
            credentials_path: PathBuf::from("credentials.json"),
            rules_path: PathBuf::from("rules.json"),
            query: String::new(),
            max_results: 100,
            interval_minutes: 5,
        }
    }
}

impl Settings {
    /// Reads settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                debug!("No settings at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("{}; using defaults", e);
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Settings {
                path: path.to_path_buf(),
                source,
            })
    }
}
