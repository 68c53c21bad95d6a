use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const DEFAULT_DATABASE: &str = "rankshelf.db";
const DEFAULT_BACKUP: &str = "rankshelf-backup.json";
const DEFAULT_SESSION: &str = "rankshelf-session.json";
const DEFAULT_METADATA_URL: &str = "https://api.jikan.moe/v4";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Configuration {
    pub storage: Option<StorageConfig>,
    pub metadata: Option<MetadataConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_backup")]
    pub backup: String,
    #[serde(default = "default_session")]
    pub session: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetadataConfig {
    #[serde(rename = "baseUrl", default = "default_metadata_url")]
    pub base_url: String,
    #[serde(rename = "timeoutSeconds", default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_backup() -> String {
    DEFAULT_BACKUP.to_string()
}

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

fn default_metadata_url() -> String {
    DEFAULT_METADATA_URL.to_string()
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            backup: default_backup(),
            session: default_session(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: default_metadata_url(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Configuration {
    /// Load from YAML. A missing file is not an error: every setting has a default.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            warn!("Configuration file {} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // An empty document deserializes to unit, not to an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Configuration = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    pub fn metadata(&self) -> MetadataConfig {
        self.metadata.clone().unwrap_or_default()
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata().timeout_seconds)
    }
}
