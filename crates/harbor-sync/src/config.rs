//! # Sync Configuration
//!
//! Configuration management for the sync engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HARBOR_REMOTE_URL=https://api.example.com                          │
//! │     HARBOR_PUSH_PARALLELISM=4                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/harbor/sync.toml (Linux)                                 │
//! │     ~/Library/Application Support/dev.harbor.harbor/sync.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     parallelism 1, page size 50, no remote                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [store]
//! database_path = "/var/lib/app/harbor.db"
//! max_connections = 5
//!
//! [remote]
//! base_url = "https://api.example.com"
//! timeout_secs = 30
//!
//! [push]
//! max_parallelism = 4
//!
//! [pull]
//! parallelism = 2
//! page_size = 50
//! writer_queue_capacity = 64
//! ```

use harbor_core::validation::validate_parallelism;
use harbor_db::DbConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Store Settings
// =============================================================================

/// Local SQLite store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Path to the database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "harbor", "harbor")
        .map(|dirs| dirs.data_dir().join("harbor.db"))
        .unwrap_or_else(|| PathBuf::from("harbor.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl StoreSettings {
    /// Builds the pool configuration for this store.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database_path).max_connections(self.max_connections)
    }
}

// =============================================================================
// Remote Settings
// =============================================================================

/// Remote service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL of the table service. Required for the HTTP remote.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

impl Default for RemoteSettings {
    fn default() -> Self {
        RemoteSettings {
            base_url: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl RemoteSettings {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// =============================================================================
// Push / Pull Settings
// =============================================================================

/// Push behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSettings {
    /// Concurrent push workers (1-8).
    #[serde(default = "default_parallelism")]
    pub max_parallelism: usize,
}

impl Default for PushSettings {
    fn default() -> Self {
        PushSettings {
            max_parallelism: default_parallelism(),
        }
    }
}

/// Pull behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullSettings {
    /// Tables fetched concurrently (1-8).
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Rows requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Bound of the store writer's request channel.
    #[serde(default = "default_writer_queue_capacity")]
    pub writer_queue_capacity: usize,
}

fn default_parallelism() -> usize {
    1
}

fn default_page_size() -> u32 {
    50
}

fn default_writer_queue_capacity() -> usize {
    64
}

impl Default for PullSettings {
    fn default() -> Self {
        PullSettings {
            parallelism: default_parallelism(),
            page_size: default_page_size(),
            writer_queue_capacity: default_writer_queue_capacity(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete sync configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarborConfig {
    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub push: PushSettings,

    #[serde(default)]
    pub pull: PullSettings,
}

impl HarborConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref base) = self.remote.base_url {
            let parsed = url::Url::parse(base)?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(SyncError::InvalidUrl(format!(
                    "Remote URL must start with http:// or https://, got: {}",
                    base
                )));
            }
        }

        validate_parallelism("push.max_parallelism", self.push.max_parallelism)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        validate_parallelism("pull.parallelism", self.pull.parallelism)
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        if self.pull.page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "pull.page_size must be greater than 0".into(),
            ));
        }

        if self.pull.writer_queue_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "pull.writer_queue_capacity must be greater than 0".into(),
            ));
        }

        if self.store.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "store.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("HARBOR_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.store.database_path = PathBuf::from(path);
        }

        if let Ok(url) = std::env::var("HARBOR_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.remote.base_url = Some(url);
        }

        if let Ok(value) = std::env::var("HARBOR_PUSH_PARALLELISM") {
            match value.parse::<usize>() {
                Ok(p) => self.push.max_parallelism = p,
                Err(_) => warn!(value = %value, "Ignoring invalid HARBOR_PUSH_PARALLELISM"),
            }
        }

        if let Ok(value) = std::env::var("HARBOR_PULL_PARALLELISM") {
            match value.parse::<usize>() {
                Ok(p) => self.pull.parallelism = p,
                Err(_) => warn!(value = %value, "Ignoring invalid HARBOR_PULL_PARALLELISM"),
            }
        }

        if let Ok(value) = std::env::var("HARBOR_PAGE_SIZE") {
            match value.parse::<u32>() {
                Ok(size) => self.pull.page_size = size,
                Err(_) => warn!(value = %value, "Ignoring invalid HARBOR_PAGE_SIZE"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "harbor", "harbor")
            .map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the remote base URL if configured.
    pub fn remote_url(&self) -> Option<&str> {
        self.remote.base_url.as_deref()
    }
}
