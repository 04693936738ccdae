//! GroupDeck configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DeckError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

fn default_database_path() -> String {
    DeckConfig::home_dir()
        .join("groupdeck.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bridge: BridgeConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl DeckConfig {
    /// Load config from the default path (~/.groupdeck/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeckError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DeckError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| DeckError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the GroupDeck home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".groupdeck")
    }
}

/// Bridge service connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the bridge service that performs the actual group actions.
    #[serde(default = "default_bridge_url")]
    pub base_url: String,
}

fn default_bridge_url() -> String {
    "http://localhost:3001".into()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the dispatcher polls the store for due tasks, in seconds.
    /// Trades dispatch latency for store load; not a correctness parameter.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Hours ahead of UTC used when converting a tenant's recurring
    /// wall-clock time to UTC. A single fixed offset for all tenants —
    /// wrong for tenants outside the assumed zone, kept pending a real
    /// per-tenant timezone model.
    #[serde(default = "default_tz_offset")]
    pub timezone_offset_hours: i64,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_tz_offset() -> i64 {
    2
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timezone_offset_hours: default_tz_offset(),
        }
    }
}
