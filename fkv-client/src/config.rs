//! Configuration for the cache client

use std::time::Duration;

use serde::Deserialize;

use crate::connection::DialOptions;
use crate::discovery::Roster;
use crate::error::{ClientError, ClientResult};
use crate::pool::PoolConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Candidate endpoints in probe order, e.g. ["10.0.0.1:6379", "10.0.0.2:6379"]
    pub roster: Vec<String>,

    /// Password sent with AUTH (empty or absent = no AUTH)
    pub password: Option<String>,

    /// Database index passed to SELECT
    pub db: u32,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Read/write timeout in milliseconds for commands and role probes
    pub io_timeout_ms: u64,

    pub pool: PoolSettings,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            roster: vec!["127.0.0.1:6379".to_string()],
            password: None,
            db: 0,
            connect_timeout_ms: 1000,
            io_timeout_ms: 1000,
            pool: PoolSettings::default(),
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of idle connections kept for reuse
    pub max_idle: usize,

    /// Idle connections older than this are closed (seconds)
    pub idle_timeout_secs: u64,

    /// Skip the role probe for connections validated this recently (seconds)
    pub validation_cooldown_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle: 64,
            idle_timeout_secs: 300, // 5 minutes
            validation_cooldown_secs: 5,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> ClientResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> ClientResult<Self> {
        toml::from_str(contents)
            .map_err(|e| ClientError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables or use defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(roster) = std::env::var("FKV_ROSTER") {
            config.roster = roster.split(',').map(|addr| addr.trim().to_string()).collect();
        }

        if let Ok(password) = std::env::var("FKV_PASSWORD") {
            config.password = Some(password);
        }

        if let Ok(db) = std::env::var("FKV_DB") {
            if let Ok(n) = db.parse() {
                config.db = n;
            }
        }

        if let Ok(max_idle) = std::env::var("FKV_MAX_IDLE") {
            if let Ok(n) = max_idle.parse() {
                config.pool.max_idle = n;
            }
        }

        if let Ok(secs) = std::env::var("FKV_IDLE_TIMEOUT_SECS") {
            if let Ok(n) = secs.parse() {
                config.pool.idle_timeout_secs = n;
            }
        }

        if let Ok(secs) = std::env::var("FKV_VALIDATION_COOLDOWN_SECS") {
            if let Ok(n) = secs.parse() {
                config.pool.validation_cooldown_secs = n;
            }
        }

        config
    }

    pub fn roster(&self) -> ClientResult<Roster> {
        Roster::new(self.roster.iter().cloned())
    }

    pub fn dial_options(&self) -> DialOptions {
        DialOptions {
            password: self.password.clone().filter(|p| !p.is_empty()),
            db: self.db,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_idle: self.pool.max_idle,
            idle_timeout: Duration::from_secs(self.pool.idle_timeout_secs),
            validation_cooldown: Duration::from_secs(self.pool.validation_cooldown_secs),
        }
    }
}
