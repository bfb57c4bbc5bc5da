//! Server configuration
//!
//! Values come from an optional TOML file; the `server` binary then applies
//! command-line overrides on top. Every field has a default, so an empty file
//! (or no file) yields a working configuration.

use serde::Deserialize;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub host: String,
    /// Listening port; 0 picks an ephemeral port
    pub port: u16,
    /// Seconds without inbound bytes before a session is dropped
    pub timeout_secs: u64,
    /// Cap on queued updates per session
    pub max_pending_updates: usize,
    /// First side-channel port handed out by the pool
    pub port_range_start: u16,
    /// Last side-channel port, inclusive
    pub port_range_end: u16,
    /// Pause before the supervisor rebuilds a crashed server
    pub restart_delay_secs: u64,
    /// Where registered users are persisted; in-memory only when unset
    pub users_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9252,
            timeout_secs: 15,
            max_pending_updates: 10_000,
            port_range_start: 9000,
            port_range_end: 9009,
            restart_delay_secs: 10,
            users_file: None,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port_range_start > self.port_range_end {
            return Err(ConfigError::Invalid(format!(
                "port range {}-{} is inverted",
                self.port_range_start, self.port_range_end
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        // Heartbeats report the update count as an i16.
        if self.max_pending_updates == 0 || self.max_pending_updates > i16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_pending_updates must be within 1..={}",
                i16::MAX
            )));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }
}
