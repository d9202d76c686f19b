//! Forwarder configuration

use crate::forwarder::retry::RetryPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Forwarder configuration
///
/// Stored as JSON. Missing fields take their default values.
///
/// # Example
/// ```rust,no_run
/// use olive_forwarder::ForwarderConfig;
///
/// // Load config (returns default if file doesn't exist)
/// let config = ForwarderConfig::load("forwarder.json").expect("Failed to load");
/// println!("Mapping attempts: {}", config.retry_attempts);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Maximum `AddPortMapping` attempts per port
    pub retry_attempts: u32,
    /// Pause between two attempts in milliseconds
    pub retry_delay_ms: u64,
    /// SSDP search timeout in milliseconds
    pub search_timeout_ms: u64,
    /// Pause between two SSDP searches in milliseconds
    pub search_interval_ms: u64,
}

impl ForwarderConfig {
    /// Load configuration from a JSON file
    ///
    /// Returns the defaults if the file doesn't exist or is empty.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Retry policy for `AddPortMapping`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            retry_delay_ms: 5_000,
            search_timeout_ms: 5_000,
            search_interval_ms: 10_000,
        }
    }
}
