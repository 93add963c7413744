//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::address::{ControlAddress, is_valid_id};
use super::env::LogLevel;
use super::error::ConfigError;

/// Configuration for a hotwire root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Id of the root unit (its address is `/<root_id>`)
    pub root_id: String,

    /// Milliseconds between driver ticks; 0 disables ticking
    pub tick_period_ms: u64,

    /// Bounded wait for cross-thread hand-off, in milliseconds
    pub handoff_timeout_ms: u64,

    /// Maximum calls processed per pass before yielding
    pub call_budget: usize,

    /// Logical time after which host requests made with a timeout fail
    pub default_call_timeout: i64,

    /// Threshold for unit log lines
    pub log_level: LogLevel,

    /// Control receiving flushed unit log lines, if any
    pub log_destination: Option<ControlAddress>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root_id: "root".to_string(),
            tick_period_ms: 10,
            handoff_timeout_ms: 1000,
            call_budget: 10_000,
            default_call_timeout: 1000,
            log_level: LogLevel::Info,
            log_destination: None,
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration from a JSON file; missing keys take defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path)?;
        let config: RuntimeConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check values for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_id(&self.root_id) {
            return Err(ConfigError::Invalid(format!(
                "root id '{}' is not a valid identifier",
                self.root_id
            )));
        }
        if self.call_budget == 0 {
            return Err(ConfigError::Invalid("call budget must be positive".into()));
        }
        if self.handoff_timeout_ms == 0 {
            return Err(ConfigError::Invalid("hand-off timeout must be positive".into()));
        }
        Ok(())
    }

    /// Hand-off wait as a duration
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    /// Tick period as a duration, `None` when ticking is disabled
    pub fn tick_period(&self) -> Option<Duration> {
        (self.tick_period_ms > 0).then(|| Duration::from_millis(self.tick_period_ms))
    }
}
