//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// An agent silent for longer than this goes Offline and its job is
    /// failed as lost.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    /// How often stale agents are checked for.
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
    /// How long a cancelled job's executor gets to wind down before its
    /// agent is forcibly released.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Fallback per-job timeout when neither the job template nor the
    /// definition provides one.
    #[serde(default = "default_job_timeout_secs")]
    pub default_job_timeout_secs: u64,
    /// Scheduler command channel depth.
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

fn default_reap_interval_ms() -> u64 {
    5_000
}

fn default_cancel_grace_ms() -> u64 {
    5_000
}

fn default_job_timeout_secs() -> u64 {
    1800
}

fn default_command_buffer() -> usize {
    256
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reap_interval_ms: default_reap_interval_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            default_job_timeout_secs: default_job_timeout_secs(),
            command_buffer: default_command_buffer(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.heartbeat_timeout_ms as i64)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.heartbeat_timeout_ms, 30_000);
        assert_eq!(config.cancel_grace_ms, 5_000);
        assert_eq!(config.default_job_timeout_secs, 1800);
    }

    #[test]
    fn test_partial_override() {
        let config: EngineConfig = serde_yaml::from_str("heartbeat_timeout_ms: 100").unwrap();
        assert_eq!(config.heartbeat_timeout_ms, 100);
        assert_eq!(config.reap_interval_ms, 5_000);
    }
}
