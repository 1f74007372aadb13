// Bus locations, version whitelist and convergence tuning
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// I2C adapter the cape header is wired to
pub const BUS_DEVICE: &str = "/dev/i2c-1";

// Sysfs directory holding the per-slot identity EEPROMs
pub const EEPROM_ROOT: &str = "/sys/bus/i2c/devices";

// Slot 0 address; slots 1-3 follow consecutively
pub const BASE_ADDRESS: u16 = 0x2c;

// On-board software versions this register map is valid for
pub const COMPATIBLE_VERSIONS: &[&str] = &["05", "06"];

// Identity string prefix of every DMCC cape
pub const IDENTITY_PREFIX: &str = "DMCC Mk";

// Power command limits
pub const MAX_POWER: i32 = 10_000;

// Convergence defaults
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(30);
pub const POSITION_THRESHOLD: [u32; 2] = [30, 30];
pub const VELOCITY_THRESHOLD: [u32; 2] = [5, 5];
pub const VELOCITY_SETTLE: Duration = Duration::from_secs(2);
pub const POLL_INTERVAL: Duration = Duration::ZERO;

// Sampling period of the monitoring commands
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Tuning for the blocking move-until operations
///
/// Thresholds are indexed by motor (motor 1 first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub position_threshold: [u32; 2],
    pub velocity_threshold: [u32; 2],
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub velocity_settle_ms: u64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            position_threshold: POSITION_THRESHOLD,
            velocity_threshold: VELOCITY_THRESHOLD,
            timeout_ms: CONVERGENCE_TIMEOUT.as_millis() as u64,
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            velocity_settle_ms: VELOCITY_SETTLE.as_millis() as u64,
        }
    }
}

impl ConvergenceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn velocity_settle(&self) -> Duration {
        Duration::from_millis(self.velocity_settle_ms)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConvergenceConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.position_threshold, [30, 30]);
        assert_eq!(config.velocity_threshold, [5, 5]);
        assert_eq!(config.velocity_settle(), Duration::from_secs(2));
        assert!(config.poll_interval().is_zero());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ConvergenceConfig =
            serde_json::from_str(r#"{"position_threshold": [10, 12], "timeout_ms": 500}"#).unwrap();
        assert_eq!(config.position_threshold, [10, 12]);
        assert_eq!(config.timeout(), Duration::from_millis(500));
        assert_eq!(config.velocity_threshold, VELOCITY_THRESHOLD);
    }

    #[test]
    fn test_missing_file() {
        let err = ConvergenceConfig::from_json_file(Path::new("/nonexistent/dmcc.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
