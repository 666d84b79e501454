// Timeouts, topics, brick configuration
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::brick::link::{DEFAULT_BAUDRATE, DEFAULT_TIMEOUT_MS};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD: &str = "nxt/cmd"; // drive commands
pub const TOPIC_EVENTS: &str = "nxt/events"; // brick events
pub const TOPIC_HEALTH: &str = "nxt/state/health"; // health status

// Serial device the brick's Bluetooth SPP channel is bound to
pub const BRICK_PORT: &str = "/dev/rfcomm0";

/// Tunables for the brick link and the robot's periodic tasks
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BrickConfig {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// Wait between the three motor stops and closing the transport
    pub disconnect_grace_ms: u64,
    /// Delay applied to every actor command
    pub communication_delay_ms: u64,
    pub sensor_poll_period_ms: u64,
    pub motion_period_ms: u64,
}

impl Default for BrickConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUDRATE,
            read_timeout_ms: DEFAULT_TIMEOUT_MS,
            disconnect_grace_ms: 500,
            communication_delay_ms: 0,
            sensor_poll_period_ms: 100,
            motion_period_ms: 400,
        }
    }
}

impl BrickConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn communication_delay(&self) -> Duration {
        Duration::from_millis(self.communication_delay_ms)
    }

    pub fn sensor_poll_period(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_period_ms)
    }

    pub fn motion_period(&self) -> Duration {
        Duration::from_millis(self.motion_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: BrickConfig =
            serde_json::from_str(r#"{"disconnect_grace_ms": 50, "motion_period_ms": 200}"#).unwrap();
        assert_eq!(config.disconnect_grace(), Duration::from_millis(50));
        assert_eq!(config.motion_period(), Duration::from_millis(200));
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.sensor_poll_period(), Duration::from_millis(100));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(BrickConfig::load("/nonexistent/brick.json").is_err());
    }
}
