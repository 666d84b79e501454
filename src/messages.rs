// Define message types for the runtime

use serde::{Deserialize, Serialize};

// Command from teleop/scripts -> runtime
// One JSON object per sample, e.g. {"velocity":{"x":0.0,"y":0.5}}
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DriveCommand {
    /// x steers, y drives, both in [-1, 1]
    Velocity { x: f64, y: f64 },
    /// Robot-specific action (shoot, bumper test)
    Action { start: bool },
    EmergencyStop { stop: bool },
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// Emergency stop latched; velocity commands are ignored
    EmergencyStop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_json() {
        let cmd: DriveCommand = serde_json::from_str(r#"{"velocity":{"x":-0.5,"y":1.0}}"#).unwrap();
        assert_eq!(cmd, DriveCommand::Velocity { x: -0.5, y: 1.0 });

        let cmd: DriveCommand = serde_json::from_str(r#"{"emergency_stop":{"stop":true}}"#).unwrap();
        assert_eq!(cmd, DriveCommand::EmergencyStop { stop: true });

        assert_eq!(
            serde_json::to_string(&DriveCommand::Action { start: false }).unwrap(),
            r#"{"action":{"start":false}}"#
        );
    }

    #[test]
    fn test_rejects_unknown_command() {
        assert!(serde_json::from_str::<DriveCommand>(r#"{"turn":{"degree":45}}"#).is_err());
    }

    #[test]
    fn test_health_json() {
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(),
            r#""cmd_stale""#
        );
    }
}
