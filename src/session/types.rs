//! Command log data types
//!
//! A command log is the raw, replayable record of a drive session: every
//! chassis, arm and gripper command with its time offset and, for chassis
//! commands, the pose the robot reported when the command was issued.
//!
//! # File Format
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "recorded_at": "2024-05-01T14:03:22.123456Z",
//!   "duration": 12.5,
//!   "command_count": 2,
//!   "commands": [
//!     {"time": 0.0, "type": "chassis_speed", "vx": 0.5, "vy": 0.0, "vz": 0.0,
//!      "expected_pos": {"x": 0.0, "y": 0.0, "z": 0.0}},
//!     {"time": 1.2, "type": "gripper_open", "power": 50}
//!   ]
//! }
//! ```

use crate::error::{Result, ResultExt, TeleopError};
use crate::types::Pose;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Log format version written by this crate
pub const LOG_VERSION: &str = "1.0";

/// A single robot command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    /// Continuous chassis velocity (m/s, m/s, deg/s)
    #[serde(alias = "drive_speed")]
    ChassisSpeed { vx: f64, vy: f64, vz: f64 },
    /// Relative chassis move (m, m, deg)
    #[serde(alias = "drive_move")]
    ChassisMove {
        x: f64,
        y: f64,
        z: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        xy_speed: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        z_speed: Option<f64>,
    },
    /// Relative arm move (mm)
    ArmMove { x: f64, y: f64 },
    ArmRecenter,
    GripperOpen {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        power: Option<u8>,
    },
    GripperClose {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        power: Option<u8>,
    },
    GripperStop,
    /// Halt the chassis
    Stop,
}

impl CommandKind {
    /// Type tag as written in the log
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::ChassisSpeed { .. } => "chassis_speed",
            CommandKind::ChassisMove { .. } => "chassis_move",
            CommandKind::ArmMove { .. } => "arm_move",
            CommandKind::ArmRecenter => "arm_recenter",
            CommandKind::GripperOpen { .. } => "gripper_open",
            CommandKind::GripperClose { .. } => "gripper_close",
            CommandKind::GripperStop => "gripper_stop",
            CommandKind::Stop => "stop",
        }
    }

    /// Commands that move the chassis carry an expected pose
    pub fn is_chassis(&self) -> bool {
        matches!(
            self,
            CommandKind::ChassisSpeed { .. } | CommandKind::ChassisMove { .. }
        )
    }

    /// Commands that change the gripper motor state
    pub fn is_gripper(&self) -> bool {
        matches!(
            self,
            CommandKind::GripperOpen { .. }
                | CommandKind::GripperClose { .. }
                | CommandKind::GripperStop
        )
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let numbers: Vec<(&str, f64)> = match *self {
            CommandKind::ChassisSpeed { vx, vy, vz } => vec![("vx", vx), ("vy", vy), ("vz", vz)],
            CommandKind::ChassisMove {
                x,
                y,
                z,
                xy_speed,
                z_speed,
            } => {
                for (name, speed) in [("xy_speed", xy_speed), ("z_speed", z_speed)] {
                    if let Some(speed) = speed {
                        if !(speed.is_finite() && speed > 0.0) {
                            return Err(format!("{} must be positive, got {}", name, speed));
                        }
                    }
                }
                vec![("x", x), ("y", y), ("z", z)]
            }
            CommandKind::ArmMove { x, y } => vec![("x", x), ("y", y)],
            CommandKind::GripperOpen { power } | CommandKind::GripperClose { power } => {
                if let Some(power) = power {
                    if power > 100 {
                        return Err(format!("power must be at most 100, got {}", power));
                    }
                }
                Vec::new()
            }
            CommandKind::ArmRecenter | CommandKind::GripperStop | CommandKind::Stop => Vec::new(),
        };

        for (name, value) in numbers {
            if !value.is_finite() {
                return Err(format!("{} is not finite", name));
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::ChassisSpeed { vx, vy, vz } => {
                write!(f, "chassis_speed({:.2}, {:.2}, {:.1})", vx, vy, vz)
            }
            CommandKind::ChassisMove { x, y, z, .. } => {
                write!(f, "chassis_move({:.2}, {:.2}, {:.1})", x, y, z)
            }
            CommandKind::ArmMove { x, y } => write!(f, "arm_move({:.1}, {:.1})", x, y),
            CommandKind::GripperOpen { power: Some(p) } => write!(f, "gripper_open({})", p),
            CommandKind::GripperClose { power: Some(p) } => write!(f, "gripper_close({})", p),
            other => f.write_str(other.name()),
        }
    }
}

/// Pose recorded alongside a chassis command (metres, metres, degrees)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExpectedPosition {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Yaw in degrees
    #[serde(default)]
    pub z: f64,
}

impl From<Pose> for ExpectedPosition {
    fn from(pose: Pose) -> Self {
        Self {
            x: pose.x,
            y: pose.y,
            z: pose.yaw,
        }
    }
}

impl From<ExpectedPosition> for Pose {
    fn from(pos: ExpectedPosition) -> Self {
        Pose::new(pos.x, pos.y, pos.z)
    }
}

/// One entry of the command log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCommand {
    /// Seconds since the start of recording
    #[serde(alias = "time_offset")]
    pub time: f64,
    #[serde(flatten)]
    pub kind: CommandKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pos: Option<ExpectedPosition>,
}

impl RecordedCommand {
    /// Create a command without an expected pose
    pub fn new(time: f64, kind: CommandKind) -> Self {
        Self {
            time,
            kind,
            expected_pos: None,
        }
    }

    /// Attach an expected pose
    pub fn with_expected(mut self, pos: ExpectedPosition) -> Self {
        self.expected_pos = Some(pos);
        self
    }
}

/// Summary shown before a replay starts
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingInfo {
    pub version: String,
    pub recorded_at: DateTime<Utc>,
    pub duration: f64,
    pub command_count: usize,
    /// Commands gated on an expected pose
    pub positioned_commands: usize,
}

/// Versioned, immutable command log document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandLog {
    pub version: String,
    #[serde(deserialize_with = "deserialize_recorded_at")]
    pub recorded_at: DateTime<Utc>,
    /// Seconds from start of recording to save
    #[serde(default)]
    pub duration: f64,
    pub command_count: usize,
    pub commands: Vec<RecordedCommand>,
}

/// Accept RFC 3339 as well as naive ISO 8601 timestamps (read as UTC)
fn deserialize_recorded_at<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid recorded_at {:?}: {}", raw, e)))
}

impl CommandLog {
    /// Wrap already-optimised commands into a new document
    pub fn new(recorded_at: DateTime<Utc>, duration: f64, commands: Vec<RecordedCommand>) -> Self {
        Self {
            version: LOG_VERSION.to_string(),
            recorded_at,
            duration,
            command_count: commands.len(),
            commands,
        }
    }

    /// Load and validate a log file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TeleopError::Replay(format!("Failed to read recording {:?}: {}", path, e))
        })?;
        let log: Self = serde_json::from_str(&content).map_err(|e| {
            TeleopError::Replay(format!("Failed to parse recording {:?}: {}", path, e))
        })?;
        log.validate()?;
        Ok(log)
    }

    /// Write the log as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write recording {:?}", path))
    }

    /// Reject documents a replay could not execute faithfully
    pub fn validate(&self) -> Result<()> {
        let major = self.version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(TeleopError::Replay(format!(
                "unsupported recording version {:?}",
                self.version
            )));
        }
        if self.command_count != self.commands.len() {
            return Err(TeleopError::Replay(format!(
                "command_count is {} but {} commands are present",
                self.command_count,
                self.commands.len()
            )));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(TeleopError::Replay(format!(
                "invalid duration {}",
                self.duration
            )));
        }

        let mut last_time = 0.0;
        for (i, cmd) in self.commands.iter().enumerate() {
            if !cmd.time.is_finite() || cmd.time < last_time {
                return Err(TeleopError::Replay(format!(
                    "command {} has time {} after {}",
                    i, cmd.time, last_time
                )));
            }
            last_time = cmd.time;

            cmd.kind
                .validate()
                .map_err(|e| TeleopError::Replay(format!("command {} ({}): {}", i, cmd.kind.name(), e)))?;

            if let Some(pos) = cmd.expected_pos {
                if !(pos.x.is_finite() && pos.y.is_finite() && pos.z.is_finite()) {
                    return Err(TeleopError::Replay(format!(
                        "command {} has a non-finite expected position",
                        i
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the log holds no commands
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Summary for display
    pub fn info(&self) -> RecordingInfo {
        RecordingInfo {
            version: self.version.clone(),
            recorded_at: self.recorded_at,
            duration: self.duration,
            command_count: self.commands.len(),
            positioned_commands: self
                .commands
                .iter()
                .filter(|c| c.expected_pos.is_some())
                .count(),
        }
    }
}
