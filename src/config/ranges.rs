//! Per-channel action ranges
//!
//! Each named action channel carries a `(min, max)` range used twice:
//! aggregation clamps gripper sums into it, and normalisation maps it
//! affinely onto `[-1, 1]`.
//!
//! In TOML the ranges are written as two-element arrays:
//!
//! ```toml
//! [capture.action_ranges]
//! move_x = [-1.0, 1.0]
//! gripper_open = [0.0, 100.0]
//! ```

use crate::error::{Result, TeleopError};
use crate::types::ActionField;
use serde::{Deserialize, Serialize};

/// Inclusive `(min, max)` range for one action channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct ChannelRange {
    pub min: f64,
    pub max: f64,
}

impl ChannelRange {
    /// Create a new range
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Width of the range
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Clip a value into the range
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    /// Whether a value lies inside the range
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(TeleopError::Config(format!(
                "range for {} must be finite, got ({}, {})",
                name, self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(TeleopError::Config(format!(
                "range for {} has min {} greater than max {}",
                name, self.min, self.max
            )));
        }
        Ok(())
    }
}

impl From<(f64, f64)> for ChannelRange {
    fn from((min, max): (f64, f64)) -> Self {
        Self { min, max }
    }
}

impl From<ChannelRange> for (f64, f64) {
    fn from(range: ChannelRange) -> Self {
        (range.min, range.max)
    }
}

/// Ranges for every named action channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionRanges {
    pub move_x: ChannelRange,
    pub move_y: ChannelRange,
    pub rotate_z: ChannelRange,
    pub gripper_open: ChannelRange,
    pub gripper_close: ChannelRange,
    pub arm_recenter: ChannelRange,
    pub arm_x: ChannelRange,
    pub arm_y: ChannelRange,
}

impl Default for ActionRanges {
    fn default() -> Self {
        Self {
            move_x: ChannelRange::new(-1.0, 1.0),
            move_y: ChannelRange::new(-1.0, 1.0),
            rotate_z: ChannelRange::new(-180.0, 180.0),
            gripper_open: ChannelRange::new(0.0, 100.0),
            gripper_close: ChannelRange::new(0.0, 100.0),
            arm_recenter: ChannelRange::new(0.0, 1.0),
            arm_x: ChannelRange::new(-100.0, 100.0),
            arm_y: ChannelRange::new(-100.0, 100.0),
        }
    }
}

impl ActionRanges {
    /// Range configured for a channel
    pub fn get(&self, field: ActionField) -> ChannelRange {
        match field {
            ActionField::MoveX => self.move_x,
            ActionField::MoveY => self.move_y,
            ActionField::RotateZ => self.rotate_z,
            ActionField::GripperOpen => self.gripper_open,
            ActionField::GripperClose => self.gripper_close,
            ActionField::ArmRecenter => self.arm_recenter,
            ActionField::ArmX => self.arm_x,
            ActionField::ArmY => self.arm_y,
        }
    }

    /// Replace the range for a channel
    pub fn set(&mut self, field: ActionField, range: ChannelRange) {
        let slot = match field {
            ActionField::MoveX => &mut self.move_x,
            ActionField::MoveY => &mut self.move_y,
            ActionField::RotateZ => &mut self.rotate_z,
            ActionField::GripperOpen => &mut self.gripper_open,
            ActionField::GripperClose => &mut self.gripper_close,
            ActionField::ArmRecenter => &mut self.arm_recenter,
            ActionField::ArmX => &mut self.arm_x,
            ActionField::ArmY => &mut self.arm_y,
        };
        *slot = range;
    }

    /// Builder-style variant of [`ActionRanges::set`]
    pub fn with(mut self, field: ActionField, min: f64, max: f64) -> Self {
        self.set(field, ChannelRange::new(min, max));
        self
    }

    /// Reject non-finite bounds and inverted ranges
    pub fn validate(&self) -> Result<()> {
        for field in ActionField::ALL {
            self.get(field).validate(field.name())?;
        }
        Ok(())
    }
}
