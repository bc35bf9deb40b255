//! Action normalisation
//!
//! Maps raw, named action values onto the fixed 9-channel vector used by
//! dataset consumers and back again.
//!
//! # Channel Layout
//!
//! | idx | name          |
//! |-----|---------------|
//! | 0   | move_x        |
//! | 1   | move_y        |
//! | 2   | rotate_z      |
//! | 3   | gripper_open  |
//! | 4   | gripper_close |
//! | 5   | arm_recenter  |
//! | 6   | arm_x         |
//! | 7   | arm_y         |
//! | 8   | unused (always 0) |
//!
//! `normalize` clips each raw value to its configured range and maps it
//! affinely to `[-1, 1]`. `denormalize` is the exact inverse of the affine
//! step, so values already inside their range survive a round trip. Values
//! outside their range are clipped and do not.

use crate::config::ActionRanges;
use crate::types::{ActionField, ACTION_FIELD_COUNT};
use serde::{Deserialize, Serialize};

/// Length of the action vector
pub const ACTION_DIM: usize = ACTION_FIELD_COUNT + 1;

/// Index of the reserved trailing slot
pub const RESERVED_SLOT: usize = ACTION_DIM - 1;

/// Channel names in vector order
pub const ACTION_NAMES: [&str; ACTION_DIM] = [
    "move_x",
    "move_y",
    "rotate_z",
    "gripper_open",
    "gripper_close",
    "arm_recenter",
    "arm_x",
    "arm_y",
    "unused",
];

/// Raw (un-normalised) value for every named channel
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawAction {
    values: [f64; ACTION_FIELD_COUNT],
}

impl RawAction {
    /// All channels zero
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build from an array in channel order
    pub fn from_array(values: [f64; ACTION_FIELD_COUNT]) -> Self {
        Self { values }
    }

    /// Value of a channel
    pub fn get(&self, field: ActionField) -> f64 {
        self.values[field.index()]
    }

    /// Set a channel
    pub fn set(&mut self, field: ActionField, value: f64) {
        self.values[field.index()] = value;
    }

    /// Builder-style setter
    pub fn with(mut self, field: ActionField, value: f64) -> Self {
        self.set(field, value);
        self
    }

    /// Values in channel order
    pub fn as_array(&self) -> &[f64; ACTION_FIELD_COUNT] {
        &self.values
    }

    /// Iterate `(field, value)` pairs in channel order
    pub fn iter(&self) -> impl Iterator<Item = (ActionField, f64)> + '_ {
        ActionField::ALL.into_iter().map(|f| (f, self.get(f)))
    }
}

/// Normalised action vector, each element in `[-1, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionVector(pub [f64; ACTION_DIM]);

impl ActionVector {
    /// Normalised value of a channel
    pub fn get(&self, field: ActionField) -> f64 {
        self.0[field.index()]
    }

    /// Single-precision copy for export
    pub fn to_f32(&self) -> [f32; ACTION_DIM] {
        self.0.map(|v| v as f32)
    }

    /// Elements in vector order
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Clip-then-map a raw action onto `[-1, 1]` per channel
pub fn normalize(raw: &RawAction, ranges: &ActionRanges) -> ActionVector {
    let mut out = [0.0; ACTION_DIM];
    for field in ActionField::ALL {
        let range = ranges.get(field);
        let span = range.span();
        out[field.index()] = if span > 0.0 {
            2.0 * (range.clamp(raw.get(field)) - range.min) / span - 1.0
        } else {
            0.0
        };
    }
    // The reserved slot stays zero
    ActionVector(out)
}

/// Inverse of the affine step of [`normalize`]; the reserved slot is ignored
pub fn denormalize(vector: &ActionVector, ranges: &ActionRanges) -> RawAction {
    let mut raw = RawAction::zero();
    for field in ActionField::ALL {
        let range = ranges.get(field);
        let value = (vector.get(field) + 1.0) / 2.0 * range.span() + range.min;
        raw.set(field, value);
    }
    raw
}
