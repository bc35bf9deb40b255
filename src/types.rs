//! Core data types for the teleoperation recorder
//!
//! This module contains the fundamental data structures shared by the capture
//! and replay sides of the crate.
//!
//! # Main Types
//!
//! - [`ActionField`] - The fixed set of named command channels
//! - [`FieldValue`] - A numeric or boolean command field value
//! - [`CommandEvent`] - A timestamped set of command fields from the input loop
//! - [`Image`] - An opaque, shape-checked image buffer
//! - [`FrameSource`] - Which camera an image came from
//! - [`Pose`] - Last-known chassis position reported by the robot
//!
//! # Image Ownership
//!
//! [`Image`] stores its pixels behind an `Arc<[u8]>`. Constructing an image
//! from a slice copies the caller's bytes once; cloning afterwards only bumps
//! a reference count, so buffers can hand out images without copying pixels
//! while holding a lock.

use crate::error::{Result, TeleopError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Number of named command channels (the action vector adds one reserved slot)
pub const ACTION_FIELD_COUNT: usize = 8;

/// A named command channel produced by the input loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionField {
    /// Forward/backward chassis speed
    MoveX,
    /// Strafe chassis speed
    MoveY,
    /// Chassis rotation speed
    RotateZ,
    /// Gripper open power
    GripperOpen,
    /// Gripper close power
    GripperClose,
    /// Arm recenter request (boolean)
    ArmRecenter,
    /// Arm extension step
    ArmX,
    /// Arm vertical step
    ArmY,
}

impl ActionField {
    /// All fields in action-vector channel order
    pub const ALL: [ActionField; ACTION_FIELD_COUNT] = [
        ActionField::MoveX,
        ActionField::MoveY,
        ActionField::RotateZ,
        ActionField::GripperOpen,
        ActionField::GripperClose,
        ActionField::ArmRecenter,
        ActionField::ArmX,
        ActionField::ArmY,
    ];

    /// Channel index in the action vector
    pub fn index(self) -> usize {
        self as usize
    }

    /// Snake-case name used in configs and dataset metadata
    pub fn name(self) -> &'static str {
        match self {
            ActionField::MoveX => "move_x",
            ActionField::MoveY => "move_y",
            ActionField::RotateZ => "rotate_z",
            ActionField::GripperOpen => "gripper_open",
            ActionField::GripperClose => "gripper_close",
            ActionField::ArmRecenter => "arm_recenter",
            ActionField::ArmX => "arm_x",
            ActionField::ArmY => "arm_y",
        }
    }

    /// Look up a field by its snake-case name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Boolean channels are OR-ed during aggregation instead of summed
    pub fn is_boolean(self) -> bool {
        matches!(self, ActionField::ArmRecenter)
    }

    /// Gripper channels are clamped to their range after aggregation
    pub fn is_gripper(self) -> bool {
        matches!(self, ActionField::GripperOpen | ActionField::GripperClose)
    }
}

impl std::fmt::Display for ActionField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Value carried by a command field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Numeric value (speeds, powers, steps)
    Number(f64),
    /// Boolean flag (recenter requests)
    Bool(bool),
}

impl FieldValue {
    /// Numeric view: booleans map to 1.0 / 0.0
    pub fn as_f64(&self) -> f64 {
        match *self {
            FieldValue::Number(v) => v,
            FieldValue::Bool(true) => 1.0,
            FieldValue::Bool(false) => 0.0,
        }
    }

    /// Truthiness used by boolean channels
    pub fn is_truthy(&self) -> bool {
        match *self {
            FieldValue::Number(v) => v != 0.0,
            FieldValue::Bool(b) => b,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Number(v as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Number(v as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// Field map carried by a single command event
pub type CommandFields = HashMap<ActionField, FieldValue>;

/// Build a [`CommandFields`] map from `(field, value)` pairs
pub fn command_fields<V, I>(pairs: I) -> CommandFields
where
    V: Into<FieldValue>,
    I: IntoIterator<Item = (ActionField, V)>,
{
    pairs.into_iter().map(|(f, v)| (f, v.into())).collect()
}

/// A command produced by the input loop at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    /// Time since the session clock origin
    pub timestamp: Duration,
    /// Named field values
    pub fields: CommandFields,
}

impl CommandEvent {
    /// Create a new command event
    pub fn new(timestamp: Duration, fields: CommandFields) -> Self {
        Self { timestamp, fields }
    }
}

/// Camera that produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSource {
    /// Robot-mounted camera
    Robot,
    /// Static external webcam
    Webcam,
}

impl FrameSource {
    /// Both sources, in export order
    pub const ALL: [FrameSource; 2] = [FrameSource::Robot, FrameSource::Webcam];

    /// Dataset feature key for this source
    pub fn feature_key(self) -> &'static str {
        match self {
            FrameSource::Robot => "observation.images.robot",
            FrameSource::Webcam => "observation.images.top",
        }
    }
}

impl std::fmt::Display for FrameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameSource::Robot => write!(f, "robot"),
            FrameSource::Webcam => write!(f, "webcam"),
        }
    }
}

/// Image dimensions (height x width x channels, u8 pixels)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl ImageShape {
    /// RGB/BGR image of the given size
    pub fn rgb(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            channels: 3,
        }
    }

    /// Number of bytes in an image of this shape
    pub fn byte_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }

    /// Shape as a `[height, width, channels]` array
    pub fn as_array(&self) -> [u32; 3] {
        [self.height, self.width, self.channels]
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// Opaque image buffer
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    shape: ImageShape,
    data: Arc<[u8]>,
}

impl Image {
    /// Take ownership of `data` as an image of `shape`
    pub fn new(shape: ImageShape, data: Vec<u8>) -> Result<Self> {
        if data.len() != shape.byte_len() {
            return Err(TeleopError::InvalidImage(format!(
                "expected {} bytes for {}, got {}",
                shape.byte_len(),
                shape,
                data.len()
            )));
        }
        Ok(Self {
            shape,
            data: data.into(),
        })
    }

    /// Copy `data` into a new image
    pub fn from_slice(shape: ImageShape, data: &[u8]) -> Result<Self> {
        Self::new(shape, data.to_vec())
    }

    /// All-zero (black) image of the given shape
    pub fn zeros(shape: ImageShape) -> Self {
        Self {
            shape,
            data: vec![0u8; shape.byte_len()].into(),
        }
    }

    /// Image dimensions
    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// Raw pixel bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Deep copy that shares no storage with `self`
    pub fn deep_copy(&self) -> Self {
        Self {
            shape: self.shape,
            data: self.data.to_vec().into(),
        }
    }

    /// Whether every pixel is zero
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("shape", &self.shape)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Chassis position snapshot: metres and degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// X position in metres
    pub x: f64,
    /// Y position in metres
    pub y: f64,
    /// Yaw in degrees
    pub yaw: f64,
}

impl Pose {
    /// Create a new pose
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x={:.2}m y={:.2}m yaw={:.1}°", self.x, self.y, self.yaw)
    }
}
