//! Configuration module for the teleoperation recorder
//!
//! All tunables are explicit values passed to the components that need them;
//! there is no process-wide configuration state.
//!
//! # Sections
//!
//! - [`CaptureConfig`] - Episode capture: fps, task label, dataset location,
//!   action ranges, buffer duration, per-camera latency offsets, dry-run
//! - [`ReplayConfig`] - Command replay: gating mode, loop poll interval and
//!   fallback command parameters
//!
//! # Example
//!
//! ```ignore
//! use teleop_recorder::config::TeleopConfig;
//!
//! let config = TeleopConfig::load("teleop.toml")?;
//! config.validate()?;
//! println!("Recording at {} fps", config.capture.fps);
//! ```

pub mod ranges;

pub use ranges::{ActionRanges, ChannelRange};

use crate::error::{Result, TeleopError};
use crate::types::{FrameSource, ImageShape};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default recording rate in Hz
pub const DEFAULT_FPS: u32 = 30;

/// Default task label attached to episodes
pub const DEFAULT_TASK: &str = "do something with Robomaster";

/// Default dataset root directory
pub const DEFAULT_DATASET_ROOT: &str = "./records";

/// Default dataset name (directory under the root)
pub const DEFAULT_DATASET_NAME: &str = "robomaster_teleop";

/// Default ring buffer duration in seconds
pub const DEFAULT_BUFFER_DURATION_SECS: f64 = 2.0;

/// Longest accepted ring buffer duration in seconds
pub const MAX_BUFFER_DURATION_SECS: f64 = 600.0;

/// Default bound on joining the sampler thread
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 2000;

// ==================== Camera Config ====================

/// Robot camera stream resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RobotResolution {
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "540p")]
    P540,
    #[default]
    #[serde(rename = "720p")]
    P720,
}

impl RobotResolution {
    /// Frame dimensions as `(height, width)`
    pub fn dims(&self) -> (u32, u32) {
        match self {
            RobotResolution::P360 => (360, 640),
            RobotResolution::P540 => (540, 960),
            RobotResolution::P720 => (720, 1280),
        }
    }
}

impl std::fmt::Display for RobotResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RobotResolution::P360 => write!(f, "360p"),
            RobotResolution::P540 => write!(f, "540p"),
            RobotResolution::P720 => write!(f, "720p"),
        }
    }
}

/// Camera resolutions that fix the exported image shapes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Robot camera resolution preset
    #[serde(default)]
    pub robot_resolution: RobotResolution,

    /// Webcam frame width in pixels
    #[serde(default = "default_webcam_width")]
    pub webcam_width: u32,

    /// Webcam frame height in pixels
    #[serde(default = "default_webcam_height")]
    pub webcam_height: u32,
}

fn default_webcam_width() -> u32 {
    1280
}

fn default_webcam_height() -> u32 {
    720
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            robot_resolution: RobotResolution::default(),
            webcam_width: default_webcam_width(),
            webcam_height: default_webcam_height(),
        }
    }
}

impl CameraConfig {
    /// Expected shape of frames from a source
    pub fn shape_for(&self, source: FrameSource) -> ImageShape {
        match source {
            FrameSource::Robot => {
                let (h, w) = self.robot_resolution.dims();
                ImageShape::rgb(h, w)
            }
            FrameSource::Webcam => ImageShape::rgb(self.webcam_height, self.webcam_width),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.webcam_width == 0 || self.webcam_height == 0 {
            return Err(TeleopError::Config(format!(
                "webcam resolution must be non-zero, got {}x{}",
                self.webcam_width, self.webcam_height
            )));
        }
        Ok(())
    }
}

// ==================== Capture Config ====================

/// Episode capture configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Sampling rate in frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Task description stored with each episode
    #[serde(default = "default_task")]
    pub task: String,

    /// Root directory holding datasets
    #[serde(default = "default_dataset_root")]
    pub dataset_root: PathBuf,

    /// Dataset name (subdirectory of the root)
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,

    /// Per-channel `(min, max)` ranges
    #[serde(default)]
    pub action_ranges: ActionRanges,

    /// Seconds of frames kept per source
    #[serde(default = "default_buffer_duration")]
    pub buffer_duration_secs: f64,

    /// Latency compensation for the robot camera (seconds, may be negative)
    #[serde(default)]
    pub robot_camera_offset_secs: f64,

    /// Latency compensation for the webcam (seconds, may be negative)
    #[serde(default)]
    pub webcam_offset_secs: f64,

    /// Log frames instead of persisting them
    #[serde(default)]
    pub dry_run: bool,

    /// Emit a dry-run diagnostic every N ticks
    #[serde(default = "default_report_every")]
    pub dry_run_report_every: u64,

    /// Bound on joining the sampler thread at stop/abort
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    /// Camera resolutions
    #[serde(default)]
    pub cameras: CameraConfig,
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}

fn default_task() -> String {
    DEFAULT_TASK.to_string()
}

fn default_dataset_root() -> PathBuf {
    PathBuf::from(DEFAULT_DATASET_ROOT)
}

fn default_dataset_name() -> String {
    DEFAULT_DATASET_NAME.to_string()
}

fn default_buffer_duration() -> f64 {
    DEFAULT_BUFFER_DURATION_SECS
}

fn default_report_every() -> u64 {
    10
}

fn default_join_timeout_ms() -> u64 {
    DEFAULT_JOIN_TIMEOUT_MS
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            task: default_task(),
            dataset_root: default_dataset_root(),
            dataset_name: default_dataset_name(),
            action_ranges: ActionRanges::default(),
            buffer_duration_secs: DEFAULT_BUFFER_DURATION_SECS,
            robot_camera_offset_secs: 0.0,
            webcam_offset_secs: 0.0,
            dry_run: false,
            dry_run_report_every: default_report_every(),
            join_timeout_ms: DEFAULT_JOIN_TIMEOUT_MS,
            cameras: CameraConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Interval between sampler ticks
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    /// Frames retained per image source
    pub fn max_frames(&self) -> usize {
        ((self.buffer_duration_secs * self.fps as f64) as usize).max(1)
    }

    /// Latency offset configured for a source
    pub fn offset_for(&self, source: FrameSource) -> f64 {
        match source {
            FrameSource::Robot => self.robot_camera_offset_secs,
            FrameSource::Webcam => self.webcam_offset_secs,
        }
    }

    /// Dataset root with a leading `~` expanded
    pub fn dataset_root_expanded(&self) -> PathBuf {
        expand_home(&self.dataset_root)
    }

    /// Full path of the dataset directory
    pub fn dataset_path(&self) -> PathBuf {
        self.dataset_root_expanded().join(&self.dataset_name)
    }

    /// Join timeout as a duration
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Fail fast on values the sampler cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 {
            return Err(TeleopError::Config("fps must be positive".to_string()));
        }
        if !self.buffer_duration_secs.is_finite() || self.buffer_duration_secs <= 0.0 {
            return Err(TeleopError::Config(format!(
                "buffer duration must be positive, got {}",
                self.buffer_duration_secs
            )));
        }
        if self.buffer_duration_secs > MAX_BUFFER_DURATION_SECS {
            return Err(TeleopError::Config(format!(
                "buffer duration {}s exceeds the {}s limit",
                self.buffer_duration_secs, MAX_BUFFER_DURATION_SECS
            )));
        }
        if !self.robot_camera_offset_secs.is_finite() || !self.webcam_offset_secs.is_finite() {
            return Err(TeleopError::Config(
                "camera offsets must be finite".to_string(),
            ));
        }
        if self.dry_run_report_every == 0 {
            return Err(TeleopError::Config(
                "dry_run_report_every must be at least 1".to_string(),
            ));
        }
        if self.dataset_name.trim().is_empty() {
            return Err(TeleopError::Config(
                "dataset name must not be empty".to_string(),
            ));
        }
        self.action_ranges.validate()?;
        self.cameras.validate()
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs_next::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

// ==================== Replay Config ====================

/// How the replay loop decides when to release the next command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplayMode {
    /// Release commands when their recorded time offset has elapsed
    Timed,
    /// Release a command once the live pose matches its expected pose
    #[default]
    PositionGated,
}

impl std::fmt::Display for ReplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayMode::Timed => write!(f, "timed"),
            ReplayMode::PositionGated => write!(f, "position-gated"),
        }
    }
}

/// Command replay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Gating discipline
    #[serde(default)]
    pub mode: ReplayMode,

    /// Sleep between replay loop iterations
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fallback linear speed for chassis moves missing `xy_speed` (m/s)
    #[serde(default = "default_xy_speed")]
    pub default_xy_speed: f64,

    /// Fallback rotation speed for chassis moves missing `z_speed` (deg/s)
    #[serde(default = "default_z_speed")]
    pub default_z_speed: f64,

    /// Fallback gripper power for commands missing `power`
    #[serde(default = "default_gripper_power")]
    pub default_gripper_power: u8,
}

fn default_poll_interval_ms() -> u64 {
    10
}

pub(crate) fn default_xy_speed() -> f64 {
    0.5
}

pub(crate) fn default_z_speed() -> f64 {
    60.0
}

pub(crate) fn default_gripper_power() -> u8 {
    50
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: ReplayMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            default_xy_speed: default_xy_speed(),
            default_z_speed: default_z_speed(),
            default_gripper_power: default_gripper_power(),
        }
    }
}

impl ReplayConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Fail fast on unusable replay settings
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(TeleopError::Config(
                "replay poll interval must be at least 1 ms".to_string(),
            ));
        }
        if self.default_gripper_power == 0 || self.default_gripper_power > 100 {
            return Err(TeleopError::Config(format!(
                "gripper power must be in 1..=100, got {}",
                self.default_gripper_power
            )));
        }
        Ok(())
    }
}

// ==================== Teleop Config ====================

/// Complete configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TeleopConfig {
    /// Episode capture settings
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Replay settings
    #[serde(default)]
    pub replay: ReplayConfig,
}

impl TeleopConfig {
    /// Load a configuration file (TOML for `.toml`, JSON otherwise)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TeleopError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: Self = if is_toml(path) {
            toml::from_str(&content).map_err(|e| {
                TeleopError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                TeleopError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save the configuration (TOML for `.toml`, JSON otherwise)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TeleopError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_toml(path) {
            toml::to_string_pretty(self)
                .map_err(|e| TeleopError::Config(format!("Failed to serialize config: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| TeleopError::Config(format!("Failed to serialize config: {}", e)))?
        };

        std::fs::write(path, content).map_err(|e| {
            TeleopError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        self.replay.validate()
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}
