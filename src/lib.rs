//! # teleop-recorder: Teleoperation Recording and Replay
//!
//! Records human teleoperation of a mobile manipulator into time-aligned
//! imitation-learning episodes, and logs drive sessions for deterministic
//! replay.
//!
//! ## Architecture
//!
//! - **Capture**: input threads push commands and camera frames into a
//!   bounded [`capture::FrameBuffer`]; a sampler thread emits one normalised
//!   action per tick into an [`capture::EpisodeStore`]
//! - **Session**: [`session::CommandRecorder`] logs driver commands with the
//!   pose they were issued at; [`session::CommandPlayer`] replays them on
//!   time or gated on pose
//! - **Driver**: the [`driver::RobotDriver`] trait is the only contact with
//!   a robot; [`driver::SimDriver`] stands in for hardware
//! - **Communication**: crossbeam channels carry recorder events and stop
//!   signals between threads
//!
//! ## Configuration
//!
//! Settings are read from a TOML file (see [`config::TeleopConfig`]).
//! Datasets default to `./records/<name>`; a leading `~` in the root is
//! expanded to the home directory.
//!
//! ## Example
//!
//! ```ignore
//! use teleop_recorder::{capture::Recorder, config::TeleopConfig};
//! use teleop_recorder::types::{command_fields, ActionField};
//!
//! let config = TeleopConfig::load("teleop.toml")?;
//! let mut recorder = Recorder::new(config.capture)?;
//! let input = recorder.input();
//!
//! recorder.start()?;
//! input.add_command(command_fields([(ActionField::MoveX, 0.4)]));
//! input.add_robot_frame(frame);
//! let outcome = recorder.stop()?;
//! ```

pub mod action;
pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use action::{denormalize, normalize, ActionVector, RawAction, ACTION_DIM};
pub use capture::{CaptureInput, Recorder, StopOutcome};
pub use config::{CaptureConfig, ReplayConfig, TeleopConfig};
pub use driver::{RobotDriver, SimDriver};
pub use error::{Result, TeleopError};
pub use session::{CommandLog, CommandPlayer, CommandRecorder, ReplayRunner};
pub use types::{ActionField, FrameSource, Image, ImageShape, Pose};
