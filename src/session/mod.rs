//! Drive session recording and replay
//!
//! Commands issued during a teleoperation session are logged with their
//! time offset and, for chassis commands, the pose the robot was in. The log
//! can later be replayed either on the original timing or gated on the robot
//! reaching each recorded pose.
//!
//! # Main Types
//!
//! - [`CommandRecorder`] - Collects commands and writes the log once
//! - [`CommandLog`] - Versioned JSON document
//! - [`CommandPlayer`] - Time-based and position-gated retrieval
//! - [`ReplayRunner`] - Loop that executes a player against a driver

pub mod player;
pub mod recorder;
pub mod replay;
pub mod types;

pub use player::{yaw_error, CommandPlayer, POSITION_TOLERANCE_M, YAW_TOLERANCE_DEG};
pub use recorder::{default_file_name, optimize_commands, CommandRecorder};
pub use replay::{ReplayRunner, ReplaySummary};
pub use types::{CommandKind, CommandLog, ExpectedPosition, RecordedCommand, RecordingInfo, LOG_VERSION};
