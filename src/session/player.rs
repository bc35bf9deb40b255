//! Command player for replaying recorded drive sessions
//!
//! Two non-blocking retrieval disciplines are offered:
//!
//! - **Time-based**: [`CommandPlayer::pending`] returns every command whose
//!   recorded offset has elapsed.
//! - **Position-gated**: [`CommandPlayer::next_if_ready`] releases the next
//!   command only once the live pose matches the pose recorded with it.
//!
//! An emergency stop is terminal: after it no command is executed again.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::ReplayConfig;
use crate::driver::{PoseCell, RobotDriver};
use crate::error::{Result, TeleopError};
use crate::types::Pose;

use super::types::{CommandKind, CommandLog, ExpectedPosition, RecordedCommand, RecordingInfo};

/// Position tolerance for gated replay (metres)
pub const POSITION_TOLERANCE_M: f64 = 0.01;

/// Yaw tolerance for gated replay (degrees)
pub const YAW_TOLERANCE_DEG: f64 = 1.0;

/// Absolute yaw difference after wrapping into `[-180, 180]`
pub fn yaw_error(expected: f64, actual: f64) -> f64 {
    ((actual - expected + 180.0).rem_euclid(360.0) - 180.0).abs()
}

/// Rounding slack for comparing a difference of `a` and `b` to a tolerance
fn rounding_slack(a: f64, b: f64) -> f64 {
    4.0 * f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}

/// Whether `live` is within tolerance of `expected`
///
/// The tolerance band is closed: a pose exactly one tolerance away passes,
/// even when the subtraction rounds slightly above it.
pub fn position_reached(expected: &ExpectedPosition, live: Pose) -> bool {
    let axis_ok = |e: f64, a: f64| (a - e).abs() <= POSITION_TOLERANCE_M + rounding_slack(e, a);
    axis_ok(expected.x, live.x)
        && axis_ok(expected.y, live.y)
        && yaw_error(expected.z, live.yaw) <= YAW_TOLERANCE_DEG + rounding_slack(expected.z, live.yaw)
}

/// Plays back a command log against a robot driver
#[derive(Debug)]
pub struct CommandPlayer {
    log: CommandLog,
    config: ReplayConfig,
    /// Index of the next command to release
    current_index: usize,
    start_time: Option<Instant>,
    stopped: bool,
    halted: bool,
    /// Live pose from the chassis subscription
    pose: PoseCell,
}

impl CommandPlayer {
    /// Validate a log and prepare it for playback
    pub fn from_log(log: CommandLog) -> Result<Self> {
        log.validate()?;
        Ok(Self {
            log,
            config: ReplayConfig::default(),
            current_index: 0,
            start_time: None,
            stopped: false,
            halted: false,
            pose: PoseCell::default(),
        })
    }

    /// Load a log file; fails before playback on a missing or corrupt file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let player = Self::from_log(CommandLog::load(path)?)?;
        tracing::info!(
            "Loaded recording {:?}: {} commands, {:.1}s",
            path,
            player.len(),
            player.duration()
        );
        Ok(player)
    }

    /// Use fallback command parameters from `config`
    pub fn with_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    /// Replay settings
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Begin playback from the first command
    ///
    /// A player is single-use: once started it cannot be started again.
    pub fn start(&mut self) -> Result<()> {
        if self.halted {
            return Err(TeleopError::Halted);
        }
        if self.start_time.is_some() {
            return Err(TeleopError::InvalidState(
                "player was already started; load the log again to replay".to_string(),
            ));
        }
        self.start_time = Some(Instant::now());
        self.current_index = 0;
        self.stopped = false;
        Ok(())
    }

    /// Stop playback
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Stop playback permanently
    pub fn emergency_stop(&mut self) {
        if !self.halted {
            tracing::warn!(
                "Emergency stop at command {}/{}",
                self.current_index,
                self.len()
            );
        }
        self.halted = true;
        self.stopped = true;
    }

    /// Whether an emergency stop was issued
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Started, not stopped and commands remain
    pub fn is_playing(&self) -> bool {
        self.start_time.is_some() && !self.stopped && self.current_index < self.len()
    }

    /// Every command has been released
    pub fn is_finished(&self) -> bool {
        self.current_index >= self.len()
    }

    /// Time since `start()`
    pub fn elapsed(&self) -> Duration {
        self.start_time
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Percentage of the recorded duration elapsed, clamped to 100
    pub fn progress(&self) -> f64 {
        progress_at(self.elapsed(), self.duration())
    }

    /// Index of the next command
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Number of commands
    pub fn len(&self) -> usize {
        self.log.commands.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.log.commands.is_empty()
    }

    /// Recorded duration in seconds
    pub fn duration(&self) -> f64 {
        self.log.duration
    }

    /// All commands in order
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.log.commands
    }

    /// Summary of the loaded log
    pub fn recording_info(&self) -> RecordingInfo {
        self.log.info()
    }

    /// Shared pose cell, for wiring into a pose subscription
    pub fn pose_cell(&self) -> PoseCell {
        self.pose.clone()
    }

    /// Update the live pose
    pub fn update_position(&self, pose: Pose) {
        self.pose.set(pose);
    }

    /// Last reported pose
    pub fn current_position(&self) -> Pose {
        self.pose.get()
    }

    /// Commands whose offset has elapsed, advancing past them
    pub fn pending(&mut self) -> Vec<RecordedCommand> {
        let elapsed = self.elapsed();
        self.pending_at(elapsed)
    }

    /// [`CommandPlayer::pending`] against an explicit elapsed time
    pub fn pending_at(&mut self, elapsed: Duration) -> Vec<RecordedCommand> {
        if !self.is_playing() {
            return Vec::new();
        }
        let now = elapsed.as_secs_f64();
        let start = self.current_index;
        let end = start
            + self.log.commands[start..]
                .iter()
                .take_while(|c| c.time <= now)
                .count();
        self.current_index = end;
        self.log.commands[start..end].to_vec()
    }

    /// Next command if its expected pose (if any) has been reached
    ///
    /// Returns `None` without advancing when the robot is not there yet; the
    /// caller retries on its next iteration.
    pub fn next_if_ready(&mut self) -> Option<RecordedCommand> {
        if !self.is_playing() {
            return None;
        }
        let cmd = &self.log.commands[self.current_index];
        if let Some(expected) = &cmd.expected_pos {
            if !position_reached(expected, self.pose.get()) {
                return None;
            }
        }
        let cmd = cmd.clone();
        self.current_index += 1;
        Some(cmd)
    }

    /// Whether the next command is waiting for the robot to reach its pose
    pub fn is_waiting_for_position(&self) -> bool {
        if !self.is_playing() {
            return false;
        }
        match &self.log.commands[self.current_index].expected_pos {
            Some(expected) => !position_reached(expected, self.pose.get()),
            None => false,
        }
    }

    /// Dispatch a command to the driver
    ///
    /// Returns whether the driver accepted it (always `true` for commands
    /// without an acceptance result). Fails with [`TeleopError::Halted`]
    /// after an emergency stop.
    pub fn execute<D: RobotDriver + ?Sized>(&self, cmd: &RecordedCommand, driver: &mut D) -> Result<bool> {
        if self.halted {
            return Err(TeleopError::Halted);
        }
        tracing::debug!("Executing {} at {:.2}s", cmd.kind, cmd.time);

        let accepted = match cmd.kind {
            CommandKind::ChassisSpeed { vx, vy, vz } => {
                driver.drive_speed(vx, vy, vz);
                true
            }
            CommandKind::ChassisMove {
                x,
                y,
                z,
                xy_speed,
                z_speed,
            } => driver.drive_move(
                x,
                y,
                z,
                xy_speed.unwrap_or(self.config.default_xy_speed),
                z_speed.unwrap_or(self.config.default_z_speed),
            ),
            CommandKind::ArmMove { x, y } => driver.arm_move(x, y),
            CommandKind::ArmRecenter => driver.arm_recenter(),
            CommandKind::GripperOpen { power } => {
                driver.gripper_open(power.unwrap_or(self.config.default_gripper_power));
                true
            }
            CommandKind::GripperClose { power } => {
                driver.gripper_close(power.unwrap_or(self.config.default_gripper_power));
                true
            }
            CommandKind::GripperStop => {
                driver.gripper_stop();
                true
            }
            CommandKind::Stop => {
                driver.stop();
                true
            }
        };

        if !accepted {
            tracing::warn!("Driver rejected {} (subsystem busy)", cmd.kind);
        }
        Ok(accepted)
    }
}

fn progress_at(elapsed: Duration, duration: f64) -> f64 {
    if duration <= 0.0 {
        return 100.0;
    }
    (elapsed.as_secs_f64() / duration * 100.0).min(100.0)
}
