//! Command recorder for drive sessions

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;

use crate::driver::PoseCell;
use crate::error::{Result, TeleopError};
use crate::types::Pose;

use super::types::{CommandKind, CommandLog, ExpectedPosition, RecordedCommand};

/// File name used when no output path is given: `recording_YYYYMMDD_HHMMSS.json`
pub fn default_file_name() -> String {
    format!("recording_{}.json", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Records robot commands with time offsets and the pose they were issued at
#[derive(Debug)]
pub struct CommandRecorder {
    /// Where `save()` writes the log
    output_path: PathBuf,
    /// Commands in recording order
    commands: Vec<RecordedCommand>,
    /// Start of the current recording
    start_time: Option<Instant>,
    recording: bool,
    saved: bool,
    /// Last pose reported by the chassis subscription
    pose: PoseCell,
    /// Offsets never go backwards, even if the clock is read out of order
    last_offset: f64,
}

impl CommandRecorder {
    /// Create a recorder writing to `output_path`, or to [`default_file_name`]
    pub fn new(output_path: Option<PathBuf>) -> Self {
        Self {
            output_path: output_path.unwrap_or_else(|| PathBuf::from(default_file_name())),
            commands: Vec::new(),
            start_time: None,
            recording: false,
            saved: false,
            pose: PoseCell::default(),
            last_offset: 0.0,
        }
    }

    /// Output file path
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Shared pose cell, for wiring into a pose subscription
    pub fn pose_cell(&self) -> PoseCell {
        self.pose.clone()
    }

    /// Update the pose attached to subsequent chassis commands
    pub fn update_position(&self, pose: Pose) {
        self.pose.set(pose);
    }

    /// Start recording; a recorder whose log was saved cannot be restarted
    pub fn start(&mut self) -> Result<()> {
        if self.saved {
            return Err(TeleopError::InvalidState(format!(
                "recording already saved to {:?}",
                self.output_path
            )));
        }
        self.commands.clear();
        self.start_time = Some(Instant::now());
        self.last_offset = 0.0;
        self.recording = true;
        tracing::info!("Command recording started");
        Ok(())
    }

    /// Stop recording (commands are kept until saved)
    pub fn stop(&mut self) {
        if self.recording {
            self.recording = false;
            tracing::info!("Command recording stopped ({} commands)", self.commands.len());
        }
    }

    /// Check if recording
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Whether the log has been written
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    /// Commands recorded so far, before the redundancy pass
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Seconds since recording started
    pub fn elapsed(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Append a command; ignored unless recording
    pub fn record(&mut self, kind: CommandKind) {
        if !self.recording {
            return;
        }
        let time = self.elapsed().max(self.last_offset);
        self.last_offset = time;

        let expected_pos = if kind.is_chassis() {
            Some(ExpectedPosition::from(self.pose.get()))
        } else {
            None
        };
        tracing::trace!("Recorded {} at {:.3}s", kind, time);
        self.commands.push(RecordedCommand {
            time,
            kind,
            expected_pos,
        });
    }

    /// Build the log document after the redundancy pass
    pub fn to_log(&self) -> CommandLog {
        CommandLog::new(Utc::now(), self.elapsed(), optimize_commands(&self.commands))
    }

    /// Write the log; the file is written once and never rewritten
    pub fn save(&mut self) -> Result<PathBuf> {
        if self.saved {
            return Err(TeleopError::InvalidState(format!(
                "recording already saved to {:?}",
                self.output_path
            )));
        }
        self.stop();

        let log = self.to_log();
        log.save(&self.output_path)?;
        self.saved = true;

        tracing::info!(
            "Saved {} commands ({} recorded) to {:?}",
            log.command_count,
            self.commands.len(),
            self.output_path
        );
        Ok(self.output_path.clone())
    }
}

/// Collapse repeated speed and gripper commands
///
/// A `chassis_speed` equal to the last kept speed is dropped, as is a gripper
/// command equal to the last kept gripper command (including power). `stop`
/// and `chassis_move` end the current speed run, so re-issuing a speed after
/// them is kept.
pub fn optimize_commands(commands: &[RecordedCommand]) -> Vec<RecordedCommand> {
    let mut optimized = Vec::with_capacity(commands.len());
    let mut last_speed: Option<&CommandKind> = None;
    let mut last_gripper: Option<&CommandKind> = None;

    for cmd in commands {
        let kind = &cmd.kind;
        match kind {
            CommandKind::ChassisSpeed { .. } => {
                if last_speed == Some(kind) {
                    continue;
                }
                last_speed = Some(kind);
            }
            CommandKind::Stop | CommandKind::ChassisMove { .. } => last_speed = None,
            _ if kind.is_gripper() => {
                if last_gripper == Some(kind) {
                    continue;
                }
                last_gripper = Some(kind);
            }
            _ => {}
        }
        optimized.push(cmd.clone());
    }
    optimized
}
