//! Test data builders for creating test objects

use chrono::{TimeZone, Utc};
use std::path::Path;
use teleop_recorder::config::{CaptureConfig, RobotResolution};
use teleop_recorder::session::{CommandKind, CommandLog, ExpectedPosition, RecordedCommand};
use teleop_recorder::types::{FrameSource, Image};

/// Builder for small, fast capture configurations
pub struct CaptureConfigBuilder {
    config: CaptureConfig,
}

impl CaptureConfigBuilder {
    pub fn new() -> Self {
        let mut config = CaptureConfig {
            fps: 50,
            buffer_duration_secs: 1.0,
            task: "pick up the cube".to_string(),
            dataset_name: "test_dataset".to_string(),
            ..Default::default()
        };
        config.cameras.robot_resolution = RobotResolution::P360;
        config.cameras.webcam_width = 16;
        config.cameras.webcam_height = 8;
        Self { config }
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.config.fps = fps;
        self
    }

    pub fn dataset_root(mut self, root: &Path) -> Self {
        self.config.dataset_root = root.to_path_buf();
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.config.dry_run = true;
        self.config.dry_run_report_every = 1;
        self
    }

    pub fn build(self) -> CaptureConfig {
        self.config
    }
}

impl Default for CaptureConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Solid-colour frame matching the configured shape for `source`
pub fn frame_for(config: &CaptureConfig, source: FrameSource, value: u8) -> Image {
    let shape = config.cameras.shape_for(source);
    Image::new(shape, vec![value; shape.byte_len()]).unwrap()
}

/// Builder for command logs
pub struct CommandLogBuilder {
    commands: Vec<RecordedCommand>,
    duration: f64,
}

impl CommandLogBuilder {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            duration: 0.0,
        }
    }

    pub fn command(mut self, time: f64, kind: CommandKind) -> Self {
        self.duration = self.duration.max(time);
        self.commands.push(RecordedCommand::new(time, kind));
        self
    }

    /// Command gated on the pose `(x, y, yaw)`
    pub fn gated(mut self, time: f64, kind: CommandKind, pose: (f64, f64, f64)) -> Self {
        self.duration = self.duration.max(time);
        self.commands
            .push(RecordedCommand::new(time, kind).with_expected(ExpectedPosition {
                x: pose.0,
                y: pose.1,
                z: pose.2,
            }));
        self
    }

    pub fn duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn build(self) -> CommandLog {
        let recorded_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        CommandLog::new(recorded_at, self.duration, self.commands)
    }
}

impl Default for CommandLogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_log_builder() {
        let log = CommandLogBuilder::new()
            .command(0.0, CommandKind::ArmRecenter)
            .gated(1.5, CommandKind::Stop, (1.0, 0.0, 0.0))
            .build();

        assert_eq!(log.command_count, 2);
        assert_eq!(log.duration, 1.5);
        assert!(log.validate().is_ok());
    }
}
