//! Driver wrapper that logs every command it forwards

use super::{PoseHandler, RobotDriver, Subscription};
use crate::session::{CommandKind, CommandRecorder};
use crate::types::Image;

/// Forwards commands to an inner driver and records them
///
/// The inner driver's pose feed is wired to the recorder on construction,
/// so chassis commands carry the pose they were issued at.
pub struct RecordingDriver<D: RobotDriver> {
    inner: D,
    recorder: CommandRecorder,
    _pose_sub: Subscription,
}

impl<D: RobotDriver> RecordingDriver<D> {
    pub fn new(mut inner: D, recorder: CommandRecorder) -> Self {
        let pose_sub = inner.subscribe_pose(recorder.pose_cell().handler());
        Self {
            inner,
            recorder,
            _pose_sub: pose_sub,
        }
    }

    pub fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut CommandRecorder {
        &mut self.recorder
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Unwrap into the driver and the recorder
    pub fn into_inner(self) -> (D, CommandRecorder) {
        (self.inner, self.recorder)
    }
}

impl<D: RobotDriver> RobotDriver for RecordingDriver<D> {
    fn drive_speed(&mut self, vx: f64, vy: f64, vz: f64) {
        self.recorder.record(CommandKind::ChassisSpeed { vx, vy, vz });
        self.inner.drive_speed(vx, vy, vz)
    }

    fn drive_move(&mut self, x: f64, y: f64, z: f64, xy_speed: f64, z_speed: f64) -> bool {
        self.recorder.record(CommandKind::ChassisMove {
            x,
            y,
            z,
            xy_speed: Some(xy_speed),
            z_speed: Some(z_speed),
        });
        self.inner.drive_move(x, y, z, xy_speed, z_speed)
    }

    fn stop(&mut self) {
        self.recorder.record(CommandKind::Stop);
        self.inner.stop()
    }

    fn is_chassis_ready(&self) -> bool {
        self.inner.is_chassis_ready()
    }

    fn arm_move(&mut self, dx: f64, dy: f64) -> bool {
        self.recorder.record(CommandKind::ArmMove { x: dx, y: dy });
        self.inner.arm_move(dx, dy)
    }

    fn arm_recenter(&mut self) -> bool {
        self.recorder.record(CommandKind::ArmRecenter);
        self.inner.arm_recenter()
    }

    fn is_arm_ready(&self) -> bool {
        self.inner.is_arm_ready()
    }

    fn gripper_open(&mut self, power: u8) {
        self.recorder.record(CommandKind::GripperOpen { power: Some(power) });
        self.inner.gripper_open(power)
    }

    fn gripper_close(&mut self, power: u8) {
        self.recorder.record(CommandKind::GripperClose { power: Some(power) });
        self.inner.gripper_close(power)
    }

    fn gripper_stop(&mut self) {
        self.recorder.record(CommandKind::GripperStop);
        self.inner.gripper_stop()
    }

    fn get_video_frame(&mut self) -> Option<Image> {
        self.inner.get_video_frame()
    }

    fn subscribe_pose(&mut self, handler: PoseHandler) -> Subscription {
        self.inner.subscribe_pose(handler)
    }
}
