//! Robot driver collaborator interface
//!
//! The recording and replay engine never talks to vendor SDKs directly. It
//! consumes a narrow [`RobotDriver`] contract: movement, arm and gripper
//! commands going out, video frames and pose updates coming back.
//!
//! # Main Types
//!
//! - [`RobotDriver`] - Command sink and frame/pose source
//! - [`PoseFeed`] / [`Subscription`] - Pose fan-out with cancellation tokens
//! - [`PoseCell`] - Last-known pose shared between threads
//! - [`ActionTracker`] - Polled completion state for long-running actions
//! - [`RecordingDriver`] - Wrapper that logs every forwarded command
//! - [`SimDriver`] - In-process simulated robot

pub mod action_tracker;
pub mod pose;
pub mod recording;
pub mod sim;

pub use action_tracker::{ActionStatus, ActionTracker};
pub use pose::{PoseCell, PoseFeed, PoseHandler, Subscription};
pub use recording::RecordingDriver;
pub use sim::{DriverCall, SimDriver};

use crate::types::Image;

/// Command sink and sensor source for one robot
///
/// Methods returning `bool` report whether the robot accepted the command;
/// `false` means the relevant subsystem is still busy with a previous action.
#[cfg_attr(test, mockall::automock)]
pub trait RobotDriver: Send {
    /// Continuous chassis velocity: m/s forward, m/s sideways, deg/s rotation
    fn drive_speed(&mut self, vx: f64, vy: f64, vz: f64);

    /// Relative chassis move: metres, metres, degrees, at the given speeds
    fn drive_move(&mut self, x: f64, y: f64, z: f64, xy_speed: f64, z_speed: f64) -> bool;

    /// Halt the chassis
    fn stop(&mut self);

    /// Whether the chassis can take a new move
    fn is_chassis_ready(&self) -> bool;

    /// Relative arm move in millimetres
    fn arm_move(&mut self, dx: f64, dy: f64) -> bool;

    /// Return the arm to its home position
    fn arm_recenter(&mut self) -> bool;

    /// Whether the arm can take a new move
    fn is_arm_ready(&self) -> bool;

    /// Open the gripper at `power` (1-100)
    fn gripper_open(&mut self, power: u8);

    /// Close the gripper at `power` (1-100)
    fn gripper_close(&mut self, power: u8);

    /// Stop the gripper motor
    fn gripper_stop(&mut self);

    /// Latest frame from the robot camera, if any
    fn get_video_frame(&mut self) -> Option<Image>;

    /// Register for pose updates; the handler may run on a driver thread
    fn subscribe_pose(&mut self, handler: PoseHandler) -> Subscription;
}

impl<D: RobotDriver + ?Sized> RobotDriver for Box<D> {
    fn drive_speed(&mut self, vx: f64, vy: f64, vz: f64) {
        (**self).drive_speed(vx, vy, vz)
    }

    fn drive_move(&mut self, x: f64, y: f64, z: f64, xy_speed: f64, z_speed: f64) -> bool {
        (**self).drive_move(x, y, z, xy_speed, z_speed)
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn is_chassis_ready(&self) -> bool {
        (**self).is_chassis_ready()
    }

    fn arm_move(&mut self, dx: f64, dy: f64) -> bool {
        (**self).arm_move(dx, dy)
    }

    fn arm_recenter(&mut self) -> bool {
        (**self).arm_recenter()
    }

    fn is_arm_ready(&self) -> bool {
        (**self).is_arm_ready()
    }

    fn gripper_open(&mut self, power: u8) {
        (**self).gripper_open(power)
    }

    fn gripper_close(&mut self, power: u8) {
        (**self).gripper_close(power)
    }

    fn gripper_stop(&mut self) {
        (**self).gripper_stop()
    }

    fn get_video_frame(&mut self) -> Option<Image> {
        (**self).get_video_frame()
    }

    fn subscribe_pose(&mut self, handler: PoseHandler) -> Subscription {
        (**self).subscribe_pose(handler)
    }
}
