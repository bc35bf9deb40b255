//! Simulated robot
//!
//! [`SimDriver`] integrates chassis commands into a pose, tracks chassis and
//! arm moves with [`ActionTracker`]s and synthesises camera frames. Time only
//! advances through [`SimDriver::step`], which keeps tests deterministic;
//! [`SimDriver::run_clock`] steps it from a background thread for live use.
//!
//! Chassis commands are interpreted in the robot frame: `x` forward, `y`
//! left, `z`/`vz` counter-clockwise degrees.

use super::{ActionTracker, PoseFeed, PoseHandler, RobotDriver, Subscription};
use crate::error::{Result, ResultExt};
use crate::types::{Image, ImageShape, Pose};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Arm travel speed in mm/s
const ARM_SPEED: f64 = 100.0;

/// Arm reach limits in mm
const ARM_X_RANGE: (f64, f64) = (0.0, 200.0);
const ARM_Y_RANGE: (f64, f64) = (0.0, 100.0);
const ARM_HOME: (f64, f64) = (50.0, 50.0);

/// Extra time granted to a move before it is considered timed out
const MOVE_TIMEOUT_SLACK: Duration = Duration::from_secs(2);

/// A command the simulated robot received
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    DriveSpeed { vx: f64, vy: f64, vz: f64 },
    DriveMove { x: f64, y: f64, z: f64, xy_speed: f64, z_speed: f64 },
    Stop,
    ArmMove { dx: f64, dy: f64 },
    ArmRecenter,
    GripperOpen { power: u8 },
    GripperClose { power: u8 },
    GripperStop,
}

/// Simulated gripper motor state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GripperState {
    #[default]
    Stopped,
    Opening(u8),
    Closing(u8),
}

#[derive(Debug, Clone, Copy)]
struct ChassisTarget {
    x: f64,
    y: f64,
    yaw: f64,
    xy_speed: f64,
    z_speed: f64,
}

#[derive(Debug)]
struct SimState {
    pose: Pose,
    velocity: (f64, f64, f64),
    chassis_target: Option<ChassisTarget>,
    arm: (f64, f64),
    arm_target: Option<(f64, f64)>,
    gripper: GripperState,
    frame_counter: u64,
    calls: Vec<DriverCall>,
}

/// In-process robot used by tests and the demo binary
#[derive(Debug, Clone)]
pub struct SimDriver {
    state: Arc<Mutex<SimState>>,
    feed: PoseFeed,
    chassis: ActionTracker,
    arm: ActionTracker,
    frame_shape: ImageShape,
}

impl SimDriver {
    /// Robot at the origin producing frames of `frame_shape`
    pub fn new(frame_shape: ImageShape) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                pose: Pose::default(),
                velocity: (0.0, 0.0, 0.0),
                chassis_target: None,
                arm: ARM_HOME,
                arm_target: None,
                gripper: GripperState::Stopped,
                frame_counter: 0,
                calls: Vec::new(),
            })),
            feed: PoseFeed::new(),
            chassis: ActionTracker::new("chassis"),
            arm: ActionTracker::new("arm"),
            frame_shape,
        }
    }

    /// Start from a given pose, published as the robot's first report
    pub fn with_pose(self, pose: Pose) -> Self {
        self.lock().pose = pose;
        self.feed.publish(pose);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current simulated pose
    pub fn pose(&self) -> Pose {
        self.lock().pose
    }

    /// Current arm position in mm
    pub fn arm_position(&self) -> (f64, f64) {
        self.lock().arm
    }

    /// Current gripper motor state
    pub fn gripper(&self) -> GripperState {
        self.lock().gripper
    }

    /// Commanded chassis velocity
    pub fn velocity(&self) -> (f64, f64, f64) {
        self.lock().velocity
    }

    /// Commands received so far
    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    /// Forget the command history
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Hub the simulated pose is published on
    pub fn pose_feed(&self) -> PoseFeed {
        self.feed.clone()
    }

    /// Publish the current pose without advancing time
    pub fn publish_pose(&self) {
        let pose = self.pose();
        self.feed.publish(pose);
    }

    /// Advance the simulation by `dt` and publish the resulting pose
    pub fn step(&self, dt: Duration) {
        let dt = dt.as_secs_f64();
        let (pose, chassis_done, arm_done) = {
            let mut state = self.lock();
            let chassis_done = state.advance_chassis(dt);
            let arm_done = state.advance_arm(dt);
            (state.pose, chassis_done, arm_done)
        };

        if chassis_done {
            self.chassis.complete();
        }
        if arm_done {
            self.arm.complete();
        }
        self.feed.publish(pose);
    }

    /// Step the simulation every `period` until `running` is cleared
    pub fn run_clock(&self, period: Duration, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let sim = self.clone();
        std::thread::Builder::new()
            .name("sim-clock".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    std::thread::sleep(period);
                    sim.step(period);
                }
            })
            .context("Failed to spawn simulation clock")
    }

    fn record(&self, call: DriverCall) {
        tracing::trace!("sim: {:?}", call);
        self.lock().calls.push(call);
    }
}

impl SimState {
    /// Returns true when a chassis move finished during this step
    fn advance_chassis(&mut self, dt: f64) -> bool {
        if let Some(target) = self.chassis_target {
            let dx = target.x - self.pose.x;
            let dy = target.y - self.pose.y;
            let dist = dx.hypot(dy);
            let step = target.xy_speed * dt;
            if dist <= step || dist < 1e-9 {
                self.pose.x = target.x;
                self.pose.y = target.y;
            } else {
                self.pose.x += dx / dist * step;
                self.pose.y += dy / dist * step;
            }

            let dyaw = wrap_degrees(target.yaw - self.pose.yaw);
            let turn = target.z_speed * dt;
            if dyaw.abs() <= turn {
                self.pose.yaw = target.yaw;
            } else {
                self.pose.yaw = wrap_degrees(self.pose.yaw + turn * dyaw.signum());
            }

            if self.pose.x == target.x && self.pose.y == target.y && self.pose.yaw == target.yaw {
                self.chassis_target = None;
                return true;
            }
            return false;
        }

        let (vx, vy, vz) = self.velocity;
        let heading = self.pose.yaw.to_radians();
        self.pose.x += (vx * heading.cos() - vy * heading.sin()) * dt;
        self.pose.y += (vx * heading.sin() + vy * heading.cos()) * dt;
        self.pose.yaw = wrap_degrees(self.pose.yaw + vz * dt);
        false
    }

    fn advance_arm(&mut self, dt: f64) -> bool {
        let Some((tx, ty)) = self.arm_target else {
            return false;
        };
        let (ax, ay) = self.arm;
        let dist = (tx - ax).hypot(ty - ay);
        let step = ARM_SPEED * dt;
        if dist <= step {
            self.arm = (tx, ty);
            self.arm_target = None;
            true
        } else {
            self.arm = (ax + (tx - ax) / dist * step, ay + (ty - ay) / dist * step);
            false
        }
    }
}

/// Wrap an angle into `[-180, 180)`
fn wrap_degrees(deg: f64) -> f64 {
    (deg + 180.0).rem_euclid(360.0) - 180.0
}

impl RobotDriver for SimDriver {
    fn drive_speed(&mut self, vx: f64, vy: f64, vz: f64) {
        self.record(DriverCall::DriveSpeed { vx, vy, vz });
        self.lock().velocity = (vx, vy, vz);
    }

    fn drive_move(&mut self, x: f64, y: f64, z: f64, xy_speed: f64, z_speed: f64) -> bool {
        self.record(DriverCall::DriveMove {
            x,
            y,
            z,
            xy_speed,
            z_speed,
        });
        if xy_speed <= 0.0 || z_speed <= 0.0 {
            tracing::warn!("sim: rejecting move with non-positive speed");
            return false;
        }

        let expected = (x.hypot(y) / xy_speed).max(z.abs() / z_speed);
        if !self
            .chassis
            .begin(Duration::from_secs_f64(expected * 2.0) + MOVE_TIMEOUT_SLACK)
        {
            return false;
        }

        let mut state = self.lock();
        let heading = state.pose.yaw.to_radians();
        let target = ChassisTarget {
            x: state.pose.x + x * heading.cos() - y * heading.sin(),
            y: state.pose.y + x * heading.sin() + y * heading.cos(),
            yaw: wrap_degrees(state.pose.yaw + z),
            xy_speed,
            z_speed,
        };
        state.velocity = (0.0, 0.0, 0.0);
        state.chassis_target = Some(target);
        true
    }

    fn stop(&mut self) {
        self.record(DriverCall::Stop);
        {
            let mut state = self.lock();
            state.velocity = (0.0, 0.0, 0.0);
            state.chassis_target = None;
        }
        self.chassis.reset();
    }

    fn is_chassis_ready(&self) -> bool {
        self.chassis.is_ready()
    }

    fn arm_move(&mut self, dx: f64, dy: f64) -> bool {
        self.record(DriverCall::ArmMove { dx, dy });
        let mut state = self.lock();
        let (ax, ay) = state.arm;
        let target = (
            (ax + dx).clamp(ARM_X_RANGE.0, ARM_X_RANGE.1),
            (ay + dy).clamp(ARM_Y_RANGE.0, ARM_Y_RANGE.1),
        );
        let dist = (target.0 - ax).hypot(target.1 - ay);
        if !self
            .arm
            .begin(Duration::from_secs_f64(dist / ARM_SPEED) + MOVE_TIMEOUT_SLACK)
        {
            return false;
        }
        state.arm_target = Some(target);
        true
    }

    fn arm_recenter(&mut self) -> bool {
        self.record(DriverCall::ArmRecenter);
        let mut state = self.lock();
        let (ax, ay) = state.arm;
        let dist = (ARM_HOME.0 - ax).hypot(ARM_HOME.1 - ay);
        if !self
            .arm
            .begin(Duration::from_secs_f64(dist / ARM_SPEED) + MOVE_TIMEOUT_SLACK)
        {
            return false;
        }
        state.arm_target = Some(ARM_HOME);
        true
    }

    fn is_arm_ready(&self) -> bool {
        self.arm.is_ready()
    }

    fn gripper_open(&mut self, power: u8) {
        self.record(DriverCall::GripperOpen { power });
        self.lock().gripper = GripperState::Opening(power);
    }

    fn gripper_close(&mut self, power: u8) {
        self.record(DriverCall::GripperClose { power });
        self.lock().gripper = GripperState::Closing(power);
    }

    fn gripper_stop(&mut self) {
        self.record(DriverCall::GripperStop);
        self.lock().gripper = GripperState::Stopped;
    }

    fn get_video_frame(&mut self) -> Option<Image> {
        let counter = {
            let mut state = self.lock();
            state.frame_counter += 1;
            state.frame_counter
        };
        Image::new(self.frame_shape, vec![(counter % 256) as u8; self.frame_shape.byte_len()]).ok()
    }

    fn subscribe_pose(&mut self, handler: PoseHandler) -> Subscription {
        self.feed.subscribe(handler)
    }
}
