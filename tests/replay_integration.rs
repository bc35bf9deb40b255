//! Integration tests for command recording and replay

mod common;

use common::builders::CommandLogBuilder;
use crossbeam_channel::bounded;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teleop_recorder::config::{ReplayConfig, ReplayMode};
use teleop_recorder::driver::{DriverCall, RecordingDriver, RobotDriver, SimDriver};
use teleop_recorder::session::{CommandKind, CommandLog, CommandPlayer, CommandRecorder, ReplayRunner};
use teleop_recorder::types::{ImageShape, Pose};
use teleop_recorder::TeleopError;

fn sim() -> SimDriver {
    SimDriver::new(ImageShape::rgb(4, 4))
}

fn runner(mode: ReplayMode) -> ReplayRunner {
    ReplayRunner::new(ReplayConfig {
        mode,
        poll_interval_ms: 2,
        ..Default::default()
    })
}

/// Step the simulation until the chassis and arm are idle
fn settle(robot: &SimDriver) {
    for _ in 0..2000 {
        if robot.is_chassis_ready() && robot.is_arm_ready() {
            return;
        }
        robot.step(Duration::from_millis(10));
    }
    panic!("simulation did not settle");
}

/// Drive a short session through a recording driver and save the log
fn record_session(path: &std::path::Path) -> Pose {
    let robot = sim();
    let mut recorder = CommandRecorder::new(Some(path.to_path_buf()));
    recorder.start().unwrap();
    let mut driver = RecordingDriver::new(robot.clone(), recorder);

    assert!(driver.drive_move(0.3, 0.0, 0.0, 0.5, 90.0));
    settle(&robot);
    assert!(driver.drive_move(0.0, 0.0, 90.0, 0.5, 90.0));
    settle(&robot);
    driver.gripper_close(40);
    driver.gripper_close(40);
    driver.drive_speed(0.0, 0.0, 0.0);

    driver.recorder_mut().save().unwrap();
    robot.pose()
}

#[test]
#[serial]
fn test_gated_replay_reproduces_recorded_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    let recorded_end = record_session(&path);
    common::assert_float_eq(recorded_end.x, 0.3, 1e-6);
    common::assert_float_eq(recorded_end.yaw, 90.0, 1e-6);

    let mut player = CommandPlayer::load(&path).unwrap();
    let info = player.recording_info();
    // The duplicate gripper command is collapsed on save
    assert_eq!(info.command_count, 4);
    assert_eq!(info.positioned_commands, 3);

    let mut robot = sim();
    let running = Arc::new(AtomicBool::new(true));
    let clock = robot.run_clock(Duration::from_millis(5), running.clone()).unwrap();

    let (abort_tx, abort_rx) = bounded(1);
    let watchdog = std::thread::spawn(move || {
        std::thread::sleep(common::test_timeout());
        let _ = abort_tx.try_send(());
    });

    let summary = runner(ReplayMode::PositionGated)
        .run(&mut player, &mut robot, &abort_rx)
        .unwrap();
    running.store(false, Ordering::Release);
    clock.join().unwrap();
    drop(watchdog);

    assert!(summary.completed, "replay did not complete: {:?}", summary);
    assert!(!summary.halted);
    assert_eq!(summary.executed, 4);
    assert_eq!(summary.rejected, 0);

    let pose = robot.pose();
    common::assert_float_eq(pose.x, 0.3, 0.011);
    common::assert_float_eq(pose.y, 0.0, 0.011);
    common::assert_float_eq(pose.yaw, 90.0, 1.01);

    let calls = robot.calls();
    assert!(calls.contains(&DriverCall::GripperClose { power: 40 }));
    assert_eq!(&calls[calls.len() - 2..], &[DriverCall::Stop, DriverCall::GripperStop]);
}

#[test]
#[serial]
fn test_timed_replay_honours_offsets() {
    let log = CommandLogBuilder::new()
        .command(0.0, CommandKind::ArmMove { x: 10.0, y: 0.0 })
        .command(0.05, CommandKind::GripperOpen { power: None })
        .command(0.1, CommandKind::ChassisSpeed { vx: 0.1, vy: 0.0, vz: 0.0 })
        .build();
    let mut player = CommandPlayer::from_log(log).unwrap();
    let mut robot = sim();
    let (_abort_tx, abort_rx) = bounded(1);

    let summary = runner(ReplayMode::Timed)
        .run(&mut player, &mut robot, &abort_rx)
        .unwrap();

    assert!(summary.completed);
    assert_eq!(summary.executed, 3);
    assert!(summary.elapsed >= Duration::from_millis(100));
    assert_eq!(
        robot.calls(),
        vec![
            DriverCall::ArmMove { dx: 10.0, dy: 0.0 },
            DriverCall::GripperOpen { power: 50 },
            DriverCall::DriveSpeed { vx: 0.1, vy: 0.0, vz: 0.0 },
            DriverCall::Stop,
            DriverCall::GripperStop,
        ]
    );
}

#[test]
fn test_gate_withholds_until_within_tolerance() {
    let log = CommandLogBuilder::new()
        .gated(0.0, CommandKind::Stop, (1.0, 0.0, 0.0))
        .build();
    let mut player = CommandPlayer::from_log(log).unwrap();
    player.start().unwrap();

    for x in [0.0, 0.5, 0.98] {
        player.update_position(Pose::new(x, 0.0, 0.0));
        assert!(player.next_if_ready().is_none(), "released at x={}", x);
    }
    player.update_position(Pose::new(1.005, 0.0, 0.5));
    assert!(player.next_if_ready().is_some());
}

#[test]
fn test_gate_boundary_is_inclusive() {
    for (x, released) in [(0.99, true), (1.01, true), (0.989, false), (1.011, false)] {
        let log = CommandLogBuilder::new()
            .gated(0.0, CommandKind::Stop, (1.0, 0.0, 0.0))
            .build();
        let mut player = CommandPlayer::from_log(log).unwrap();
        player.start().unwrap();
        player.update_position(Pose::new(x, 0.0, 0.0));
        assert_eq!(player.next_if_ready().is_some(), released, "x={}", x);
    }
}

#[test]
#[serial]
fn test_gate_uses_reported_pose_not_origin() {
    // The robot reported its pose before the replay subscribed
    let mut robot = sim().with_pose(Pose::new(3.0, 0.0, 0.0));
    let log = CommandLogBuilder::new()
        .gated(0.0, CommandKind::GripperStop, (0.0, 0.0, 0.0))
        .build();
    let mut player = CommandPlayer::from_log(log).unwrap();

    let (abort_tx, abort_rx) = bounded(1);
    let aborter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        let _ = abort_tx.send(());
    });
    let summary = runner(ReplayMode::PositionGated)
        .run(&mut player, &mut robot, &abort_rx)
        .unwrap();
    aborter.join().unwrap();

    assert!(summary.halted);
    assert_eq!(summary.executed, 0);
    assert!(!summary.completed);
    assert_eq!(player.current_position(), Pose::new(3.0, 0.0, 0.0));
}

#[test]
fn test_recording_tags_commands_with_reported_pose() {
    let robot = sim().with_pose(Pose::new(2.0, -1.0, 45.0));
    let mut recorder = CommandRecorder::new(None);
    recorder.start().unwrap();
    let mut driver = RecordingDriver::new(robot, recorder);

    driver.drive_speed(0.1, 0.0, 0.0);

    let pos = driver.recorder().commands()[0].expected_pos.unwrap();
    common::assert_float_eq(pos.x, 2.0, 1e-9);
    common::assert_float_eq(pos.y, -1.0, 1e-9);
    common::assert_float_eq(pos.z, 45.0, 1e-9);
}

#[test]
fn test_yaw_across_wrap_is_withheld() {
    let log = CommandLogBuilder::new()
        .gated(0.0, CommandKind::Stop, (0.0, 0.0, 179.0))
        .build();
    let mut player = CommandPlayer::from_log(log).unwrap();
    player.start().unwrap();

    player.update_position(Pose::new(0.0, 0.0, -179.0));
    assert!(player.is_waiting_for_position());
    assert!(player.next_if_ready().is_none());

    player.update_position(Pose::new(0.0, 0.0, 179.5));
    assert!(player.next_if_ready().is_some());
}

#[test]
fn test_save_collapses_duplicate_speeds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("speeds.json");
    let mut recorder = CommandRecorder::new(Some(path.clone()));
    recorder.start().unwrap();
    recorder.record(CommandKind::ChassisSpeed { vx: 0.4, vy: 0.0, vz: 0.0 });
    recorder.record(CommandKind::ChassisSpeed { vx: 0.4, vy: 0.0, vz: 0.0 });
    recorder.record(CommandKind::ArmMove { x: 5.0, y: 5.0 });
    recorder.save().unwrap();

    let log = CommandLog::load(&path).unwrap();
    let kinds: Vec<CommandKind> = log.commands.iter().map(|c| c.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            CommandKind::ChassisSpeed { vx: 0.4, vy: 0.0, vz: 0.0 },
            CommandKind::ArmMove { x: 5.0, y: 5.0 },
        ]
    );
}

#[test]
fn test_missing_and_corrupt_logs_fail_before_playback() {
    let dir = tempfile::tempdir().unwrap();

    let missing = CommandPlayer::load(dir.path().join("nope.json"));
    assert!(matches!(missing, Err(TeleopError::Replay(_))));

    let corrupt = dir.path().join("corrupt.json");
    std::fs::write(&corrupt, "{\"version\": \"1.0\", \"commands\": [").unwrap();
    assert!(matches!(CommandPlayer::load(&corrupt), Err(TeleopError::Replay(_))));

    let future = dir.path().join("future.json");
    std::fs::write(
        &future,
        r#"{"version": "2.0", "recorded_at": "2024-05-01T12:00:00", "duration": 0.0, "command_count": 0, "commands": []}"#,
    )
    .unwrap();
    assert!(matches!(CommandPlayer::load(&future), Err(TeleopError::Replay(_))));
}

#[test]
fn test_legacy_field_names_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    std::fs::write(
        &path,
        r#"{
            "version": "1.0",
            "recorded_at": "2024-05-01T12:00:00.123456",
            "duration": 1.0,
            "command_count": 2,
            "commands": [
                {"time_offset": 0.0, "type": "drive_speed", "vx": 0.2, "vy": 0.0, "vz": 0.0,
                 "expected_pos": {"x": 0.0, "y": 0.0, "z": 0.0}},
                {"time_offset": 0.5, "type": "gripper_close", "power": 30}
            ]
        }"#,
    )
    .unwrap();

    let player = CommandPlayer::load(&path).unwrap();
    assert_eq!(player.len(), 2);
    assert_eq!(
        player.commands()[0].kind,
        CommandKind::ChassisSpeed { vx: 0.2, vy: 0.0, vz: 0.0 }
    );
    assert_eq!(player.commands()[1].kind, CommandKind::GripperClose { power: Some(30) });
}
