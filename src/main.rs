//! Teleoperation recorder - demo entry point
//!
//! Drives a simulated robot through a short scripted session while capturing
//! an episode, records the driver commands to a log and replays that log on a
//! fresh simulated robot.
//!
//! Usage: `teleop-recorder [config.toml] [--save]`
//!
//! Without `--save` the capture runs as a dry run and nothing is written to
//! the dataset directory.

use anyhow::Context;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use teleop_recorder::{
    capture::{Recorder, RecorderEvent},
    driver::{RecordingDriver, RobotDriver, SimDriver},
    session::{CommandPlayer, CommandRecorder, ReplayRunner},
    types::{command_fields, ActionField, FrameSource, Image},
    TeleopConfig,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Simulation clock period
const SIM_PERIOD: Duration = Duration::from_millis(10);

/// Upper bound on the scripted session
const SESSION_LIMIT: Duration = Duration::from_secs(15);

/// Scripted operator actions, issued once the chassis and arm are idle
#[derive(Debug, Clone, Copy)]
enum Step {
    Forward,
    Turn,
    Grip,
    Lift,
    Release,
    Settle,
    Done,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,teleop_recorder=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config_path = None;
    let mut save = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--save" => save = true,
            _ => config_path = Some(arg),
        }
    }

    let mut config = match &config_path {
        Some(path) => TeleopConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => TeleopConfig::default(),
    };
    config.capture.dry_run = !save;

    tracing::info!(
        "Starting teleop demo ({} fps, {})",
        config.capture.fps,
        if save { "saving episode" } else { "dry run" }
    );

    let log_path = std::env::temp_dir().join(teleop_recorder::session::default_file_name());
    record_session(&config, log_path.clone())?;
    replay_session(&config, &log_path)?;

    tracing::info!("Shutting down...");
    Ok(())
}

fn record_session(config: &TeleopConfig, log_path: std::path::PathBuf) -> anyhow::Result<()> {
    let robot_shape = config.capture.cameras.shape_for(FrameSource::Robot);
    let webcam_shape = config.capture.cameras.shape_for(FrameSource::Webcam);

    let sim = SimDriver::new(robot_shape);
    let running = Arc::new(AtomicBool::new(true));
    let clock = sim.run_clock(SIM_PERIOD, running.clone())?;

    let mut capture = Recorder::new(config.capture.clone())?;
    let events = capture.events();
    let input = capture.input();

    let mut commands = CommandRecorder::new(Some(log_path));
    commands.start()?;
    let mut driver = RecordingDriver::new(sim.clone(), commands);

    let persistence = capture.start()?;
    tracing::info!("Capture started ({:?})", persistence);

    let frame_interval = config.capture.frame_interval();
    let started = Instant::now();
    let mut step = Step::Forward;

    while started.elapsed() < SESSION_LIMIT {
        if driver.is_chassis_ready() && driver.is_arm_ready() {
            step = run_step(step, &mut driver, &input);
        }
        if matches!(step, Step::Done) {
            break;
        }

        let (vx, _, vz) = sim.velocity();
        input.add_command(command_fields([
            (ActionField::MoveX, vx),
            (ActionField::RotateZ, vz),
        ]));
        if let Some(frame) = driver.get_video_frame() {
            input.add_robot_frame(frame);
        }
        input.add_webcam_frame(Image::zeros(webcam_shape));

        std::thread::sleep(frame_interval);
    }

    let outcome = capture.stop()?;
    tracing::info!("Capture finished: {:?}", outcome);
    for event in events.try_iter() {
        if !matches!(event, RecorderEvent::DryRunFrame { .. }) {
            tracing::debug!("Recorder event: {:?}", event);
        }
    }

    let path = driver.recorder_mut().save()?;
    tracing::info!("Command log written to {:?}", path);

    running.store(false, Ordering::Release);
    let _ = clock.join();
    Ok(())
}

fn run_step<D: RobotDriver>(
    step: Step,
    driver: &mut D,
    input: &teleop_recorder::CaptureInput,
) -> Step {
    match step {
        Step::Forward => {
            driver.drive_move(0.5, 0.0, 0.0, 0.5, 90.0);
            Step::Turn
        }
        Step::Turn => {
            driver.drive_move(0.0, 0.0, 90.0, 0.5, 90.0);
            Step::Grip
        }
        Step::Grip => {
            driver.gripper_close(50);
            input.add_command(command_fields([(ActionField::GripperClose, 50.0)]));
            Step::Lift
        }
        Step::Lift => {
            driver.arm_move(0.0, 30.0);
            input.add_command(command_fields([(ActionField::ArmY, 30.0)]));
            Step::Release
        }
        Step::Release => {
            driver.gripper_open(50);
            driver.arm_recenter();
            input.add_command(command_fields([
                (ActionField::GripperOpen, 50.0),
                (ActionField::ArmRecenter, 1.0),
            ]));
            Step::Settle
        }
        Step::Settle => {
            // Chassis command pinned to the final pose, so replay waits for the turn
            driver.drive_speed(0.0, 0.0, 0.0);
            Step::Done
        }
        Step::Done => Step::Done,
    }
}

fn replay_session(config: &TeleopConfig, log_path: &std::path::Path) -> anyhow::Result<()> {
    let mut player = CommandPlayer::load(log_path)
        .with_context(|| format!("loading command log {:?}", log_path))?
        .with_config(config.replay.clone());
    let info = player.recording_info();
    tracing::info!(
        "Replaying {} commands ({} position-gated) recorded at {}",
        info.command_count,
        info.positioned_commands,
        info.recorded_at
    );

    let mut sim = SimDriver::new(config.capture.cameras.shape_for(FrameSource::Robot));
    let running = Arc::new(AtomicBool::new(true));
    let clock = sim.run_clock(SIM_PERIOD, running.clone())?;

    // Watchdog: emergency stop if the robot never reaches a recorded pose
    let (abort_tx, abort_rx) = bounded::<()>(1);
    std::thread::Builder::new()
        .name("replay-watchdog".to_string())
        .spawn(move || {
            std::thread::sleep(SESSION_LIMIT);
            let _ = abort_tx.try_send(());
        })?;

    let summary = ReplayRunner::new(config.replay.clone()).run(&mut player, &mut sim, &abort_rx)?;
    tracing::info!(
        "Replay summary: {} executed, {} rejected, final pose {}",
        summary.executed,
        summary.rejected,
        sim.pose()
    );

    running.store(false, Ordering::Release);
    let _ = clock.join();
    Ok(())
}
