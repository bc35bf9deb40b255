//! Replay loop
//!
//! [`ReplayRunner`] drives a [`CommandPlayer`] against a robot until the log
//! is exhausted or an abort signal arrives. Whatever ends the loop, the robot
//! is left with its chassis and gripper stopped.
//!
//! A released chassis or arm move is held back while that subsystem is still
//! busy with the previous move, so a pose gate that opens just before a move
//! finishes does not get the next move rejected.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::config::{ReplayConfig, ReplayMode};
use crate::driver::RobotDriver;
use crate::error::Result;

use super::player::CommandPlayer;
use super::types::{CommandKind, RecordedCommand};

/// How often progress is logged while replaying
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one replay run
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    /// Commands dispatched to the driver
    pub executed: usize,
    /// Dispatched commands the driver refused
    pub rejected: usize,
    /// Ended by an abort signal
    pub halted: bool,
    /// Every command was released
    pub completed: bool,
    pub elapsed: Duration,
}

/// Runs the replay loop for a configured gating mode
#[derive(Debug, Clone, Default)]
pub struct ReplayRunner {
    config: ReplayConfig,
}

impl ReplayRunner {
    pub fn new(config: ReplayConfig) -> Self {
        Self { config }
    }

    /// Replay settings
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay `player` on `driver`
    ///
    /// Any message on `abort` (or its sender being dropped while a message
    /// is pending) triggers an emergency stop. A disconnected channel with no
    /// message does not abort; the loop then paces itself with a plain sleep.
    pub fn run<D: RobotDriver + ?Sized>(
        &self,
        player: &mut CommandPlayer,
        driver: &mut D,
        abort: &Receiver<()>,
    ) -> Result<ReplaySummary> {
        self.config.validate()?;

        let _pose_sub = driver.subscribe_pose(player.pose_cell().handler());
        player.start()?;

        tracing::info!(
            "Replay started: {} commands, {:.1}s, {} mode",
            player.len(),
            player.duration(),
            self.config.mode
        );

        let result = self.replay_loop(player, driver, abort);

        player.stop();
        driver.stop();
        driver.gripper_stop();

        let summary = result?;
        tracing::info!(
            "Replay finished: {}/{} commands executed ({} rejected){}",
            summary.executed,
            player.len(),
            summary.rejected,
            if summary.halted { ", emergency stop" } else { "" }
        );
        Ok(summary)
    }

    fn replay_loop<D: RobotDriver + ?Sized>(
        &self,
        player: &mut CommandPlayer,
        driver: &mut D,
        abort: &Receiver<()>,
    ) -> Result<ReplaySummary> {
        let started = Instant::now();
        let poll = self.config.poll_interval();
        // Released commands whose subsystem is still busy, in release order
        let mut held: VecDeque<RecordedCommand> = VecDeque::new();
        let mut executed = 0;
        let mut rejected = 0;
        let mut halted = false;
        let mut last_log = Instant::now();
        let mut waiting_logged = false;

        while player.is_playing() || !held.is_empty() {
            if abort.try_recv().is_ok() {
                player.emergency_stop();
                halted = true;
                break;
            }

            match self.config.mode {
                ReplayMode::Timed => held.extend(player.pending()),
                ReplayMode::PositionGated if held.is_empty() => held.extend(player.next_if_ready()),
                ReplayMode::PositionGated => {}
            }

            while let Some(cmd) = held.front() {
                if !subsystem_ready(&cmd.kind, driver) {
                    tracing::trace!("Holding {} until the robot is idle", cmd.kind);
                    break;
                }
                executed += 1;
                if !player.execute(cmd, driver)? {
                    rejected += 1;
                }
                held.pop_front();
            }

            if self.config.mode == ReplayMode::PositionGated {
                let waiting = player.is_waiting_for_position();
                if waiting && !waiting_logged {
                    tracing::debug!(
                        "Waiting for position before command {} (at {})",
                        player.current_index(),
                        player.current_position()
                    );
                }
                waiting_logged = waiting;
            }

            if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                tracing::info!(
                    "Replay progress: {:.0}% ({}/{} commands)",
                    player.progress(),
                    player.current_index(),
                    player.len()
                );
                last_log = Instant::now();
            }

            if !player.is_playing() && held.is_empty() {
                break;
            }
            match abort.recv_timeout(poll) {
                Ok(()) => {
                    player.emergency_stop();
                    halted = true;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(poll),
            }
        }

        if halted {
            tracing::warn!(
                "Replay aborted at command {}/{} ({} held back)",
                player.current_index(),
                player.len(),
                held.len()
            );
        }

        Ok(ReplaySummary {
            executed,
            rejected,
            halted,
            completed: player.is_finished() && held.is_empty(),
            elapsed: started.elapsed(),
        })
    }
}

/// Whether the subsystem a command drives can take it now
fn subsystem_ready<D: RobotDriver + ?Sized>(kind: &CommandKind, driver: &D) -> bool {
    match kind {
        CommandKind::ChassisMove { .. } => driver.is_chassis_ready(),
        CommandKind::ArmMove { .. } | CommandKind::ArmRecenter => driver.is_arm_ready(),
        _ => true,
    }
}
