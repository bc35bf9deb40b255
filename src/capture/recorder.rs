//! Episode capture state machine
//!
//! The [`Recorder`] owns a [`FrameBuffer`] and, while recording, a background
//! sampler thread that turns buffered frames and commands into one
//! [`DatasetFrame`] per tick.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start()--> Recording --stop()--> Saving --> Idle
//!                       |
//!                       +--abort()--> Aborted --start()--> Recording
//! ```
//!
//! # Threading
//!
//! Producers push data through a [`CaptureInput`] handle (or the matching
//! methods on the recorder). These calls run entirely on the caller's thread
//! and only take the buffer lock briefly. The sampler sleeps until its next
//! scheduled tick on a crossbeam channel deadline, so `stop()`/`abort()` wake
//! it immediately. Joining is bounded by `join_timeout_ms`; a sampler that
//! fails to finish in time is abandoned.
//!
//! # Side Channel
//!
//! Absorbed problems (dropped frames, store fallbacks, abandoned samplers) and
//! lifecycle outcomes are published as [`RecorderEvent`]s on a bounded
//! channel. Events are sent with `try_send`; when nobody drains the channel,
//! new events are dropped instead of stalling the sampler.

use crate::action::{normalize, ActionVector};
use crate::capture::episode::{DatasetFrame, DatasetSpec, EpisodeStore, FsEpisodeStore};
use crate::capture::frame_buffer::FrameBuffer;
use crate::config::CaptureConfig;
use crate::error::{Result, TeleopError};
use crate::types::{CommandEvent, CommandFields, FrameSource, Image, ImageShape};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Capacity of the event side channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Opens the episode store when a non-dry-run session starts
pub type StoreOpener =
    Box<dyn FnMut(&CaptureConfig, &DatasetSpec) -> Result<Box<dyn EpisodeStore>> + Send>;

/// Recorder lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// Not recording
    #[default]
    Idle,
    /// Sampler running
    Recording,
    /// Sampler stopped, episode being persisted
    Saving,
    /// Last session was discarded
    Aborted,
}

impl CaptureState {
    /// Whether `start()` is allowed from this state
    pub fn can_start(&self) -> bool {
        matches!(self, CaptureState::Idle | CaptureState::Aborted)
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Recording => write!(f, "Recording"),
            CaptureState::Saving => write!(f, "Saving"),
            CaptureState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Where the current session's frames go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Frames are appended to the episode store
    Store,
    /// Frames are logged periodically and never persisted
    DryRun,
    /// The store could not be opened; the session records without persistence
    Disabled { reason: String },
}

impl PersistenceMode {
    /// Whether frames reach an episode store
    pub fn persists(&self) -> bool {
        matches!(self, PersistenceMode::Store)
    }
}

/// Result of [`Recorder::stop`]
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Episode persisted
    Saved { episode_index: usize, frames: usize },
    /// Nothing persisted (dry run, disabled store or empty episode)
    NotSaved { frames: u64 },
    /// Persisting failed; pending frames are kept for [`Recorder::retry_save`]
    Failed { frames: usize, error: String },
}

impl StopOutcome {
    /// Whether an episode was written
    pub fn is_saved(&self) -> bool {
        matches!(self, StopOutcome::Saved { .. })
    }
}

/// Message published on the recorder's side channel
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// Sampler launched
    Started { persistence: PersistenceMode },
    /// Periodic dry-run diagnostic
    DryRunFrame {
        frame_index: u64,
        elapsed: Duration,
        action: ActionVector,
        robot_frame: bool,
        webcam_frame: bool,
    },
    /// A tick's frame was not persisted
    FrameDropped { frame_index: u64, reason: String },
    /// Episode persisted
    Saved { episode_index: usize, frames: usize },
    /// Persisting the episode failed
    SaveFailed { frames: usize, reason: String },
    /// Session ended without persisting
    NotSaved { frames: u64 },
    /// Session discarded
    Aborted { discarded_frames: u64 },
    /// Sampler did not finish within the join timeout
    SamplerAbandoned,
}

// ==================== Capture Input ====================

/// Cloneable producer handle for commands and camera frames
///
/// Every method is a no-op unless the owning recorder is recording.
#[derive(Debug, Clone)]
pub struct CaptureInput {
    buffer: Arc<FrameBuffer>,
    recording: Arc<AtomicBool>,
    origin: Instant,
}

impl CaptureInput {
    /// Whether a session is currently recording
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Time on the session clock
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Buffer a command stamped with the current time
    pub fn add_command(&self, fields: CommandFields) {
        if self.is_recording() {
            self.buffer.add_command(CommandEvent::new(self.now(), fields));
        }
    }

    /// Buffer a frame from the robot camera
    pub fn add_robot_frame(&self, image: Image) {
        self.add_frame(FrameSource::Robot, image);
    }

    /// Buffer a frame from the webcam
    pub fn add_webcam_frame(&self, image: Image) {
        self.add_frame(FrameSource::Webcam, image);
    }

    /// Buffer a frame stamped with the current time
    pub fn add_frame(&self, source: FrameSource, image: Image) {
        if self.is_recording() {
            self.buffer.add_frame(source, self.now(), image);
        }
    }

    /// Copy raw pixels into the buffer; the slice may be reused afterwards
    pub fn add_frame_bytes(&self, source: FrameSource, shape: ImageShape, pixels: &[u8]) -> Result<()> {
        if self.is_recording() {
            self.buffer
                .add_frame_from_slice(source, self.now(), shape, pixels)?;
        }
        Ok(())
    }
}

// ==================== Sampler ====================

struct SamplerHandle {
    thread: JoinHandle<Option<Box<dyn EpisodeStore>>>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
}

struct Sampler {
    buffer: Arc<FrameBuffer>,
    config: CaptureConfig,
    spec: DatasetSpec,
    // Shared black frames substituted when a source has nothing buffered
    robot_blank: Image,
    webcam_blank: Image,
    store: Option<Box<dyn EpisodeStore>>,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    events: Sender<RecorderEvent>,
    origin: Instant,
    session_start: Duration,
    stop_rx: Receiver<()>,
    // Dropped when the thread exits, waking the joiner
    _done_tx: Sender<()>,
}

impl Sampler {
    fn run(mut self) -> Option<Box<dyn EpisodeStore>> {
        let interval = self.config.frame_interval();
        let start_instant = self.origin + self.session_start;
        let mut prev_tick = self.session_start;
        let mut tick_no: u32 = 0;

        tracing::debug!("Sampler started at {:?} interval", interval);

        while self.running.load(Ordering::Acquire) {
            tick_no = tick_no.saturating_add(1);
            let deadline = start_instant + interval * tick_no;
            match self.stop_rx.recv_deadline(deadline) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let now = self.origin.elapsed();
            self.tick(prev_tick, now);
            prev_tick = now;

            // Resynchronise after an overrun instead of replaying missed ticks
            let due = (start_instant.elapsed().as_nanos() / interval.as_nanos().max(1)) as u32;
            if due > tick_no {
                tracing::debug!("Sampler overran, skipping {} ticks", due - tick_no);
                tick_no = due;
            }
        }

        tracing::debug!(
            "Sampler stopped after {} frames",
            self.frame_count.load(Ordering::Acquire)
        );
        self.store.take()
    }

    fn tick(&mut self, prev_tick: Duration, now: Duration) {
        let frame_index = self.frame_count.fetch_add(1, Ordering::AcqRel) + 1;

        let robot = self.nearest_or_blank(FrameSource::Robot, now);
        let webcam = self.nearest_or_blank(FrameSource::Webcam, now);

        let raw = self.buffer.aggregate(prev_tick, now);
        let action = normalize(&raw, &self.config.action_ranges);

        if self.config.dry_run {
            if frame_index % self.config.dry_run_report_every == 0 {
                let elapsed = now.saturating_sub(self.session_start);
                tracing::info!(
                    "[dry run] frame {} at {:.2}s: robot={} webcam={} action={:?}",
                    frame_index,
                    elapsed.as_secs_f64(),
                    robot.1,
                    webcam.1,
                    action.to_f32()
                );
                self.emit(RecorderEvent::DryRunFrame {
                    frame_index,
                    elapsed,
                    action,
                    robot_frame: robot.1,
                    webcam_frame: webcam.1,
                });
            }
            return;
        }

        let Some(store) = self.store.as_mut() else {
            return;
        };
        let frame = DatasetFrame {
            tick: frame_index,
            timestamp: now,
            robot_image: robot.0,
            webcam_image: webcam.0,
            action,
        };
        if let Err(e) = store.add_frame(frame) {
            tracing::warn!("Dropped frame {}: {}", frame_index, e);
            self.emit(RecorderEvent::FrameDropped {
                frame_index,
                reason: e.to_string(),
            });
        }
    }

    /// Nearest buffered image, or a black frame of the declared shape
    fn nearest_or_blank(&self, source: FrameSource, now: Duration) -> (Image, bool) {
        match self
            .buffer
            .get_nearest(source, now, self.config.offset_for(source))
        {
            Some(image) => (image, true),
            None => {
                tracing::trace!("No {} frame buffered, substituting black frame", source);
                let blank = match source {
                    FrameSource::Robot => &self.robot_blank,
                    FrameSource::Webcam => &self.webcam_blank,
                };
                (blank.clone(), false)
            }
        }
    }

    fn emit(&self, event: RecorderEvent) {
        let _ = self.events.try_send(event);
    }
}

// ==================== Recorder ====================

/// Records time-aligned episodes from buffered commands and frames
pub struct Recorder {
    config: CaptureConfig,
    spec: DatasetSpec,
    input: CaptureInput,
    frame_count: Arc<AtomicU64>,
    state: CaptureState,
    persistence: Option<PersistenceMode>,
    opener: StoreOpener,
    store: Option<Box<dyn EpisodeStore>>,
    sampler: Option<SamplerHandle>,
    events_tx: Sender<RecorderEvent>,
    events_rx: Receiver<RecorderEvent>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("state", &self.state)
            .field("persistence", &self.persistence)
            .field("frame_count", &self.frame_count())
            .field("dataset", &self.config.dataset_path())
            .finish()
    }
}

impl Recorder {
    /// Create a recorder writing to the filesystem dataset named in `config`
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let buffer = Arc::new(FrameBuffer::from_config(&config)?);
        let spec = DatasetSpec::from_config(&config);
        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            spec,
            input: CaptureInput {
                buffer,
                recording: Arc::new(AtomicBool::new(false)),
                origin: Instant::now(),
            },
            frame_count: Arc::new(AtomicU64::new(0)),
            state: CaptureState::Idle,
            persistence: None,
            opener: Box::new(open_fs_store),
            store: None,
            sampler: None,
            events_tx,
            events_rx,
            config,
        })
    }

    /// Replace the store opener
    pub fn with_store_opener<F>(mut self, opener: F) -> Self
    where
        F: FnMut(&CaptureConfig, &DatasetSpec) -> Result<Box<dyn EpisodeStore>> + Send + 'static,
    {
        self.opener = Box::new(opener);
        self.store = None;
        self
    }

    /// Capture settings
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Dataset shapes and rate
    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    /// Current lifecycle state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Whether the sampler is running
    pub fn is_recording(&self) -> bool {
        self.state == CaptureState::Recording
    }

    /// Ticks sampled in the current (or last) session
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Acquire)
    }

    /// Persistence mode of the current (or last) session
    pub fn persistence(&self) -> Option<&PersistenceMode> {
        self.persistence.as_ref()
    }

    /// Frames waiting in the store after a failed save
    pub fn pending_frames(&self) -> usize {
        self.store.as_ref().map(|s| s.pending_frames()).unwrap_or(0)
    }

    /// Receiver for side-channel events
    pub fn events(&self) -> Receiver<RecorderEvent> {
        self.events_rx.clone()
    }

    /// Producer handle usable from other threads
    pub fn input(&self) -> CaptureInput {
        self.input.clone()
    }

    /// Shared frame buffer
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.input.buffer
    }

    /// Buffer a command (no-op unless recording)
    pub fn add_command(&self, fields: CommandFields) {
        self.input.add_command(fields);
    }

    /// Buffer a robot camera frame (no-op unless recording)
    pub fn add_robot_frame(&self, image: Image) {
        self.input.add_robot_frame(image);
    }

    /// Buffer a webcam frame (no-op unless recording)
    pub fn add_webcam_frame(&self, image: Image) {
        self.input.add_webcam_frame(image);
    }

    /// Begin a recording session
    pub fn start(&mut self) -> Result<PersistenceMode> {
        if !self.state.can_start() || self.sampler.is_some() {
            return Err(TeleopError::InvalidState(format!(
                "cannot start recording while {}",
                self.state
            )));
        }

        self.input.buffer.clear();
        self.frame_count.store(0, Ordering::Release);

        let persistence = if self.config.dry_run {
            PersistenceMode::DryRun
        } else {
            self.prepare_store()
        };

        let (stop_tx, stop_rx) = bounded(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let session_start = self.input.now();
        let sampler = Sampler {
            buffer: Arc::clone(&self.input.buffer),
            config: self.config.clone(),
            spec: self.spec,
            robot_blank: Image::zeros(self.spec.robot_shape),
            webcam_blank: Image::zeros(self.spec.webcam_shape),
            store: if persistence.persists() {
                self.store.take()
            } else {
                None
            },
            running: Arc::clone(&self.input.recording),
            frame_count: Arc::clone(&self.frame_count),
            events: self.events_tx.clone(),
            origin: self.input.origin,
            session_start,
            stop_rx,
            _done_tx: done_tx,
        };

        self.input.recording.store(true, Ordering::Release);
        let thread = match std::thread::Builder::new()
            .name("teleop-sampler".to_string())
            .spawn(move || sampler.run())
        {
            Ok(thread) => thread,
            Err(e) => {
                // The store moved into the closure is lost with it
                self.input.recording.store(false, Ordering::Release);
                return Err(TeleopError::Io(e).with_context("Failed to spawn sampler thread"));
            }
        };

        self.sampler = Some(SamplerHandle {
            thread,
            stop_tx,
            done_rx,
        });
        self.state = CaptureState::Recording;
        self.persistence = Some(persistence.clone());

        tracing::info!(
            "Recording started at {} fps ({:?})",
            self.config.fps,
            persistence
        );
        self.emit(RecorderEvent::Started {
            persistence: persistence.clone(),
        });
        Ok(persistence)
    }

    /// Open the store if needed; fall back to no persistence on failure
    fn prepare_store(&mut self) -> PersistenceMode {
        if let Some(store) = self.store.as_mut() {
            let stale = store.pending_frames();
            if stale > 0 {
                tracing::warn!("Discarding {} unsaved frames from the previous session", stale);
                store.clear_episode();
            }
            return PersistenceMode::Store;
        }

        match (self.opener)(&self.config, &self.spec) {
            Ok(store) => {
                self.store = Some(store);
                PersistenceMode::Store
            }
            Err(e) => {
                tracing::warn!("Episode store unavailable, recording without persistence: {}", e);
                PersistenceMode::Disabled {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Stop recording and persist the episode
    pub fn stop(&mut self) -> Result<StopOutcome> {
        if self.state != CaptureState::Recording {
            return Err(TeleopError::InvalidState(format!(
                "cannot stop while {}",
                self.state
            )));
        }

        self.state = CaptureState::Saving;
        self.halt_sampler();
        let ticks = self.frame_count();

        let outcome = match (&self.persistence, self.store.as_mut()) {
            (Some(PersistenceMode::Store), Some(store)) if store.pending_frames() > 0 => {
                let frames = store.pending_frames();
                match store.save_episode(&self.config.task) {
                    Ok(episode_index) => {
                        tracing::info!("Episode {} saved ({} frames)", episode_index, frames);
                        StopOutcome::Saved {
                            episode_index,
                            frames,
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to save episode ({} frames): {}", frames, e);
                        StopOutcome::Failed {
                            frames,
                            error: e.to_string(),
                        }
                    }
                }
            }
            (Some(PersistenceMode::DryRun), _) => {
                tracing::info!("Dry run finished: {} frames recorded, not saved", ticks);
                StopOutcome::NotSaved { frames: ticks }
            }
            _ => {
                tracing::info!("Recording stopped: {} frames, nothing persisted", ticks);
                StopOutcome::NotSaved { frames: ticks }
            }
        };

        self.emit(match &outcome {
            StopOutcome::Saved {
                episode_index,
                frames,
            } => RecorderEvent::Saved {
                episode_index: *episode_index,
                frames: *frames,
            },
            StopOutcome::NotSaved { frames } => RecorderEvent::NotSaved { frames: *frames },
            StopOutcome::Failed { frames, error } => RecorderEvent::SaveFailed {
                frames: *frames,
                reason: error.clone(),
            },
        });

        self.state = CaptureState::Idle;
        Ok(outcome)
    }

    /// Re-attempt persisting an episode whose save failed
    pub fn retry_save(&mut self) -> Result<usize> {
        if !self.state.can_start() {
            return Err(TeleopError::InvalidState(format!(
                "cannot retry a save while {}",
                self.state
            )));
        }
        let store = match self.store.as_mut() {
            Some(store) if store.pending_frames() > 0 => store,
            _ => {
                return Err(TeleopError::InvalidState(
                    "no unsaved episode to retry".to_string(),
                ))
            }
        };

        let frames = store.pending_frames();
        match store.save_episode(&self.config.task) {
            Ok(episode_index) => {
                tracing::info!("Episode {} saved on retry ({} frames)", episode_index, frames);
                self.emit(RecorderEvent::Saved {
                    episode_index,
                    frames,
                });
                Ok(episode_index)
            }
            Err(e) => {
                self.emit(RecorderEvent::SaveFailed {
                    frames,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stop recording and discard the episode; returns the discarded frame count
    pub fn abort(&mut self) -> u64 {
        if self.sampler.is_some() {
            self.halt_sampler();
        }

        let pending = self.pending_frames() as u64;
        let discarded = if pending > 0 {
            if let Some(store) = self.store.as_mut() {
                store.clear_episode();
            }
            pending
        } else if self.state == CaptureState::Recording {
            self.frame_count()
        } else {
            0
        };
        self.input.buffer.clear();

        tracing::info!("Recording aborted, {} frames discarded", discarded);
        self.emit(RecorderEvent::Aborted {
            discarded_frames: discarded,
        });
        self.state = CaptureState::Aborted;
        discarded
    }

    /// Signal the sampler and join it within the configured timeout
    fn halt_sampler(&mut self) {
        self.input.recording.store(false, Ordering::Release);
        let Some(handle) = self.sampler.take() else {
            return;
        };
        let _ = handle.stop_tx.try_send(());

        match handle.done_rx.recv_timeout(self.config.join_timeout()) {
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Sampler did not stop within {:?}, abandoning it",
                    self.config.join_timeout()
                );
                self.emit(RecorderEvent::SamplerAbandoned);
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match handle.thread.join() {
                Ok(store) => {
                    if store.is_some() {
                        self.store = store;
                    }
                }
                Err(_) => tracing::warn!("Sampler thread panicked; episode store dropped"),
            },
        }
    }

    fn emit(&self, event: RecorderEvent) {
        let _ = self.events_tx.try_send(event);
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(handle) = self.sampler.take() {
            self.input.recording.store(false, Ordering::Release);
            let _ = handle.stop_tx.try_send(());
        }
    }
}

fn open_fs_store(config: &CaptureConfig, spec: &DatasetSpec) -> Result<Box<dyn EpisodeStore>> {
    let store = FsEpisodeStore::open_or_create(config.dataset_root_expanded(), &config.dataset_name, *spec)?;
    Ok(Box::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::episode::MemoryEpisodeStore;
    use crate::config::RobotResolution;
    use crate::types::{command_fields, ActionField};
    use std::thread;

    fn fast_config() -> CaptureConfig {
        let mut config = CaptureConfig {
            fps: 50,
            buffer_duration_secs: 1.0,
            ..Default::default()
        };
        config.cameras.robot_resolution = RobotResolution::P360;
        config.cameras.webcam_width = 8;
        config.cameras.webcam_height = 4;
        config
    }

    fn memory_recorder(config: CaptureConfig) -> (Recorder, MemoryEpisodeStore) {
        let observer = MemoryEpisodeStore::new(DatasetSpec::from_config(&config));
        let shared = observer.clone();
        let recorder = Recorder::new(config)
            .unwrap()
            .with_store_opener(move |_, _| Ok(Box::new(shared.clone()) as Box<dyn EpisodeStore>));
        (recorder, observer)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CaptureConfig {
            fps: 0,
            ..Default::default()
        };
        assert!(matches!(Recorder::new(config), Err(TeleopError::Config(_))));
    }

    #[test]
    fn test_producers_ignored_when_idle() {
        let (recorder, _) = memory_recorder(fast_config());
        recorder.add_command(command_fields([(ActionField::MoveX, 1.0)]));
        recorder.add_webcam_frame(Image::zeros(ImageShape::rgb(4, 8)));
        assert_eq!(recorder.buffer().command_len(), 0);
        assert_eq!(recorder.buffer().frame_len(FrameSource::Webcam), 0);
    }

    #[test]
    fn test_stop_when_idle_is_invalid() {
        let (mut recorder, _) = memory_recorder(fast_config());
        assert!(matches!(recorder.stop(), Err(TeleopError::InvalidState(_))));
    }

    #[test]
    fn test_double_start_rejected() {
        let (mut recorder, _) = memory_recorder(fast_config());
        recorder.start().unwrap();
        assert!(matches!(recorder.start(), Err(TeleopError::InvalidState(_))));
        recorder.abort();
    }

    #[test]
    fn test_record_and_save() {
        let (mut recorder, observer) = memory_recorder(fast_config());
        assert_eq!(recorder.start().unwrap(), PersistenceMode::Store);
        assert!(recorder.is_recording());

        let input = recorder.input();
        input.add_webcam_frame(Image::new(ImageShape::rgb(4, 8), vec![200; 96]).unwrap());
        input.add_command(command_fields([(ActionField::GripperOpen, 100.0)]));
        thread::sleep(Duration::from_millis(150));

        let outcome = recorder.stop().unwrap();
        assert!(outcome.is_saved(), "{:?}", outcome);
        assert_eq!(recorder.state(), CaptureState::Idle);

        let episodes = observer.episodes();
        assert_eq!(episodes.len(), 1);
        let episode = &episodes[0];
        assert!(!episode.is_empty());
        assert_eq!(episode.task, recorder.config().task);

        // Missing robot frames are substituted with black frames of the declared shape
        let first = &episode.frames[0];
        assert_eq!(first.robot_image.shape(), ImageShape::rgb(360, 640));
        assert!(first.robot_image.is_blank());
        assert_eq!(first.webcam_image.data()[0], 200);

        // The gripper command lands in exactly one tick's window
        let opened = episode
            .frames
            .iter()
            .filter(|f| f.action.get(ActionField::GripperOpen) == 1.0)
            .count();
        assert_eq!(opened, 1);
    }

    #[test]
    fn test_dry_run_not_saved() {
        let config = CaptureConfig {
            dry_run: true,
            dry_run_report_every: 2,
            ..fast_config()
        };
        let (mut recorder, observer) = memory_recorder(config);
        let events = recorder.events();

        assert_eq!(recorder.start().unwrap(), PersistenceMode::DryRun);
        thread::sleep(Duration::from_millis(120));
        let outcome = recorder.stop().unwrap();

        let StopOutcome::NotSaved { frames } = outcome else {
            panic!("expected NotSaved, got {:?}", outcome);
        };
        assert_eq!(frames, recorder.frame_count());
        assert!(observer.episodes().is_empty());

        let received: Vec<_> = events.try_iter().collect();
        assert!(received
            .iter()
            .any(|e| matches!(e, RecorderEvent::DryRunFrame { frame_index, .. } if frame_index % 2 == 0)));
        assert!(received.contains(&RecorderEvent::NotSaved { frames }));
    }

    #[test]
    fn test_store_failure_falls_back() {
        let recorder = Recorder::new(fast_config()).unwrap();
        let mut recorder = recorder.with_store_opener(|_, _| Err(TeleopError::Store("read-only".to_string())));

        let mode = recorder.start().unwrap();
        assert!(matches!(mode, PersistenceMode::Disabled { ref reason } if reason.contains("read-only")));
        thread::sleep(Duration::from_millis(50));

        assert!(matches!(recorder.stop().unwrap(), StopOutcome::NotSaved { .. }));
    }

    #[test]
    fn test_abort_discards() {
        let (mut recorder, observer) = memory_recorder(fast_config());
        let events = recorder.events();
        recorder.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        let discarded = recorder.abort();
        assert!(discarded > 0);
        assert_eq!(recorder.state(), CaptureState::Aborted);
        assert_eq!(recorder.pending_frames(), 0);
        assert!(observer.episodes().is_empty());
        assert!(events
            .try_iter()
            .any(|e| e == RecorderEvent::Aborted { discarded_frames: discarded }));

        // Aborted is not terminal for the recorder itself
        recorder.start().unwrap();
        recorder.abort();
    }
}
