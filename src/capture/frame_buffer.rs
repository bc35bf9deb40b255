//! Thread-safe ring buffers for camera frames and command events
//!
//! The input loop pushes frames and commands from its own thread while the
//! recorder's sampler thread queries them. Every method takes the single
//! internal lock only long enough to push, pop or copy out pointers; image
//! copies and aggregation arithmetic happen outside the critical section.
//!
//! # Capacity
//!
//! Each image source keeps at most `max_frames` entries (normally
//! `buffer_duration * fps`). Commands arrive more densely than frames, so
//! the command deque holds [`COMMAND_CAPACITY_FACTOR`] times as many. When
//! full, the oldest entry is evicted first.
//!
//! # Aggregation
//!
//! [`FrameBuffer::aggregate`] combines every command with
//! `start < timestamp <= end`. Numeric channels are summed, boolean channels
//! are OR-ed, and gripper channels are clamped to their configured range
//! after summation. The half-open window means consecutive ticks never
//! double-count or drop a command that lands exactly on a boundary.

use crate::action::RawAction;
use crate::config::{ActionRanges, CaptureConfig};
use crate::error::{Result, TeleopError};
use crate::types::{ActionField, CommandEvent, FrameSource, Image, ImageShape};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Command capacity relative to per-source frame capacity
pub const COMMAND_CAPACITY_FACTOR: usize = 10;

#[derive(Debug, Clone)]
struct TimedImage {
    timestamp: Duration,
    image: Image,
}

#[derive(Debug, Default)]
struct BufferInner {
    robot: VecDeque<TimedImage>,
    webcam: VecDeque<TimedImage>,
    commands: VecDeque<CommandEvent>,
}

impl BufferInner {
    fn frames(&self, source: FrameSource) -> &VecDeque<TimedImage> {
        match source {
            FrameSource::Robot => &self.robot,
            FrameSource::Webcam => &self.webcam,
        }
    }

    fn frames_mut(&mut self, source: FrameSource) -> &mut VecDeque<TimedImage> {
        match source {
            FrameSource::Robot => &mut self.robot,
            FrameSource::Webcam => &mut self.webcam,
        }
    }
}

/// Bounded, time-indexed buffer for two image streams and one command stream
#[derive(Debug)]
pub struct FrameBuffer {
    max_frames: usize,
    max_commands: usize,
    ranges: ActionRanges,
    inner: Mutex<BufferInner>,
}

impl FrameBuffer {
    /// Create a buffer holding `max_frames` images per source
    pub fn new(max_frames: usize, ranges: ActionRanges) -> Result<Self> {
        if max_frames == 0 {
            return Err(TeleopError::Config(
                "frame buffer capacity must be at least 1".to_string(),
            ));
        }
        ranges.validate()?;

        let max_commands = max_frames
            .checked_mul(COMMAND_CAPACITY_FACTOR)
            .ok_or_else(|| {
                TeleopError::Config(format!("frame buffer capacity {} is too large", max_frames))
            })?;
        // Deques grow on demand up to the caps
        Ok(Self {
            max_frames,
            max_commands,
            ranges,
            inner: Mutex::new(BufferInner {
                robot: VecDeque::new(),
                webcam: VecDeque::new(),
                commands: VecDeque::new(),
            }),
        })
    }

    /// Create a buffer sized for `buffer_duration_secs * fps`
    pub fn from_config(config: &CaptureConfig) -> Result<Self> {
        config.validate()?;
        Self::new(config.max_frames(), config.action_ranges.clone())
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        // Contents stay consistent across a panicking holder: every mutation is a single push/pop
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Per-source frame capacity
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Command capacity
    pub fn max_commands(&self) -> usize {
        self.max_commands
    }

    /// Buffer an image, evicting the oldest frame of that source when full
    pub fn add_frame(&self, source: FrameSource, timestamp: Duration, image: Image) {
        let entry = TimedImage { timestamp, image };
        let mut inner = self.lock();
        let frames = inner.frames_mut(source);
        if frames.len() >= self.max_frames {
            frames.pop_front();
        }
        frames.push_back(entry);
    }

    /// Copy raw pixel bytes into the buffer
    ///
    /// The caller's slice may be reused immediately after this returns.
    pub fn add_frame_from_slice(
        &self,
        source: FrameSource,
        timestamp: Duration,
        shape: ImageShape,
        pixels: &[u8],
    ) -> Result<()> {
        let image = Image::from_slice(shape, pixels)?;
        self.add_frame(source, timestamp, image);
        Ok(())
    }

    /// Buffer a command event, evicting the oldest command when full
    pub fn add_command(&self, event: CommandEvent) {
        let mut inner = self.lock();
        if inner.commands.len() >= self.max_commands {
            inner.commands.pop_front();
        }
        inner.commands.push_back(event);
    }

    /// Image whose timestamp is closest to `target + offset_secs`
    ///
    /// Returns `None` immediately when the source has no frames. Ties go to
    /// the older frame.
    pub fn get_nearest(
        &self,
        source: FrameSource,
        target: Duration,
        offset_secs: f64,
    ) -> Option<Image> {
        let adjusted = target.as_secs_f64() + offset_secs;
        let inner = self.lock();

        let mut best: Option<&TimedImage> = None;
        let mut best_diff = f64::INFINITY;
        for entry in inner.frames(source) {
            let diff = (entry.timestamp.as_secs_f64() - adjusted).abs();
            if diff < best_diff {
                best_diff = diff;
                best = Some(entry);
            }
        }
        best.map(|e| e.image.clone())
    }

    /// Combine every command with `start < timestamp <= end`
    pub fn aggregate(&self, start: Duration, end: Duration) -> RawAction {
        let window: Vec<CommandEvent> = {
            let inner = self.lock();
            inner
                .commands
                .iter()
                .filter(|c| c.timestamp > start && c.timestamp <= end)
                .cloned()
                .collect()
        };

        let mut raw = RawAction::zero();
        for event in &window {
            for (&field, value) in &event.fields {
                if field.is_boolean() {
                    if value.is_truthy() {
                        raw.set(field, 1.0);
                    }
                } else {
                    raw.set(field, raw.get(field) + value.as_f64());
                }
            }
        }

        for field in [ActionField::GripperOpen, ActionField::GripperClose] {
            raw.set(field, self.ranges.get(field).clamp(raw.get(field)));
        }
        raw
    }

    /// Number of buffered frames for a source
    pub fn frame_len(&self, source: FrameSource) -> usize {
        self.lock().frames(source).len()
    }

    /// Number of buffered commands
    pub fn command_len(&self) -> usize {
        self.lock().commands.len()
    }

    /// Timestamps of buffered frames for a source, oldest first
    pub fn frame_timestamps(&self, source: FrameSource) -> Vec<Duration> {
        self.lock().frames(source).iter().map(|e| e.timestamp).collect()
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.robot.clear();
        inner.webcam.clear();
        inner.commands.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::command_fields;
    use proptest::prelude::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn tagged_image(tag: u8) -> Image {
        Image::new(ImageShape::rgb(1, 1), vec![tag, tag, tag]).unwrap()
    }

    fn buffer(max_frames: usize) -> FrameBuffer {
        FrameBuffer::new(max_frames, ActionRanges::default()).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(FrameBuffer::new(0, ActionRanges::default()).is_err());
    }

    #[test]
    fn test_overflowing_capacity_rejected() {
        let err = FrameBuffer::new(usize::MAX, ActionRanges::default()).unwrap_err();
        assert!(matches!(err, TeleopError::Config(_)));

        let config = CaptureConfig {
            buffer_duration_secs: 1e300,
            ..Default::default()
        };
        assert!(FrameBuffer::from_config(&config).is_err());
    }

    #[test]
    fn test_capacity_from_config() {
        let config = CaptureConfig {
            fps: 10,
            buffer_duration_secs: 1.5,
            ..Default::default()
        };
        let buf = FrameBuffer::from_config(&config).unwrap();
        assert_eq!(buf.max_frames(), 15);
        assert_eq!(buf.max_commands(), 150);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let buf = buffer(5);
        for i in 0..6u8 {
            buf.add_frame(FrameSource::Robot, secs(i as f64), tagged_image(i));
        }

        assert_eq!(buf.frame_len(FrameSource::Robot), 5);
        let kept = buf.frame_timestamps(FrameSource::Robot);
        assert_eq!(kept, (1..6).map(|i| secs(i as f64)).collect::<Vec<_>>());
        // Sources are independent
        assert_eq!(buf.frame_len(FrameSource::Webcam), 0);
    }

    #[test]
    fn test_command_eviction() {
        let buf = buffer(1);
        for i in 0..(COMMAND_CAPACITY_FACTOR + 3) {
            buf.add_command(CommandEvent::new(
                secs(i as f64),
                command_fields([(ActionField::MoveX, 1.0)]),
            ));
        }
        assert_eq!(buf.command_len(), COMMAND_CAPACITY_FACTOR);
        // Only the newest ten survive: t=3..=12
        let raw = buf.aggregate(secs(0.0), secs(100.0));
        assert_eq!(raw.get(ActionField::MoveX), 10.0);
        assert_eq!(buf.aggregate(secs(0.0), secs(3.0)).get(ActionField::MoveX), 1.0);
    }

    #[test]
    fn test_nearest_empty_source() {
        let buf = buffer(4);
        assert!(buf.get_nearest(FrameSource::Webcam, secs(1.0), 0.0).is_none());
    }

    #[test]
    fn test_nearest_with_offset() {
        let buf = buffer(8);
        for (t, tag) in [(1.0, 1u8), (1.1, 2), (1.2, 3)] {
            buf.add_frame(FrameSource::Webcam, secs(t), tagged_image(tag));
        }

        let img = buf.get_nearest(FrameSource::Webcam, secs(1.09), 0.0).unwrap();
        assert_eq!(img.data()[0], 2);

        // Negative offset compensates for a camera that runs late
        let img = buf.get_nearest(FrameSource::Webcam, secs(1.2), -0.2).unwrap();
        assert_eq!(img.data()[0], 1);

        let img = buf.get_nearest(FrameSource::Webcam, secs(0.0), 5.0).unwrap();
        assert_eq!(img.data()[0], 3);
    }

    #[test]
    fn test_nearest_tie_prefers_older() {
        let buf = buffer(4);
        buf.add_frame(FrameSource::Robot, secs(1.0), tagged_image(1));
        buf.add_frame(FrameSource::Robot, secs(2.0), tagged_image(2));
        let img = buf.get_nearest(FrameSource::Robot, secs(1.5), 0.0).unwrap();
        assert_eq!(img.data()[0], 1);
    }

    #[test]
    fn test_add_frame_from_slice_copies() {
        let buf = buffer(2);
        let mut pixels = vec![7u8; 3];
        buf.add_frame_from_slice(FrameSource::Robot, secs(0.5), ImageShape::rgb(1, 1), &pixels)
            .unwrap();
        pixels.fill(0);

        let img = buf.get_nearest(FrameSource::Robot, secs(0.5), 0.0).unwrap();
        assert_eq!(img.data(), &[7, 7, 7]);
    }

    #[test]
    fn test_aggregate_sums_numeric() {
        let buf = buffer(10);
        buf.add_command(CommandEvent::new(secs(1.0), command_fields([(ActionField::MoveX, 1.0)])));
        buf.add_command(CommandEvent::new(secs(2.0), command_fields([(ActionField::MoveX, 2.0)])));

        let raw = buf.aggregate(secs(0.0), secs(2.0));
        assert_eq!(raw.get(ActionField::MoveX), 3.0);
        assert_eq!(raw.get(ActionField::MoveY), 0.0);
    }

    #[test]
    fn test_aggregate_half_open_window() {
        let buf = buffer(10);
        for t in [1.0, 2.0, 3.0] {
            buf.add_command(CommandEvent::new(secs(t), command_fields([(ActionField::ArmX, 10.0)])));
        }

        // (1, 2] excludes the command at t=1 and includes t=2
        assert_eq!(buf.aggregate(secs(1.0), secs(2.0)).get(ActionField::ArmX), 10.0);
        // Adjacent windows partition the commands exactly
        let first = buf.aggregate(secs(0.0), secs(2.0)).get(ActionField::ArmX);
        let second = buf.aggregate(secs(2.0), secs(3.0)).get(ActionField::ArmX);
        assert_eq!(first + second, 30.0);
    }

    #[test]
    fn test_aggregate_recenter_is_or() {
        let buf = buffer(10);
        buf.add_command(CommandEvent::new(secs(0.1), command_fields([(ActionField::ArmRecenter, true)])));
        buf.add_command(CommandEvent::new(secs(0.2), command_fields([(ActionField::ArmRecenter, true)])));
        buf.add_command(CommandEvent::new(secs(0.3), command_fields([(ActionField::ArmRecenter, false)])));

        let raw = buf.aggregate(secs(0.0), secs(1.0));
        assert_eq!(raw.get(ActionField::ArmRecenter), 1.0);

        let raw = buf.aggregate(secs(0.25), secs(1.0));
        assert_eq!(raw.get(ActionField::ArmRecenter), 0.0);
    }

    #[test]
    fn test_aggregate_clamps_gripper() {
        let buf = buffer(10);
        for t in [0.1, 0.2, 0.3] {
            buf.add_command(CommandEvent::new(
                secs(t),
                command_fields([(ActionField::GripperOpen, 50.0), (ActionField::MoveX, 0.8)]),
            ));
        }

        let raw = buf.aggregate(secs(0.0), secs(1.0));
        assert_eq!(raw.get(ActionField::GripperOpen), 100.0);
        // Only gripper channels are clamped during aggregation
        assert!((raw.get(ActionField::MoveX) - 2.4).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let buf = buffer(3);
        buf.add_frame(FrameSource::Robot, secs(0.0), tagged_image(0));
        buf.add_command(CommandEvent::new(secs(0.0), command_fields([(ActionField::MoveX, 1.0)])));
        buf.clear();
        assert_eq!(buf.frame_len(FrameSource::Robot), 0);
        assert_eq!(buf.command_len(), 0);
    }

    proptest! {
        #[test]
        fn test_retains_last_max_frames(max_frames in 1usize..32, extra in 0usize..32) {
            let buf = buffer(max_frames);
            let total = max_frames + extra;
            for i in 0..total {
                buf.add_frame(FrameSource::Webcam, Duration::from_millis(i as u64), tagged_image(0));
            }
            let expected: Vec<_> = (extra..total).map(|i| Duration::from_millis(i as u64)).collect();
            prop_assert_eq!(buf.frame_timestamps(FrameSource::Webcam), expected);
        }

        #[test]
        fn test_recenter_never_exceeds_one(flags in prop::collection::vec(any::<bool>(), 0..40)) {
            let buf = buffer(10);
            for (i, flag) in flags.iter().enumerate() {
                buf.add_command(CommandEvent::new(
                    Duration::from_millis(i as u64 + 1),
                    command_fields([(ActionField::ArmRecenter, *flag)]),
                ));
            }
            let value = buf.aggregate(Duration::ZERO, Duration::from_secs(1)).get(ActionField::ArmRecenter);
            prop_assert_eq!(value, if flags.iter().any(|f| *f) { 1.0 } else { 0.0 });
        }
    }
}
