//! Episode capture
//!
//! Turns live commands and camera frames into time-aligned training episodes.
//!
//! # Main Types
//!
//! - [`FrameBuffer`] - Bounded, time-indexed buffers for frames and commands
//! - [`Recorder`] - Start/stop/abort state machine driving the sampler thread
//! - [`CaptureInput`] - Producer handle for the input loop and camera threads
//! - [`EpisodeStore`] - Persistence seam, with [`FsEpisodeStore`] on disk

pub mod episode;
pub mod frame_buffer;
pub mod recorder;

pub use episode::{
    DatasetFrame, DatasetInfo, DatasetSpec, Episode, EpisodeStore, FsEpisodeStore,
    MemoryEpisodeStore,
};
pub use frame_buffer::FrameBuffer;
pub use recorder::{
    CaptureInput, CaptureState, PersistenceMode, Recorder, RecorderEvent, StopOutcome,
};
