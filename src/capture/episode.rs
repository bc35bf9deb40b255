//! Episode export
//!
//! A recorded episode is an ordered run of [`DatasetFrame`]s (two camera
//! images plus a normalised action vector) tagged with a task label. The
//! sampler hands frames to an [`EpisodeStore`] one tick at a time and asks it
//! to persist the episode when the session stops.
//!
//! # Main Types
//!
//! - [`DatasetSpec`] - fps and fixed image shapes every frame must match
//! - [`DatasetFrame`] - one sampler tick worth of data
//! - [`EpisodeStore`] - persistence seam used by the recorder
//! - [`FsEpisodeStore`] - on-disk dataset in a LeRobot-style layout
//! - [`MemoryEpisodeStore`] - in-process store for tests and previews
//!
//! # On-disk Layout
//!
//! ```text
//! <root>/<name>/
//!   meta/info.json                 fps, features, totals
//!   meta/episodes.jsonl            one line per saved episode
//!   data/episode_000000.jsonl      one line per frame (index, timestamp, action)
//!   videos/observation.images.robot/episode_000000.raw
//!   videos/observation.images.top/episode_000000.raw
//! ```
//!
//! Video files hold the episode's frames back to back as raw `HxWx3` bytes.

use crate::action::{ActionVector, ACTION_DIM, ACTION_NAMES};
use crate::config::CaptureConfig;
use crate::error::{Result, TeleopError};
use crate::types::{FrameSource, Image, ImageShape};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Dataset feature key for the action vector
pub const ACTION_FEATURE: &str = "action";

/// Format tag written to `meta/info.json`
pub const CODEBASE_VERSION: &str = "v2.0-raw";

const ROBOT_TYPE: &str = "robomaster";

/// Fixed properties every frame of a dataset shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub fps: u32,
    pub robot_shape: ImageShape,
    pub webcam_shape: ImageShape,
}

impl DatasetSpec {
    /// Derive the spec from the capture settings
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            fps: config.fps,
            robot_shape: config.cameras.shape_for(FrameSource::Robot),
            webcam_shape: config.cameras.shape_for(FrameSource::Webcam),
        }
    }

    /// Declared image shape for a source
    pub fn shape_for(&self, source: FrameSource) -> ImageShape {
        match source {
            FrameSource::Robot => self.robot_shape,
            FrameSource::Webcam => self.webcam_shape,
        }
    }

    /// Reject a frame whose images do not match the declared shapes
    pub fn check_frame(&self, frame: &DatasetFrame) -> Result<()> {
        for source in FrameSource::ALL {
            let actual = frame.image(source).shape();
            let expected = self.shape_for(source);
            if actual != expected {
                return Err(TeleopError::Store(format!(
                    "{} image shape {} does not match declared {}",
                    source, actual, expected
                )));
            }
        }
        Ok(())
    }
}

/// One sampler tick: both camera images and the normalised action
#[derive(Debug, Clone)]
pub struct DatasetFrame {
    /// Sampler tick that produced this frame (1-based)
    pub tick: u64,
    /// Tick time since the session clock origin
    pub timestamp: Duration,
    pub robot_image: Image,
    pub webcam_image: Image,
    pub action: ActionVector,
}

impl DatasetFrame {
    /// Image for a source
    pub fn image(&self, source: FrameSource) -> &Image {
        match source {
            FrameSource::Robot => &self.robot_image,
            FrameSource::Webcam => &self.webcam_image,
        }
    }
}

/// A completed episode held in memory
#[derive(Debug, Clone)]
pub struct Episode {
    pub index: usize,
    pub task: String,
    pub fps: u32,
    pub frames: Vec<DatasetFrame>,
}

impl Episode {
    /// Number of frames
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the episode has no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Persistence backend for recorded episodes
///
/// Implementations hold the frames of the episode in progress, in memory or
/// on disk, until [`EpisodeStore::save_episode`] succeeds or
/// [`EpisodeStore::clear_episode`] discards them. A failed save must leave the
/// pending frames untouched and the saved episodes unchanged.
pub trait EpisodeStore: Send {
    /// Shapes and rate this store accepts
    fn spec(&self) -> &DatasetSpec;

    /// Append a frame to the episode in progress
    fn add_frame(&mut self, frame: DatasetFrame) -> Result<()>;

    /// Persist the pending frames as a new episode and return its index
    fn save_episode(&mut self, task: &str) -> Result<usize>;

    /// Discard the pending frames
    fn clear_episode(&mut self);

    /// Frames waiting to be saved
    fn pending_frames(&self) -> usize;
}

// ==================== Metadata Records ====================

/// Shape and dtype of one dataset feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub dtype: String,
    pub shape: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<Vec<String>>,
}

/// Contents of `meta/info.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub codebase_version: String,
    pub robot_type: String,
    pub fps: u32,
    pub total_episodes: usize,
    pub total_frames: usize,
    pub features: BTreeMap<String, FeatureInfo>,
}

impl DatasetInfo {
    fn new(spec: &DatasetSpec) -> Self {
        let mut features = BTreeMap::new();
        for source in FrameSource::ALL {
            features.insert(
                source.feature_key().to_string(),
                FeatureInfo {
                    dtype: "image".to_string(),
                    shape: spec.shape_for(source).as_array().to_vec(),
                    names: Some(vec![
                        "height".to_string(),
                        "width".to_string(),
                        "channel".to_string(),
                    ]),
                },
            );
        }
        features.insert(
            ACTION_FEATURE.to_string(),
            FeatureInfo {
                dtype: "float32".to_string(),
                shape: vec![ACTION_DIM as u32],
                names: Some(ACTION_NAMES.iter().map(|n| n.to_string()).collect()),
            },
        );

        Self {
            codebase_version: CODEBASE_VERSION.to_string(),
            robot_type: ROBOT_TYPE.to_string(),
            fps: spec.fps,
            total_episodes: 0,
            total_frames: 0,
            features,
        }
    }

    /// Check that an existing dataset can take frames of `spec`
    fn ensure_compatible(&self, spec: &DatasetSpec) -> Result<()> {
        if self.fps != spec.fps {
            return Err(TeleopError::Store(format!(
                "dataset was recorded at {} fps, session uses {} fps",
                self.fps, spec.fps
            )));
        }
        for source in FrameSource::ALL {
            let key = source.feature_key();
            let expected = spec.shape_for(source).as_array().to_vec();
            match self.features.get(key) {
                Some(feature) if feature.shape == expected => {}
                Some(feature) => {
                    return Err(TeleopError::Store(format!(
                        "feature {} has shape {:?}, session uses {:?}",
                        key, feature.shape, expected
                    )))
                }
                None => {
                    return Err(TeleopError::Store(format!(
                        "dataset is missing feature {}",
                        key
                    )))
                }
            }
        }
        Ok(())
    }
}

/// One line of `meta/episodes.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode_index: usize,
    pub tasks: Vec<String>,
    pub length: usize,
}

/// One line of `data/episode_NNNNNN.jsonl`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_index: usize,
    pub episode_index: usize,
    /// Global frame index across the dataset
    pub index: usize,
    /// Seconds since the episode's first frame (`frame_index / fps`)
    pub timestamp: f64,
    pub action: [f32; ACTION_DIM],
}

// ==================== Filesystem Store ====================

/// An episode file that is appended to frame by frame
///
/// `committed` is the length after the last complete frame; a frame that
/// fails halfway is cut back to it.
#[derive(Debug)]
struct EpisodeFile {
    path: PathBuf,
    file: File,
    committed: u64,
    written: u64,
}

impl EpisodeFile {
    fn create(path: PathBuf) -> Result<Self> {
        let file = create_file(&path)?;
        Ok(Self {
            path,
            file,
            committed: 0,
            written: 0,
        })
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.file
            .write_all(bytes)
            .map_err(|e| write_error(&self.path, e))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn commit(&mut self) {
        self.committed = self.written;
    }

    fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.committed)?;
        self.file.seek(SeekFrom::Start(self.committed))?;
        self.written = self.committed;
        Ok(())
    }
}

/// Files of the episode being recorded
#[derive(Debug)]
struct EpisodeWriter {
    index: usize,
    frames: usize,
    data: EpisodeFile,
    robot_video: EpisodeFile,
    webcam_video: EpisodeFile,
}

impl EpisodeWriter {
    fn files_mut(&mut self) -> [&mut EpisodeFile; 3] {
        [&mut self.data, &mut self.robot_video, &mut self.webcam_video]
    }

    fn paths(&self) -> [&Path; 3] {
        [
            self.data.path.as_path(),
            self.robot_video.path.as_path(),
            self.webcam_video.path.as_path(),
        ]
    }

    fn append_frame(&mut self, record: &FrameRecord, frame: &DatasetFrame) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.data.append(&line)?;
        self.robot_video.append(frame.robot_image.data())?;
        self.webcam_video.append(frame.webcam_image.data())
    }
}

/// Dataset directory on the local filesystem
///
/// Frames are written to the episode's data and video files as they arrive;
/// only the metadata under `meta/` waits for [`EpisodeStore::save_episode`].
#[derive(Debug)]
pub struct FsEpisodeStore {
    path: PathBuf,
    spec: DatasetSpec,
    info: DatasetInfo,
    writer: Option<EpisodeWriter>,
}

impl FsEpisodeStore {
    /// Open `root/name`, creating the dataset when it does not exist yet
    pub fn open_or_create(root: impl AsRef<Path>, name: &str, spec: DatasetSpec) -> Result<Self> {
        let path = root.as_ref().join(name);
        let info_path = path.join("meta").join("info.json");

        let info = if info_path.exists() {
            let content = fs::read_to_string(&info_path).map_err(|e| {
                TeleopError::Store(format!("Failed to read {:?}: {}", info_path, e))
            })?;
            let info: DatasetInfo = serde_json::from_str(&content).map_err(|e| {
                TeleopError::Store(format!("Failed to parse {:?}: {}", info_path, e))
            })?;
            info.ensure_compatible(&spec)?;
            tracing::info!(
                "Opened dataset {:?} ({} episodes, {} frames)",
                path,
                info.total_episodes,
                info.total_frames
            );
            info
        } else {
            let info = DatasetInfo::new(&spec);
            for dir in Self::layout_dirs(&path) {
                fs::create_dir_all(&dir).map_err(|e| {
                    TeleopError::Store(format!("Failed to create {:?}: {}", dir, e))
                })?;
            }
            write_json_atomic(&info_path, &info)?;
            tracing::info!("Created dataset {:?}", path);
            info
        };

        Ok(Self {
            path,
            spec,
            info,
            writer: None,
        })
    }

    fn layout_dirs(path: &Path) -> Vec<PathBuf> {
        let mut dirs = vec![path.join("meta"), path.join("data")];
        for source in FrameSource::ALL {
            dirs.push(path.join("videos").join(source.feature_key()));
        }
        dirs
    }

    /// Dataset directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current dataset metadata
    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    /// Number of episodes saved so far
    pub fn episode_count(&self) -> usize {
        self.info.total_episodes
    }

    /// Path of an episode's frame table
    pub fn data_file(&self, episode_index: usize) -> PathBuf {
        self.path
            .join("data")
            .join(format!("episode_{:06}.jsonl", episode_index))
    }

    /// Path of an episode's raw video for a source
    pub fn video_file(&self, source: FrameSource, episode_index: usize) -> PathBuf {
        self.path
            .join("videos")
            .join(source.feature_key())
            .join(format!("episode_{:06}.raw", episode_index))
    }

    fn episodes_file(&self) -> PathBuf {
        self.path.join("meta").join("episodes.jsonl")
    }

    /// Writer for the episode in progress, opened on its first frame
    fn writer(&mut self) -> Result<&mut EpisodeWriter> {
        if self.writer.is_none() {
            let index = self.info.total_episodes;
            let writer = EpisodeWriter {
                index,
                frames: 0,
                data: EpisodeFile::create(self.data_file(index))?,
                robot_video: EpisodeFile::create(self.video_file(FrameSource::Robot, index))?,
                webcam_video: EpisodeFile::create(self.video_file(FrameSource::Webcam, index))?,
            };
            tracing::debug!("Streaming episode {} to {:?}", index, self.path);
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| TeleopError::InvalidState("episode writer missing".to_string()))
    }

    /// Append the episode record and bump the totals
    ///
    /// `episodes.jsonl` is cut back to its previous length when `info.json`
    /// cannot be written, so a retried save does not duplicate the record.
    fn commit_metadata(&mut self, record: &EpisodeRecord) -> Result<()> {
        let episodes_path = self.episodes_file();
        let previous_len = match fs::metadata(&episodes_path) {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        append_json_line(&episodes_path, record)?;

        let mut info = self.info.clone();
        info.total_episodes += 1;
        info.total_frames += record.length;
        if let Err(e) = write_json_atomic(&self.path.join("meta").join("info.json"), &info) {
            if let Err(trunc) = truncate_file(&episodes_path, previous_len) {
                tracing::error!(
                    "Failed to roll back {:?} after metadata error: {}",
                    episodes_path,
                    trunc
                );
            }
            return Err(e);
        }
        self.info = info;
        Ok(())
    }
}

impl EpisodeStore for FsEpisodeStore {
    fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    fn add_frame(&mut self, frame: DatasetFrame) -> Result<()> {
        self.spec.check_frame(&frame)?;

        let fps = self.spec.fps.max(1) as f64;
        let total_frames = self.info.total_frames;
        let writer = self.writer()?;
        let record = FrameRecord {
            frame_index: writer.frames,
            episode_index: writer.index,
            index: total_frames + writer.frames,
            timestamp: writer.frames as f64 / fps,
            action: frame.action.to_f32(),
        };

        match writer.append_frame(&record, &frame) {
            Ok(()) => {
                for file in writer.files_mut() {
                    file.commit();
                }
                writer.frames += 1;
                Ok(())
            }
            Err(e) => {
                for file in writer.files_mut() {
                    if let Err(rollback) = file.rollback() {
                        tracing::error!("Failed to roll back {:?}: {}", file.path, rollback);
                    }
                }
                Err(e)
            }
        }
    }

    fn save_episode(&mut self, task: &str) -> Result<usize> {
        let Some(writer) = self.writer.as_mut().filter(|w| w.frames > 0) else {
            return Err(TeleopError::Store("no frames to save".to_string()));
        };
        for file in writer.files_mut() {
            file.file
                .sync_data()
                .map_err(|e| write_error(&file.path, e))?;
        }

        let record = EpisodeRecord {
            episode_index: writer.index,
            tasks: vec![task.to_string()],
            length: writer.frames,
        };
        self.commit_metadata(&record)?;
        self.writer = None;

        tracing::info!(
            "Saved episode {} ({} frames) to {:?}",
            record.episode_index,
            record.length,
            self.path
        );
        Ok(record.episode_index)
    }

    fn clear_episode(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        let paths: Vec<PathBuf> = writer.paths().iter().map(|p| p.to_path_buf()).collect();
        drop(writer);
        for path in paths {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to remove partial episode file {:?}: {}", path, e);
            }
        }
    }

    fn pending_frames(&self) -> usize {
        self.writer.as_ref().map_or(0, |w| w.frames)
    }
}

fn create_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| write_error(path, e))
}

fn write_error(path: &Path, err: std::io::Error) -> TeleopError {
    TeleopError::Store(format!("Failed to write {:?}: {}", path, err))
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| write_error(path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| write_error(path, e))
}

fn truncate_file(path: &Path, len: u64) -> std::io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(len)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| write_error(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| write_error(path, e))
}

/// Read `meta/info.json` of a dataset directory
pub fn read_dataset_info(dataset_path: impl AsRef<Path>) -> Result<DatasetInfo> {
    let path = dataset_path.as_ref().join("meta").join("info.json");
    let content = fs::read_to_string(&path)
        .map_err(|e| TeleopError::Store(format!("Failed to read {:?}: {}", path, e)))?;
    Ok(serde_json::from_str(&content)?)
}

/// Read an episode's frame table
pub fn read_frame_records(data_file: impl AsRef<Path>) -> Result<Vec<FrameRecord>> {
    let path = data_file.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| TeleopError::Store(format!("Failed to read {:?}: {}", path, e)))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(TeleopError::from))
        .collect()
}

// ==================== Memory Store ====================

/// Store that keeps saved episodes in memory
///
/// Cloning shares the saved episodes, so a clone kept by the caller observes
/// what a boxed copy inside the recorder saves.
#[derive(Debug, Clone)]
pub struct MemoryEpisodeStore {
    spec: DatasetSpec,
    pending: Vec<DatasetFrame>,
    saved: Arc<Mutex<Vec<Episode>>>,
}

impl MemoryEpisodeStore {
    /// Create an empty store
    pub fn new(spec: DatasetSpec) -> Self {
        Self {
            spec,
            pending: Vec::new(),
            saved: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Snapshot of the saved episodes
    pub fn episodes(&self) -> Vec<Episode> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EpisodeStore for MemoryEpisodeStore {
    fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    fn add_frame(&mut self, frame: DatasetFrame) -> Result<()> {
        self.spec.check_frame(&frame)?;
        self.pending.push(frame);
        Ok(())
    }

    fn save_episode(&mut self, task: &str) -> Result<usize> {
        if self.pending.is_empty() {
            return Err(TeleopError::Store("no frames to save".to_string()));
        }
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        let index = saved.len();
        saved.push(Episode {
            index,
            task: task.to_string(),
            fps: self.spec.fps,
            frames: std::mem::take(&mut self.pending),
        });
        Ok(index)
    }

    fn clear_episode(&mut self) {
        self.pending.clear();
    }

    fn pending_frames(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionVector;

    fn small_spec() -> DatasetSpec {
        DatasetSpec {
            fps: 10,
            robot_shape: ImageShape::rgb(2, 2),
            webcam_shape: ImageShape::rgb(2, 3),
        }
    }

    fn frame(spec: &DatasetSpec, tick: u64, fill: u8) -> DatasetFrame {
        let robot = Image::new(spec.robot_shape, vec![fill; spec.robot_shape.byte_len()]).unwrap();
        let mut action = ActionVector::default();
        action.0[0] = 0.5;
        DatasetFrame {
            tick,
            timestamp: Duration::from_millis(tick * 100),
            robot_image: robot,
            webcam_image: Image::zeros(spec.webcam_shape),
            action,
        }
    }

    #[test]
    fn test_create_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsEpisodeStore::open_or_create(dir.path(), "ds", small_spec()).unwrap();

        assert!(store.path().join("meta/info.json").exists());
        assert!(store.path().join("data").is_dir());
        assert!(store.path().join("videos/observation.images.robot").is_dir());
        assert!(store.path().join("videos/observation.images.top").is_dir());

        let info = read_dataset_info(store.path()).unwrap();
        assert_eq!(info.fps, 10);
        assert_eq!(info.total_episodes, 0);
        assert_eq!(info.features["observation.images.top"].shape, vec![2, 3, 3]);
        assert_eq!(info.features[ACTION_FEATURE].shape, vec![9]);
    }

    #[test]
    fn test_save_episode_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let spec = small_spec();
        let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", spec).unwrap();

        for tick in 1..=3 {
            store.add_frame(frame(&spec, tick, tick as u8)).unwrap();
        }
        assert_eq!(store.pending_frames(), 3);

        let index = store.save_episode("pick cube").unwrap();
        assert_eq!(index, 0);
        assert_eq!(store.pending_frames(), 0);

        let records = read_frame_records(store.data_file(0)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].frame_index, 2);
        assert!((records[1].timestamp - 0.1).abs() < 1e-9);
        assert_eq!(records[0].action[0], 0.5f32);

        let video = fs::read(store.video_file(FrameSource::Robot, 0)).unwrap();
        assert_eq!(video.len(), 3 * spec.robot_shape.byte_len());
        assert_eq!(video[spec.robot_shape.byte_len()], 2);

        let episodes = fs::read_to_string(store.path().join("meta/episodes.jsonl")).unwrap();
        let record: EpisodeRecord = serde_json::from_str(episodes.lines().next().unwrap()).unwrap();
        assert_eq!(record.tasks, vec!["pick cube".to_string()]);
        assert_eq!(record.length, 3);
    }

    #[test]
    fn test_frames_reach_disk_before_save() {
        let dir = tempfile::tempdir().unwrap();
        let spec = small_spec();
        let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", spec).unwrap();

        store.add_frame(frame(&spec, 1, 7)).unwrap();
        store.add_frame(frame(&spec, 2, 8)).unwrap();

        let video = fs::read(store.video_file(FrameSource::Robot, 0)).unwrap();
        assert_eq!(video.len(), 2 * spec.robot_shape.byte_len());
        assert_eq!(video[spec.robot_shape.byte_len()], 8);
        assert_eq!(read_frame_records(store.data_file(0)).unwrap().len(), 2);
        // Nothing is announced in the metadata until the save
        assert_eq!(read_dataset_info(store.path()).unwrap().total_episodes, 0);
        assert!(!store.path().join("meta/episodes.jsonl").exists());
    }

    #[test]
    fn test_clear_removes_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let spec = small_spec();
        let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", spec).unwrap();

        store.add_frame(frame(&spec, 1, 1)).unwrap();
        assert!(store.data_file(0).exists());
        store.clear_episode();

        assert_eq!(store.pending_frames(), 0);
        assert!(!store.data_file(0).exists());
        assert!(!store.video_file(FrameSource::Webcam, 0).exists());

        // The next episode reuses the index from scratch
        store.add_frame(frame(&spec, 1, 3)).unwrap();
        assert_eq!(store.save_episode("again").unwrap(), 0);
        assert_eq!(read_frame_records(store.data_file(0)).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_metadata_write_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let spec = small_spec();
        let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", spec).unwrap();
        store.add_frame(frame(&spec, 1, 1)).unwrap();
        store.add_frame(frame(&spec, 2, 2)).unwrap();

        // A directory in the way of the temp file makes the info write fail
        let blocker = store.path().join("meta/info.json.tmp");
        fs::create_dir(&blocker).unwrap();
        assert!(matches!(store.save_episode("cube"), Err(TeleopError::Store(_))));
        assert_eq!(store.pending_frames(), 2);
        assert_eq!(store.episode_count(), 0);
        let episodes = fs::read_to_string(store.path().join("meta/episodes.jsonl")).unwrap();
        assert!(episodes.is_empty());

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(store.save_episode("cube").unwrap(), 0);

        let episodes = fs::read_to_string(store.path().join("meta/episodes.jsonl")).unwrap();
        let records: Vec<EpisodeRecord> = episodes
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].episode_index, 0);
        assert_eq!(records[0].length, 2);
        assert_eq!(read_dataset_info(store.path()).unwrap().total_frames, 2);
    }

    #[test]
    fn test_reopen_appends_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let spec = small_spec();
        {
            let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", spec).unwrap();
            store.add_frame(frame(&spec, 1, 1)).unwrap();
            store.save_episode("a").unwrap();
        }

        let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", spec).unwrap();
        assert_eq!(store.episode_count(), 1);
        store.add_frame(frame(&spec, 1, 1)).unwrap();
        store.add_frame(frame(&spec, 2, 1)).unwrap();
        assert_eq!(store.save_episode("b").unwrap(), 1);

        let records = read_frame_records(store.data_file(1)).unwrap();
        // Global index continues after the first episode
        assert_eq!(records[0].index, 1);
        assert_eq!(store.info().total_frames, 3);
    }

    #[test]
    fn test_reopen_with_different_fps_rejected() {
        let dir = tempfile::tempdir().unwrap();
        FsEpisodeStore::open_or_create(dir.path(), "ds", small_spec()).unwrap();

        let other = DatasetSpec {
            fps: 30,
            ..small_spec()
        };
        let err = FsEpisodeStore::open_or_create(dir.path(), "ds", other).unwrap_err();
        assert!(matches!(err, TeleopError::Store(_)));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let spec = small_spec();
        let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", spec).unwrap();

        let mut bad = frame(&spec, 1, 0);
        bad.webcam_image = Image::zeros(ImageShape::rgb(4, 4));
        assert!(store.add_frame(bad).is_err());
        assert_eq!(store.pending_frames(), 0);
    }

    #[test]
    fn test_empty_episode_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FsEpisodeStore::open_or_create(dir.path(), "ds", small_spec()).unwrap();
        assert!(store.save_episode("nothing").is_err());
        assert_eq!(store.episode_count(), 0);
    }

    #[test]
    fn test_memory_store_shares_saved() {
        let spec = small_spec();
        let observer = MemoryEpisodeStore::new(spec);
        let mut boxed: Box<dyn EpisodeStore> = Box::new(observer.clone());

        boxed.add_frame(frame(&spec, 1, 9)).unwrap();
        boxed.add_frame(frame(&spec, 2, 9)).unwrap();
        boxed.clear_episode();
        boxed.add_frame(frame(&spec, 3, 9)).unwrap();
        boxed.save_episode("t").unwrap();

        let episodes = observer.episodes();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].len(), 1);
        assert_eq!(episodes[0].frames[0].tick, 3);
        assert_eq!(episodes[0].task, "t");
    }
}
