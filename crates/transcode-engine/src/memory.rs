//! In-memory decode/encode engines.
//!
//! Used by tests and dry runs. Sources are registered up front or read
//! back from files the memory engines wrote earlier: every finished output
//! is a small JSON document describing the asset it stands for, so steps
//! can be chained without real media.
//!
//! Engines are cheap handles over shared state; clone one to keep a handle
//! for inspecting what the pipeline did.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use videokit_common::error::{EngineError, EngineResult};
use videokit_common::time::MediaTime;
use videokit_media_model::{AffineTransform, AssetInfo, Size, TrackKind, TrackMetadata};

use crate::engine::{
    ContainerFormat, DecodeEngine, DecodeOutput, DecodeSession, EncodeEngine, EncodeSession,
    EncodeSettings, EncoderInput, MetadataProvider, OutputFormat, Sample,
};

/// Default sample counts for sources built by [`MemorySource::from_asset`].
const DEFAULT_VIDEO_SAMPLES: usize = 30;
const DEFAULT_AUDIO_SAMPLES: usize = 43;

/// Samples an encoder input accepts before it reports not-ready.
const DEFAULT_INPUT_CAPACITY: usize = 4;

/// On-disk form of a memory-engine output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFile {
    pub asset: AssetInfo,
    #[serde(default)]
    pub video_samples: usize,
    #[serde(default)]
    pub audio_samples: usize,
}

impl MemoryFile {
    pub async fn read(path: &Path) -> EngineResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            EngineError::unsupported(format!("{} is not a memory media file: {e}", path.display()))
        })
    }

    pub async fn write(&self, path: &Path) -> EngineResult<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| EngineError::process(format!("serialize memory file: {e}")))?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

/// A source asset with its decoded samples.
#[derive(Debug, Clone)]
pub struct MemorySource {
    pub asset: AssetInfo,
    samples: HashMap<TrackKind, Vec<Sample>>,
}

impl MemorySource {
    /// Source with `video` frames and `audio` chunks spread evenly over
    /// the asset duration. Counts for absent tracks are ignored.
    pub fn new(asset: AssetInfo, video: usize, audio: usize) -> Self {
        let mut samples = HashMap::new();
        if asset.has_track(TrackKind::Video) {
            samples.insert(
                TrackKind::Video,
                spread(TrackKind::Video, asset.duration, video),
            );
        }
        if asset.has_track(TrackKind::Audio) {
            samples.insert(
                TrackKind::Audio,
                spread(TrackKind::Audio, asset.duration, audio),
            );
        }
        Self { asset, samples }
    }

    pub fn from_asset(asset: AssetInfo) -> Self {
        Self::new(asset, DEFAULT_VIDEO_SAMPLES, DEFAULT_AUDIO_SAMPLES)
    }

    fn from_file(file: MemoryFile) -> Self {
        Self::new(file.asset, file.video_samples, file.audio_samples)
    }

    pub fn sample_count(&self, kind: TrackKind) -> usize {
        self.samples.get(&kind).map_or(0, Vec::len)
    }
}

/// Timescale fine enough to keep spread samples distinct.
const SPREAD_TIMESCALE: i32 = 600;

fn spread(kind: TrackKind, duration: MediaTime, count: usize) -> Vec<Sample> {
    let duration = if duration.timescale < SPREAD_TIMESCALE {
        duration.rescale(SPREAD_TIMESCALE)
    } else {
        duration
    };
    let n = count as i64;
    let at = |i: i64| MediaTime::new(duration.value * i / n.max(1), duration.timescale);
    (0..n)
        .map(|i| Sample {
            kind,
            pts: at(i),
            duration: MediaTime::new(
                at(i + 1).value - at(i).value,
                duration.timescale,
            ),
            data: vec![i as u8; 16],
        })
        .collect()
}

/// Failures a [`MemoryDecodeEngine`] injects.
#[derive(Debug, Clone, Default)]
pub struct DecodeFaults {
    pub fail_open: bool,
    pub reject_attach: Option<TrackKind>,
    /// Fail the track's output after delivering this many samples.
    pub fail_after: Option<(TrackKind, usize)>,
}

/// What a [`MemoryDecodeEngine`] has been asked to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeRecord {
    pub opened: usize,
    pub started: usize,
    pub cancelled: usize,
    pub metadata_loads: usize,
}

#[derive(Debug, Default)]
struct DecodeShared {
    sources: Mutex<HashMap<PathBuf, MemorySource>>,
    faults: Mutex<DecodeFaults>,
    record: Mutex<DecodeRecord>,
}

/// Decode engine and metadata provider over registered sources.
#[derive(Debug, Clone, Default)]
pub struct MemoryDecodeEngine {
    shared: Arc<DecodeShared>,
}

impl MemoryDecodeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, source: MemorySource) {
        lock(&self.shared.sources).insert(path.into(), source);
    }

    pub fn set_faults(&self, faults: DecodeFaults) {
        *lock(&self.shared.faults) = faults;
    }

    pub fn record(&self) -> DecodeRecord {
        lock(&self.shared.record).clone()
    }

    async fn lookup(&self, source: &Path) -> EngineResult<MemorySource> {
        let registered = lock(&self.shared.sources).get(source).cloned();
        if let Some(found) = registered {
            return Ok(found);
        }
        if !source.exists() {
            return Err(EngineError::unsupported(format!(
                "no media registered at {}",
                source.display()
            )));
        }
        Ok(MemorySource::from_file(MemoryFile::read(source).await?))
    }
}

#[async_trait]
impl MetadataProvider for MemoryDecodeEngine {
    async fn load(&self, source: &Path) -> EngineResult<AssetInfo> {
        lock(&self.shared.record).metadata_loads += 1;
        Ok(self.lookup(source).await?.asset)
    }
}

#[async_trait]
impl DecodeEngine for MemoryDecodeEngine {
    async fn open(&self, source: &Path) -> EngineResult<Box<dyn DecodeSession>> {
        let faults = lock(&self.shared.faults).clone();
        if faults.fail_open {
            return Err(EngineError::unavailable("injected decode open failure"));
        }
        let media = self.lookup(source).await?;
        lock(&self.shared.record).opened += 1;

        Ok(Box::new(MemoryDecodeSession {
            media,
            faults,
            shared: Arc::clone(&self.shared),
            started: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryDecodeSession {
    media: MemorySource,
    faults: DecodeFaults,
    shared: Arc<DecodeShared>,
    started: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl DecodeSession for MemoryDecodeSession {
    fn asset(&self) -> &AssetInfo {
        &self.media.asset
    }

    fn attach_output(
        &mut self,
        track: &TrackMetadata,
        format: OutputFormat,
    ) -> EngineResult<Box<dyn DecodeOutput>> {
        if self.started.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("outputs must be attached before start"));
        }
        if self.faults.reject_attach == Some(track.kind) || format.kind() != track.kind {
            return Err(EngineError::unsupported(format!(
                "cannot deliver {} track {} as {format:?}",
                track.kind, track.index
            )));
        }

        let queue = self.media.samples.remove(&track.kind).unwrap_or_default();
        let fail_after = match self.faults.fail_after {
            Some((kind, n)) if kind == track.kind => Some(n),
            _ => None,
        };
        Ok(Box::new(MemoryDecodeOutput {
            kind: track.kind,
            queue: queue.into(),
            delivered: 0,
            fail_after,
            started: Arc::clone(&self.started),
            cancelled: Arc::clone(&self.cancelled),
        }))
    }

    async fn start(&mut self) -> EngineResult<()> {
        self.started.store(true, Ordering::SeqCst);
        lock(&self.shared.record).started += 1;
        Ok(())
    }

    async fn cancel(&mut self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            lock(&self.shared.record).cancelled += 1;
        }
    }
}

struct MemoryDecodeOutput {
    kind: TrackKind,
    queue: VecDeque<Sample>,
    delivered: usize,
    fail_after: Option<usize>,
    started: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl DecodeOutput for MemoryDecodeOutput {
    async fn next_sample(&mut self) -> EngineResult<Option<Sample>> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngineError::invalid_state("decode session not started"));
        }
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if self.fail_after == Some(self.delivered) {
            return Err(EngineError::process(format!(
                "injected {} decode failure",
                self.kind
            )));
        }
        tokio::task::yield_now().await;
        let next = self.queue.pop_front();
        if next.is_some() {
            self.delivered += 1;
        }
        Ok(next)
    }
}

/// Failures a [`MemoryEncodeEngine`] injects.
#[derive(Debug, Clone, Default)]
pub struct EncodeFaults {
    pub fail_open: bool,
    pub fail_finish: bool,
    /// Fail the track's input after accepting this many samples.
    pub fail_append_after: Option<(TrackKind, usize)>,
}

/// What a [`MemoryEncodeEngine`] has been asked to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodeRecord {
    pub opened: usize,
    pub started: usize,
    pub finished: usize,
    pub cancelled: usize,
    pub network_optimized: bool,
    pub session_start: Option<MediaTime>,
    pub settings: Vec<EncodeSettings>,
    pub video_samples: usize,
    pub audio_samples: usize,
    /// Video presentation times in append order.
    pub video_pts: Vec<MediaTime>,
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct EncodeShared {
    faults: Mutex<EncodeFaults>,
    record: Mutex<EncodeRecord>,
    capacity: Mutex<Option<usize>>,
}

/// Encode engine writing [`MemoryFile`] outputs.
#[derive(Debug, Clone, Default)]
pub struct MemoryEncodeEngine {
    shared: Arc<EncodeShared>,
}

impl MemoryEncodeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_faults(&self, faults: EncodeFaults) {
        *lock(&self.shared.faults) = faults;
    }

    /// Samples an input takes before it must wait for the engine.
    pub fn set_input_capacity(&self, capacity: usize) {
        *lock(&self.shared.capacity) = Some(capacity.max(1));
    }

    pub fn record(&self) -> EncodeRecord {
        lock(&self.shared.record).clone()
    }
}

#[async_trait]
impl EncodeEngine for MemoryEncodeEngine {
    async fn open(
        &self,
        destination: &Path,
        container: ContainerFormat,
    ) -> EngineResult<Box<dyn EncodeSession>> {
        let faults = lock(&self.shared.faults).clone();
        if faults.fail_open {
            return Err(EngineError::unavailable("injected encode open failure"));
        }
        if destination.exists() {
            return Err(EngineError::invalid_state(format!(
                "{} already exists",
                destination.display()
            )));
        }
        lock(&self.shared.record).opened += 1;
        tracing::debug!(path = %destination.display(), ?container, "Opened memory encode session");

        Ok(Box::new(MemoryEncodeSession {
            destination: destination.to_path_buf(),
            faults,
            capacity: lock(&self.shared.capacity).unwrap_or(DEFAULT_INPUT_CAPACITY),
            shared: Arc::clone(&self.shared),
            state: Arc::new(Mutex::new(SessionState::default())),
            settings: Vec::new(),
            done: false,
        }))
    }
}

#[derive(Debug, Default)]
struct SessionState {
    started: bool,
    finished_inputs: Vec<TrackKind>,
    video_samples: usize,
    audio_samples: usize,
    end: MediaTime,
}

struct MemoryEncodeSession {
    destination: PathBuf,
    faults: EncodeFaults,
    capacity: usize,
    shared: Arc<EncodeShared>,
    state: Arc<Mutex<SessionState>>,
    settings: Vec<EncodeSettings>,
    done: bool,
}

impl MemoryEncodeSession {
    fn output_asset(&self, state: &SessionState) -> AssetInfo {
        let mut tracks = Vec::new();
        for settings in &self.settings {
            match settings {
                EncodeSettings::Video(video) => {
                    let mut track = TrackMetadata::video(
                        Size::new(video.width as f64, video.height as f64),
                        video.transform,
                        video.average_bitrate as f64,
                    );
                    track.index = tracks.len();
                    track.nominal_frame_rate = video.frame_rate;
                    track.duration = state.end;
                    tracks.push(track);
                }
                EncodeSettings::Audio(audio) if state.audio_samples > 0 => {
                    let mut track = TrackMetadata::audio(audio.bitrate as f64);
                    track.index = tracks.len();
                    track.preferred_transform = AffineTransform::IDENTITY;
                    track.duration = state.end;
                    tracks.push(track);
                }
                EncodeSettings::Audio(_) => {}
            }
        }
        AssetInfo::new(state.end, tracks)
    }
}

#[async_trait]
impl EncodeSession for MemoryEncodeSession {
    fn destination(&self) -> &Path {
        &self.destination
    }

    fn add_input(&mut self, settings: EncodeSettings) -> EngineResult<Box<dyn EncoderInput>> {
        if lock(&self.state).started {
            return Err(EngineError::invalid_state("inputs must be added before start"));
        }
        let kind = settings.kind();
        lock(&self.shared.record).settings.push(settings.clone());
        self.settings.push(settings);

        let fail_after = match self.faults.fail_append_after {
            Some((k, n)) if k == kind => Some(n),
            _ => None,
        };
        Ok(Box::new(MemoryEncoderInput {
            kind,
            capacity: self.capacity,
            buffered: 0,
            accepted: 0,
            fail_after,
            finished: false,
            state: Arc::clone(&self.state),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn set_network_optimized(&mut self, enabled: bool) {
        lock(&self.shared.record).network_optimized = enabled;
    }

    async fn start(&mut self) -> EngineResult<()> {
        if self.settings.is_empty() {
            return Err(EngineError::invalid_state("no encoder inputs"));
        }
        lock(&self.state).started = true;
        lock(&self.shared.record).started += 1;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        lock(&self.shared.record).session_start = Some(at);
    }

    async fn finish(&mut self) -> EngineResult<PathBuf> {
        if self.faults.fail_finish {
            return Err(EngineError::process("injected finish failure"));
        }
        let file = {
            let state = lock(&self.state);
            if !state.started {
                return Err(EngineError::invalid_state("encode session not started"));
            }
            if state.finished_inputs.len() < self.settings.len() {
                return Err(EngineError::invalid_state("inputs still open"));
            }
            MemoryFile {
                asset: self.output_asset(&state),
                video_samples: state.video_samples,
                audio_samples: state.audio_samples,
            }
        };
        file.write(&self.destination).await?;
        self.done = true;

        let mut record = lock(&self.shared.record);
        record.finished += 1;
        record.outputs.push(self.destination.clone());
        Ok(self.destination.clone())
    }

    async fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        lock(&self.shared.record).cancelled += 1;
        let _ = tokio::fs::remove_file(&self.destination).await;
    }
}

struct MemoryEncoderInput {
    kind: TrackKind,
    capacity: usize,
    buffered: usize,
    accepted: usize,
    fail_after: Option<usize>,
    finished: bool,
    state: Arc<Mutex<SessionState>>,
    shared: Arc<EncodeShared>,
}

#[async_trait]
impl EncoderInput for MemoryEncoderInput {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn is_ready(&self) -> bool {
        !self.finished && self.buffered < self.capacity
    }

    async fn ready(&mut self) {
        if self.buffered >= self.capacity {
            // The engine drains its buffer off the caller's task.
            tokio::task::yield_now().await;
            self.buffered = 0;
        }
    }

    async fn append(&mut self, sample: Sample) -> EngineResult<()> {
        if self.finished {
            return Err(EngineError::invalid_state("append after mark_finished"));
        }
        if sample.kind != self.kind {
            return Err(EngineError::invalid_state(format!(
                "{} sample appended to {} input",
                sample.kind, self.kind
            )));
        }
        if self.fail_after == Some(self.accepted) {
            return Err(EngineError::process(format!(
                "injected {} append failure",
                self.kind
            )));
        }

        {
            let mut state = lock(&self.state);
            if !state.started {
                return Err(EngineError::invalid_state("encode session not started"));
            }
            let end = MediaTime::new(
                sample.pts.rescale(sample.duration.timescale).value + sample.duration.value,
                sample.duration.timescale,
            );
            state.end = state.end.max(end);
            match self.kind {
                TrackKind::Video => state.video_samples += 1,
                TrackKind::Audio => state.audio_samples += 1,
            }
        }

        let mut record = lock(&self.shared.record);
        match self.kind {
            TrackKind::Video => {
                record.video_samples += 1;
                record.video_pts.push(sample.pts);
            }
            TrackKind::Audio => record.audio_samples += 1,
        }
        self.buffered += 1;
        self.accepted += 1;
        Ok(())
    }

    async fn mark_finished(&mut self) -> EngineResult<()> {
        if !self.finished {
            self.finished = true;
            lock(&self.state).finished_inputs.push(self.kind);
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
