//! In-memory export engine for tests and dry runs.
//!
//! Exports write the same JSON media description the in-memory decode and
//! encode engines use, so an exported file can be fed back into them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use videokit_common::error::{EngineError, EngineResult};
use videokit_common::time::TimeRange;
use videokit_media_model::{
    AffineTransform, AssetInfo, Quality, Size, TrackKind, VideoComposition,
};

use crate::export::{ExportEngine, ExportProgress, ExportRequest, ExportSession, ExportStage};
use crate::filter::composition_filters;

const DEFAULT_VIDEO_SAMPLES: usize = 30;
const DEFAULT_AUDIO_SAMPLES: usize = 43;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MediaDescription {
    asset: AssetInfo,
    #[serde(default)]
    video_samples: usize,
    #[serde(default)]
    audio_samples: usize,
}

/// Failures a [`MemoryExporter`] injects.
#[derive(Debug, Clone, Default)]
pub struct ExportFaults {
    pub fail_prepare: bool,
    pub fail_export: bool,
}

/// One export the engine performed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportCall {
    pub source: PathBuf,
    pub quality: Quality,
    pub composition: VideoComposition,
    pub time_range: Option<TimeRange>,
    pub output: PathBuf,
}

/// What a [`MemoryExporter`] has been asked to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportRecord {
    pub prepared: Vec<PathBuf>,
    pub exports: Vec<ExportCall>,
}

#[derive(Debug, Default)]
struct Shared {
    sources: Mutex<HashMap<PathBuf, AssetInfo>>,
    faults: Mutex<ExportFaults>,
    record: Mutex<ExportRecord>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Export engine that renders compositions into JSON media descriptions.
#[derive(Debug, Clone, Default)]
pub struct MemoryExporter {
    shared: Arc<Shared>,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source that exists only in memory.
    pub fn insert(&self, path: impl Into<PathBuf>, asset: AssetInfo) {
        lock(&self.shared.sources).insert(path.into(), asset);
    }

    pub fn set_faults(&self, faults: ExportFaults) {
        *lock(&self.shared.faults) = faults;
    }

    pub fn record(&self) -> ExportRecord {
        lock(&self.shared.record).clone()
    }

    async fn lookup(&self, source: &Path) -> EngineResult<MediaDescription> {
        let registered = lock(&self.shared.sources).get(source).cloned();
        if let Some(asset) = registered {
            return Ok(MediaDescription {
                asset,
                video_samples: DEFAULT_VIDEO_SAMPLES,
                audio_samples: DEFAULT_AUDIO_SAMPLES,
            });
        }
        let bytes = tokio::fs::read(source).await.map_err(|e| {
            EngineError::unsupported(format!("cannot open {}: {e}", source.display()))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            EngineError::unsupported(format!("{} is not a memory media file: {e}", source.display()))
        })
    }
}

#[async_trait]
impl ExportEngine for MemoryExporter {
    async fn prepare(
        &self,
        source: &Path,
        quality: &Quality,
    ) -> EngineResult<Box<dyn ExportSession>> {
        if lock(&self.shared.faults).fail_prepare {
            return Err(EngineError::unavailable("injected export prepare failure"));
        }
        let media = self.lookup(source).await?;
        if !media.asset.has_track(TrackKind::Video) {
            return Err(EngineError::unsupported("source has no video track"));
        }
        lock(&self.shared.record).prepared.push(source.to_path_buf());

        Ok(Box::new(MemoryExportSession {
            source: source.to_path_buf(),
            quality: *quality,
            media,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct MemoryExportSession {
    source: PathBuf,
    quality: Quality,
    media: MediaDescription,
    shared: Arc<Shared>,
}

impl MemoryExportSession {
    /// The asset an export of this request would produce.
    fn rendered(&self, request: &ExportRequest) -> EngineResult<MediaDescription> {
        let source = &self.media.asset;
        let video = source
            .first_track(TrackKind::Video)
            .ok_or_else(|| EngineError::unsupported("source has no video track"))?;

        let duration = match &request.time_range {
            Some(range) => range.duration,
            None => source.duration,
        };
        let fraction = if source.duration.seconds() > 0.0 {
            (duration.seconds() / source.duration.seconds()).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let scaled = |n: usize| ((n as f64) * fraction).round() as usize;

        let mut tracks = Vec::new();
        let mut out_video = video.clone();
        out_video.duration = duration;
        let mut video_samples = scaled(self.media.video_samples);
        if !self.quality.is_passthrough() {
            let plan = composition_filters(&request.composition, video.natural_size, &self.quality)?;
            out_video.natural_size = Size::new(plan.output_size.0 as f64, plan.output_size.1 as f64);
            out_video.preferred_transform = AffineTransform::IDENTITY;
            if let Some(bitrate) = self.quality.video_bitrate() {
                out_video.estimated_data_rate = out_video.estimated_data_rate.min(bitrate as f64);
            }
            if let Some(fps) = request.composition.frame_rate() {
                if fps < out_video.nominal_frame_rate {
                    out_video.nominal_frame_rate = fps;
                    video_samples = (fps * duration.seconds()).round() as usize;
                }
            }
        }
        tracks.push(out_video);

        if let Some(audio) = source.first_track(TrackKind::Audio) {
            let mut out_audio = audio.clone();
            out_audio.duration = duration;
            tracks.push(out_audio);
        }

        Ok(MediaDescription {
            asset: AssetInfo::new(duration, tracks),
            video_samples: video_samples.max(1),
            audio_samples: if source.has_track(TrackKind::Audio) {
                scaled(self.media.audio_samples).max(1)
            } else {
                0
            },
        })
    }
}

#[async_trait]
impl ExportSession for MemoryExportSession {
    async fn export(&mut self, request: ExportRequest) -> EngineResult<PathBuf> {
        lock(&self.shared.record).exports.push(ExportCall {
            source: self.source.clone(),
            quality: self.quality,
            composition: request.composition.clone(),
            time_range: request.time_range,
            output: request.output.clone(),
        });
        if lock(&self.shared.faults).fail_export {
            return Err(EngineError::process("injected export failure"));
        }

        let rendered = self.rendered(&request)?;
        let bytes = serde_json::to_vec_pretty(&rendered)
            .map_err(|e| EngineError::process(format!("serialize export: {e}")))?;
        if let Some(parent) = request.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&request.output, bytes).await?;

        if let Some(cb) = &request.progress {
            cb(ExportProgress {
                progress: 1.0,
                eta_secs: 0.0,
                stage: ExportStage::Complete,
            });
        }
        tracing::debug!(output = %request.output.display(), "Memory export complete");
        Ok(request.output)
    }
}
