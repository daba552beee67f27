//! VideoKit
//!
//! Corrects the orientation of a captured video, optionally crops it,
//! limits its frame rate and length, and bounds its video bitrate,
//! producing a new MP4 file.
//!
//! ```no_run
//! # async fn run() -> videokit::VideoKitResult<()> {
//! use videokit::{MutateConfig, Quality, VideoKit};
//!
//! let kit = VideoKit::from_app_config(&videokit::AppConfig::load(), Default::default());
//! let config = MutateConfig::new(Quality::Preset1280x720)
//!     .with_limit_fps(30)
//!     .with_limit_bitrate(2_000_000);
//! let output = kit.mutate("clip.mov", config).await?;
//! println!("wrote {}", output.display());
//! # Ok(())
//! # }
//! ```
//!
//! Every mutate resolves exactly once: with the output path, or with a
//! [`VideoKitError`] whose [`kind`](VideoKitError::kind) names the step
//! that failed.

mod completion;
pub mod orchestrator;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use tokio::sync::oneshot;

pub use videokit_common::config::AppConfig;
pub use videokit_common::error::{ErrorKind, VideoKitError, VideoKitResult};
pub use videokit_common::paths::{DocumentsPaths, PathProvider, TempDirPaths};
pub use videokit_media_model::{
    MutateConfig, Orientation, PipelineOrder, Quality, Rect, Size, TrackKind,
};
pub use videokit_render_engine::{ExportEngine, ExportProgress, FfmpegExporter, ProgressCallback};
pub use videokit_transcode_engine::{FfprobeMetadata, MetadataProvider, Transcoder};

use videokit_common::paths::provider_for;
use videokit_processing_core::orientation;
use videokit_transcode_engine::{
    FfmpegDecodeEngine, FfmpegEncodeEngine, FfmpegTranscoder, SampleCopyTranscoder,
};

use crate::completion::CompletionQueue;
pub use crate::orchestrator::Orchestrator;

/// Which transcoder re-encodes over-ceiling sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscodeStrategy {
    /// Decode to raw samples and copy them into a fresh encode session.
    #[default]
    SampleCopy,
    /// Hand the whole re-encode to one ffmpeg run.
    Direct,
}

impl fmt::Display for TranscodeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeStrategy::SampleCopy => f.write_str("sample-copy"),
            TranscodeStrategy::Direct => f.write_str("direct"),
        }
    }
}

impl FromStr for TranscodeStrategy {
    type Err = VideoKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "sample-copy" => Ok(TranscodeStrategy::SampleCopy),
            "direct" => Ok(TranscodeStrategy::Direct),
            _ => Err(VideoKitError::config(format!(
                "Unknown transcode strategy '{s}'. Use: sample-copy, direct"
            ))),
        }
    }
}

/// Caller surface for mutate runs.
///
/// The async, callback and blocking forms all resolve through the same
/// one-shot channel fed by a spawned orchestrator run.
pub struct VideoKit {
    orchestrator: Arc<Orchestrator>,
    completions: OnceLock<CompletionQueue>,
}

impl VideoKit {
    pub fn builder() -> VideoKitBuilder {
        VideoKitBuilder::default()
    }

    /// FFmpeg-backed engines configured from `config`.
    pub fn from_app_config(config: &AppConfig, strategy: TranscodeStrategy) -> Self {
        let paths: Arc<dyn PathProvider> = Arc::from(provider_for(config));
        let transcoder: Arc<dyn Transcoder> = match strategy {
            TranscodeStrategy::SampleCopy => Arc::new(SampleCopyTranscoder::new(
                FfmpegDecodeEngine::from_config(&config.engine),
                FfmpegEncodeEngine::from_config(&config.engine),
                Arc::clone(&paths),
            )),
            TranscodeStrategy::Direct => Arc::new(FfmpegTranscoder::from_config(
                &config.engine,
                Arc::clone(&paths),
            )),
        };

        Self::from_orchestrator(Orchestrator {
            metadata: Arc::new(FfprobeMetadata::from_config(&config.engine)),
            transcoder,
            exporter: Arc::new(FfmpegExporter::from_config(&config.engine)),
            paths,
            cleanup_intermediates: config.output.cleanup_intermediates,
            progress: None,
        })
    }

    /// Report export progress to `callback`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        Arc::make_mut(&mut self.orchestrator).progress = Some(callback);
        self
    }

    fn from_orchestrator(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            completions: OnceLock::new(),
        }
    }

    fn launch(
        &self,
        source: &Path,
        config: MutateConfig,
    ) -> oneshot::Receiver<VideoKitResult<PathBuf>> {
        let (tx, rx) = oneshot::channel();
        let orchestrator = Arc::clone(&self.orchestrator);
        let source = source.to_path_buf();
        tokio::spawn(async move {
            let result = orchestrator.run(&source, &config).await;
            match &result {
                Ok(output) => tracing::info!(
                    path = %source.display(),
                    output = %output.display(),
                    "Mutate complete"
                ),
                Err(err) => tracing::error!(
                    path = %source.display(),
                    kind = ?err.kind(),
                    error = %err,
                    "Mutate failed"
                ),
            }
            if tx.send(result).is_err() {
                tracing::warn!("Mutate result dropped: caller went away");
            }
        });
        rx
    }

    /// Mutate `source` and wait for the result.
    pub async fn mutate(
        &self,
        source: impl AsRef<Path>,
        config: MutateConfig,
    ) -> VideoKitResult<PathBuf> {
        self.launch(source.as_ref(), config)
            .await
            .map_err(|_| VideoKitError::engine("mutate task ended without a result"))?
    }

    /// Mutate `source` and hand the result to `callback`.
    ///
    /// Callbacks of one `VideoKit` run one at a time, in completion order,
    /// on a single dedicated task. Must be called inside a tokio runtime.
    pub fn mutate_with_callback<F>(&self, source: impl AsRef<Path>, config: MutateConfig, callback: F)
    where
        F: FnOnce(VideoKitResult<PathBuf>) + Send + 'static,
    {
        let rx = self.launch(source.as_ref(), config);
        let queue = self.completions.get_or_init(CompletionQueue::spawn).clone();
        tokio::spawn(async move {
            let result = rx
                .await
                .unwrap_or_else(|_| Err(VideoKitError::engine("mutate task ended without a result")));
            queue.deliver(Box::new(move || callback(result)));
        });
    }

    /// Mutate `source` on a private runtime, blocking the calling thread.
    ///
    /// Must not be called from inside an async context.
    pub fn mutate_blocking(
        &self,
        source: impl AsRef<Path>,
        config: MutateConfig,
    ) -> VideoKitResult<PathBuf> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        runtime.block_on(self.mutate(source, config))
    }

    /// Displayed (upright) size of the first video track of `source`.
    pub async fn render_size(&self, source: impl AsRef<Path>) -> VideoKitResult<Size> {
        let source = source.as_ref();
        let asset = self.load(source).await?;
        let video = asset
            .first_track(TrackKind::Video)
            .ok_or(VideoKitError::AssetTrackInitFailed)?;
        Ok(video.display_size())
    }

    /// Capture orientation of the first video track of `source`.
    pub async fn orientation(&self, source: impl AsRef<Path>) -> VideoKitResult<Orientation> {
        let source = source.as_ref();
        let asset = self.load(source).await?;
        let video = asset
            .first_track(TrackKind::Video)
            .ok_or(VideoKitError::AssetTrackInitFailed)?;
        Ok(orientation::resolve_track(video))
    }

    async fn load(&self, source: &Path) -> VideoKitResult<videokit_media_model::AssetInfo> {
        self.orchestrator.load(source).await
    }
}

/// Assembles a [`VideoKit`] from explicit collaborators.
pub struct VideoKitBuilder {
    metadata: Option<Arc<dyn MetadataProvider>>,
    transcoder: Option<Arc<dyn Transcoder>>,
    exporter: Option<Arc<dyn ExportEngine>>,
    paths: Option<Arc<dyn PathProvider>>,
    cleanup_intermediates: bool,
    progress: Option<ProgressCallback>,
}

impl Default for VideoKitBuilder {
    fn default() -> Self {
        Self {
            metadata: None,
            transcoder: None,
            exporter: None,
            paths: None,
            cleanup_intermediates: true,
            progress: None,
        }
    }
}

impl VideoKitBuilder {
    pub fn metadata(mut self, provider: impl MetadataProvider + 'static) -> Self {
        self.metadata = Some(Arc::new(provider));
        self
    }

    pub fn transcoder(mut self, transcoder: impl Transcoder + 'static) -> Self {
        self.transcoder = Some(Arc::new(transcoder));
        self
    }

    pub fn exporter(mut self, exporter: impl ExportEngine + 'static) -> Self {
        self.exporter = Some(Arc::new(exporter));
        self
    }

    /// Where geometry exports are written. Defaults to the system temporary
    /// directory.
    pub fn paths(mut self, paths: Arc<dyn PathProvider>) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn cleanup_intermediates(mut self, enabled: bool) -> Self {
        self.cleanup_intermediates = enabled;
        self
    }

    /// Export progress reports.
    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn build(self) -> VideoKitResult<VideoKit> {
        let missing = |what: &str| VideoKitError::config(format!("VideoKit needs a {what}"));
        Ok(VideoKit::from_orchestrator(Orchestrator {
            metadata: self.metadata.ok_or_else(|| missing("metadata provider"))?,
            transcoder: self.transcoder.ok_or_else(|| missing("transcoder"))?,
            exporter: self.exporter.ok_or_else(|| missing("export engine"))?,
            paths: self.paths.unwrap_or_else(|| Arc::new(TempDirPaths::new())),
            cleanup_intermediates: self.cleanup_intermediates,
            progress: self.progress,
        }))
    }
}
