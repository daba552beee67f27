//! Mutate orchestration: geometry export and bitrate transcode.
//!
//! A mutate run loads the source's metadata, then runs up to two steps in
//! the configured order:
//!
//! - **geometry export**: orientation correction, crop, frame-rate limit
//!   and trim, rendered by the export engine at the requested quality;
//! - **transcode**: re-encode at the target bitrate, only when a bitrate
//!   ceiling is set and the source exceeds it.
//!
//! The output of the first step is an intermediate; it is removed once the
//! second step ends, whatever its result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use videokit_common::error::{VideoKitError, VideoKitResult};
use videokit_common::paths::{remove_quietly, PathProvider};
use videokit_media_model::{AssetInfo, MutateConfig, PipelineOrder, TrackKind};
use videokit_processing_core::{bitrate, composition, geometry, orientation};
use videokit_render_engine::{ExportEngine, ExportRequest, ProgressCallback};
use videokit_transcode_engine::{MetadataProvider, Transcoder};

/// Collaborators and policy for mutate runs.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) metadata: Arc<dyn MetadataProvider>,
    pub(crate) transcoder: Arc<dyn Transcoder>,
    pub(crate) exporter: Arc<dyn ExportEngine>,
    pub(crate) paths: Arc<dyn PathProvider>,
    pub(crate) cleanup_intermediates: bool,
    pub(crate) progress: Option<ProgressCallback>,
}

impl Orchestrator {
    /// Run one mutate of `source`. Returns the final output path.
    pub async fn run(&self, source: &Path, config: &MutateConfig) -> VideoKitResult<PathBuf> {
        config
            .validate()
            .map_err(|e| VideoKitError::config(e.to_string()))?;

        let asset = self.load(source).await?;
        let video = asset
            .first_track(TrackKind::Video)
            .ok_or(VideoKitError::AssetTrackInitFailed)?;

        let source_rate = video.estimated_data_rate;
        if !bitrate::exceeds_ceiling(config.limit_bitrate, source_rate) {
            tracing::info!(
                path = %source.display(),
                source_bitrate = source_rate,
                "Bitrate within limits; exporting geometry only"
            );
            return self.export_geometry(source, asset, config).await;
        }

        let target = bitrate::target_bitrate(config.limit_bitrate, source_rate);
        tracing::info!(
            path = %source.display(),
            source_bitrate = source_rate,
            bitrate = target,
            order = ?config.order,
            "Bitrate ceiling exceeded; transcoding"
        );

        match config.order {
            PipelineOrder::TranscodeFirst => {
                let intermediate = self.transcoder.transcode(source, target).await?;
                let result = match self.load(&intermediate).await {
                    Ok(asset) => self.export_geometry(&intermediate, asset, config).await,
                    Err(err) => Err(err),
                };
                self.discard_intermediate(&intermediate);
                result
            }
            PipelineOrder::GeometryFirst => {
                let exported = self.export_geometry(source, asset, config).await?;
                let result = self.transcoder.transcode(&exported, target).await;
                self.discard_intermediate(&exported);
                result
            }
        }
    }

    pub(crate) async fn load(&self, source: &Path) -> VideoKitResult<AssetInfo> {
        self.metadata.load(source).await.map_err(|e| {
            if source.exists() {
                VideoKitError::engine(format!("metadata load failed: {e}"))
            } else {
                tracing::debug!(path = %source.display(), error = %e, "Metadata load failed");
                VideoKitError::FileNotFound {
                    path: source.to_path_buf(),
                }
            }
        })
    }

    /// Render the orientation-corrected, cropped, rate-limited and trimmed
    /// form of `input` to a fresh output.
    async fn export_geometry(
        &self,
        input: &Path,
        asset: AssetInfo,
        config: &MutateConfig,
    ) -> VideoKitResult<PathBuf> {
        let video = asset
            .first_track(TrackKind::Video)
            .ok_or(VideoKitError::AssetTrackInitFailed)?;

        let orientation = orientation::resolve_track(video);
        let plan = geometry::plan_for_track(video, orientation, config.crop_rect.as_ref());
        let (composition, time_range) =
            composition::build_for_config(&plan, video.index, config, asset.duration);

        let mut session = self
            .exporter
            .prepare(input, &config.quality)
            .await
            .map_err(|e| VideoKitError::export_init(e.to_string()))?;

        let output = self.paths.unique_output()?;
        tracing::info!(
            path = %input.display(),
            output = %output.display(),
            %orientation,
            render_width = plan.render_size.width,
            render_height = plan.render_size.height,
            quality = %config.quality,
            exporter = self.exporter.name(),
            "Exporting geometry"
        );

        let mut request = ExportRequest::new(composition, &output).with_time_range(time_range);
        if let Some(progress) = &self.progress {
            request = request.with_progress(Arc::clone(progress));
        }

        match session.export(request).await {
            Ok(path) => Ok(path),
            Err(err) => {
                remove_quietly(&output);
                Err(VideoKitError::engine(format!("export failed: {err}")))
            }
        }
    }

    fn discard_intermediate(&self, path: &Path) {
        if self.cleanup_intermediates {
            tracing::debug!(path = %path.display(), "Removing intermediate");
            remove_quietly(path);
        } else {
            tracing::info!(path = %path.display(), "Keeping intermediate");
        }
    }
}
