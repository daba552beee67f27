//! Composition building: geometry plus frame-rate and trim limits.

use videokit_common::time::{MediaTime, TimeRange, MILLISECOND_TIMESCALE};
use videokit_media_model::{
    CompositionInstruction, LayerInstruction, MutateConfig, VideoComposition,
};

use crate::geometry::GeometryPlan;

/// Build the single-instruction composition for one video track.
///
/// The transform is constant over the whole asset: one instruction covers
/// `[0, asset_duration)` with the layer transform set at time zero.
pub fn build(
    geometry: &GeometryPlan,
    track_index: usize,
    limit_fps: Option<u32>,
    asset_duration: MediaTime,
) -> VideoComposition {
    let frame_duration = limit_fps
        .and_then(|fps| i32::try_from(fps).ok())
        .filter(|fps| *fps > 0)
        .map(|fps| MediaTime::new(1, fps));

    let instruction = CompositionInstruction {
        time_range: TimeRange::new(MediaTime::ZERO, asset_duration),
        layers: vec![LayerInstruction {
            track_index,
            transform: geometry.transform,
            at: MediaTime::ZERO,
        }],
    };

    VideoComposition {
        render_size: geometry.render_size,
        frame_duration,
        instructions: vec![instruction],
    }
}

/// Output time range for a length limit.
///
/// `None` without a limit (export everything). With a limit, the range is
/// `[0, limit]` when the asset is longer than the limit, otherwise
/// `[0, asset duration]`; both at millisecond precision.
pub fn trim_range(limit_length: Option<f64>, asset_duration: MediaTime) -> Option<TimeRange> {
    let limit = limit_length?;
    let start = MediaTime::new(0, MILLISECOND_TIMESCALE);
    let end = if asset_duration.seconds() > limit {
        MediaTime::from_seconds(limit, MILLISECOND_TIMESCALE)
    } else {
        MediaTime::from_seconds(asset_duration.seconds(), MILLISECOND_TIMESCALE)
    };
    Some(TimeRange::from_start_end(start, end))
}

/// Composition and trim range for a mutate configuration.
pub fn build_for_config(
    geometry: &GeometryPlan,
    track_index: usize,
    config: &MutateConfig,
    asset_duration: MediaTime,
) -> (VideoComposition, Option<TimeRange>) {
    (
        build(geometry, track_index, config.limit_fps, asset_duration),
        trim_range(config.limit_length, asset_duration),
    )
}
