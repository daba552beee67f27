//! Video composition description handed to an export engine.

use serde::{Deserialize, Serialize};

use videokit_common::time::{MediaTime, TimeRange};

use crate::geometry::{AffineTransform, Size};

/// A layer transform that takes effect at `at` and holds until the end of
/// its instruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerInstruction {
    /// Container index of the video track this layer draws.
    pub track_index: usize,
    pub transform: AffineTransform,
    pub at: MediaTime,
}

/// One time range of the output and the layers drawn during it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionInstruction {
    pub time_range: TimeRange,
    pub layers: Vec<LayerInstruction>,
}

/// How the export engine should draw the source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoComposition {
    /// Output frame size.
    pub render_size: Size,

    /// Output frame duration; `None` keeps the source's frame timing.
    pub frame_duration: Option<MediaTime>,

    pub instructions: Vec<CompositionInstruction>,
}

impl VideoComposition {
    /// The transform of the first layer, which is the only one a
    /// single-track composition carries.
    pub fn primary_transform(&self) -> AffineTransform {
        self.instructions
            .first()
            .and_then(|i| i.layers.first())
            .map(|l| l.transform)
            .unwrap_or_default()
    }

    /// Output frame rate implied by `frame_duration`.
    pub fn frame_rate(&self) -> Option<f64> {
        self.frame_duration
            .filter(|d| d.value > 0)
            .map(|d| 1.0 / d.seconds())
    }
}
