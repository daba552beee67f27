//! Caller-facing mutate settings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

/// Output quality profile handed to the export engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[serde(rename = "640x480")]
    Preset640x480,
    #[serde(rename = "960x540")]
    Preset960x540,
    #[serde(rename = "1280x720")]
    Preset1280x720,
    #[serde(rename = "1920x1080")]
    Preset1920x1080,
    #[serde(rename = "3840x2160")]
    Preset3840x2160,
    /// Re-wrap the source streams without re-encoding.
    Passthrough,
    /// Explicit frame rate, bitrate, and scale factor.
    Custom {
        frame_rate: Option<u32>,
        bitrate: Option<u64>,
        scale: f64,
    },
}

impl Quality {
    /// Fixed presets and their bounding boxes / video bitrates.
    const PRESETS: [(Quality, u32, u32, u64); 5] = [
        (Quality::Preset640x480, 640, 480, 1_500_000),
        (Quality::Preset960x540, 960, 540, 2_500_000),
        (Quality::Preset1280x720, 1280, 720, 5_000_000),
        (Quality::Preset1920x1080, 1920, 1080, 8_000_000),
        (Quality::Preset3840x2160, 3840, 2160, 35_000_000),
    ];

    /// Landscape bounding box for fixed presets. Portrait output is fitted
    /// into the transposed box.
    pub fn bounding_box(&self) -> Option<(u32, u32)> {
        Self::PRESETS
            .iter()
            .find(|(q, ..)| q == self)
            .map(|(_, w, h, _)| (*w, *h))
    }

    /// Video bitrate in bits per second, when the profile fixes one.
    pub fn video_bitrate(&self) -> Option<u64> {
        match self {
            Quality::Custom { bitrate, .. } => *bitrate,
            _ => Self::PRESETS
                .iter()
                .find(|(q, ..)| q == self)
                .map(|(_, _, _, bitrate)| *bitrate),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, Quality::Passthrough)
    }

    pub fn name(&self) -> String {
        match self {
            Quality::Preset640x480 => "640x480".to_string(),
            Quality::Preset960x540 => "960x540".to_string(),
            Quality::Preset1280x720 => "1280x720".to_string(),
            Quality::Preset1920x1080 => "1920x1080".to_string(),
            Quality::Preset3840x2160 => "3840x2160".to_string(),
            Quality::Passthrough => "passthrough".to_string(),
            Quality::Custom {
                frame_rate,
                bitrate,
                scale,
            } => format!(
                "custom(fps={},bitrate={},scale={scale})",
                frame_rate.map_or("source".to_string(), |f| f.to_string()),
                bitrate.map_or("source".to_string(), |b| b.to_string()),
            ),
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Preset1920x1080
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Quality {
    type Err = SettingsError;

    /// Parses `640x480`, `960x540`, `1280x720`, `1920x1080`, `3840x2160`,
    /// `passthrough`, or `custom:<fps>:<bitrate>:<scale>` where `fps` and
    /// `bitrate` may be `-` to keep the source value.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "640x480" | "480p" => Ok(Quality::Preset640x480),
            "960x540" | "540p" => Ok(Quality::Preset960x540),
            "1280x720" | "720p" => Ok(Quality::Preset1280x720),
            "1920x1080" | "1080p" => Ok(Quality::Preset1920x1080),
            "3840x2160" | "2160p" | "4k" => Ok(Quality::Preset3840x2160),
            "passthrough" => Ok(Quality::Passthrough),
            other => {
                let Some(rest) = other.strip_prefix("custom:") else {
                    return Err(SettingsError::UnknownQuality(s.to_string()));
                };
                let parts: Vec<&str> = rest.split(':').collect();
                let [fps, bitrate, scale] = parts.as_slice() else {
                    return Err(SettingsError::UnknownQuality(s.to_string()));
                };
                let bad = |_| SettingsError::UnknownQuality(s.to_string());
                let frame_rate = match *fps {
                    "-" => None,
                    v => Some(v.parse::<u32>().map_err(bad)?),
                };
                let bitrate = match *bitrate {
                    "-" => None,
                    v => Some(v.parse::<u64>().map_err(bad)?),
                };
                let scale = scale
                    .parse::<f64>()
                    .map_err(|_| SettingsError::UnknownQuality(s.to_string()))?;
                Ok(Quality::Custom {
                    frame_rate,
                    bitrate,
                    scale,
                })
            }
        }
    }
}

/// Order of the geometry export and the bitrate transcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOrder {
    /// Re-encode at the target bitrate, then export geometry from the
    /// transcoded file.
    #[default]
    TranscodeFirst,
    /// Export geometry, then re-encode the exported file.
    GeometryFirst,
}

impl FromStr for PipelineOrder {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "transcode_first" => Ok(PipelineOrder::TranscodeFirst),
            "geometry_first" => Ok(PipelineOrder::GeometryFirst),
            _ => Err(SettingsError::UnknownOrder(s.to_string())),
        }
    }
}

/// Per-invocation mutate configuration. Read-only once constructed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutateConfig {
    pub quality: Quality,

    /// Maximum output length in seconds.
    pub limit_length: Option<f64>,

    /// Crop rectangle in displayed (upright) pixel coordinates.
    pub crop_rect: Option<Rect>,

    /// Maximum output frame rate.
    pub limit_fps: Option<u32>,

    /// Video bitrate ceiling in bits per second.
    pub limit_bitrate: Option<u64>,

    pub order: PipelineOrder,
}

impl MutateConfig {
    pub fn new(quality: Quality) -> Self {
        Self {
            quality,
            ..Self::default()
        }
    }

    pub fn with_limit_length(mut self, secs: f64) -> Self {
        self.limit_length = Some(secs);
        self
    }

    pub fn with_crop_rect(mut self, rect: Rect) -> Self {
        self.crop_rect = Some(rect);
        self
    }

    pub fn with_limit_fps(mut self, fps: u32) -> Self {
        self.limit_fps = Some(fps);
        self
    }

    pub fn with_limit_bitrate(mut self, bits_per_sec: u64) -> Self {
        self.limit_bitrate = Some(bits_per_sec);
        self
    }

    pub fn with_order(mut self, order: PipelineOrder) -> Self {
        self.order = order;
        self
    }

    /// Reject values no export could honor.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(len) = self.limit_length {
            if !(len.is_finite() && len > 0.0) {
                return Err(SettingsError::InvalidLimit(format!(
                    "limit_length must be positive, got {len}"
                )));
            }
        }
        if let Some(fps) = self.limit_fps {
            if fps == 0 || i32::try_from(fps).is_err() {
                return Err(SettingsError::InvalidLimit(format!(
                    "limit_fps must be positive and at most {}, got {fps}",
                    i32::MAX
                )));
            }
        }
        if self.limit_bitrate == Some(0) {
            return Err(SettingsError::InvalidLimit(
                "limit_bitrate must be positive".to_string(),
            ));
        }
        if let Some(rect) = &self.crop_rect {
            if !rect.size.is_positive() || rect.origin.x < 0.0 || rect.origin.y < 0.0 {
                return Err(SettingsError::InvalidCrop(format!("{rect:?}")));
            }
        }
        if let Quality::Custom { scale, .. } = self.quality {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(SettingsError::InvalidLimit(format!(
                    "custom scale must be positive, got {scale}"
                )));
            }
        }
        Ok(())
    }
}

/// Parse a crop rectangle from `x,y,w,h`.
pub fn parse_crop_rect(s: &str) -> Result<Rect, SettingsError> {
    let values: Vec<f64> = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| SettingsError::InvalidCrop(s.to_string()))?;
    match values.as_slice() {
        [x, y, w, h] => Ok(Rect::new(*x, *y, *w, *h)),
        _ => Err(SettingsError::InvalidCrop(s.to_string())),
    }
}

/// Settings validation errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Unknown quality '{0}'. Use: 640x480, 960x540, 1280x720, 1920x1080, 3840x2160, passthrough, custom:<fps|->:<bitrate|->:<scale>")]
    UnknownQuality(String),

    #[error("Unknown pipeline order '{0}'. Use: transcode-first, geometry-first")]
    UnknownOrder(String),

    #[error("Invalid crop rectangle: {0}")]
    InvalidCrop(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),
}
