//! Track and asset metadata, as reported by a metadata provider.

use serde::{Deserialize, Serialize};

use videokit_common::time::MediaTime;
pub use videokit_common::track::TrackKind;

use crate::geometry::{AffineTransform, Size};

/// Read-only description of one track in a source asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Container track index.
    pub index: usize,

    pub kind: TrackKind,

    /// Coded frame size before the stored transform is applied.
    /// Zero for audio tracks.
    pub natural_size: Size,

    /// Transform the capture device stored for display.
    pub preferred_transform: AffineTransform,

    /// Estimated data rate in bits per second.
    pub estimated_data_rate: f64,

    /// Nominal frame rate (video only; zero when unknown).
    pub nominal_frame_rate: f64,

    pub duration: MediaTime,
}

impl TrackMetadata {
    /// A video track with the given size, transform, and data rate.
    pub fn video(natural_size: Size, preferred_transform: AffineTransform, data_rate: f64) -> Self {
        Self {
            index: 0,
            kind: TrackKind::Video,
            natural_size,
            preferred_transform,
            estimated_data_rate: data_rate,
            nominal_frame_rate: 30.0,
            duration: MediaTime::ZERO,
        }
    }

    /// An audio track with the given data rate.
    pub fn audio(data_rate: f64) -> Self {
        Self {
            index: 1,
            kind: TrackKind::Audio,
            natural_size: Size::ZERO,
            preferred_transform: AffineTransform::IDENTITY,
            estimated_data_rate: data_rate,
            nominal_frame_rate: 0.0,
            duration: MediaTime::ZERO,
        }
    }

    /// Display size: natural size through the stored transform, as
    /// absolute values.
    pub fn display_size(&self) -> Size {
        self.preferred_transform
            .apply_to_size(self.natural_size)
            .abs()
    }
}

/// A source asset: duration plus its tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub duration: MediaTime,
    pub tracks: Vec<TrackMetadata>,
}

impl AssetInfo {
    pub fn new(duration: MediaTime, tracks: Vec<TrackMetadata>) -> Self {
        Self { duration, tracks }
    }

    /// All tracks of a kind, in container order.
    pub fn tracks(&self, kind: TrackKind) -> impl Iterator<Item = &TrackMetadata> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    pub fn first_track(&self, kind: TrackKind) -> Option<&TrackMetadata> {
        self.tracks(kind).next()
    }

    pub fn has_track(&self, kind: TrackKind) -> bool {
        self.first_track(kind).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_track_by_kind() {
        let mut video = TrackMetadata::video(
            Size::new(1920.0, 1080.0),
            AffineTransform::IDENTITY,
            8_000_000.0,
        );
        video.index = 1;
        let mut audio = TrackMetadata::audio(128_000.0);
        audio.index = 0;
        let asset = AssetInfo::new(MediaTime::new(10, 1), vec![audio, video]);

        assert_eq!(asset.first_track(TrackKind::Video).unwrap().index, 1);
        assert_eq!(asset.first_track(TrackKind::Audio).unwrap().index, 0);
        assert_eq!(asset.tracks(TrackKind::Video).count(), 1);
    }

    #[test]
    fn test_display_size_for_portrait_transform() {
        let track = TrackMetadata::video(
            Size::new(1920.0, 1080.0),
            AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0),
            0.0,
        );
        assert_eq!(track.display_size(), Size::new(1080.0, 1920.0));
    }
}
