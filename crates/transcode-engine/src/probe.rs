//! ffprobe-backed metadata provider.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use videokit_common::config::EngineConfig;
use videokit_common::error::{EngineError, EngineResult};
use videokit_common::time::MediaTime;
use videokit_media_model::{AffineTransform, AssetInfo, Size, TrackKind, TrackMetadata};
use videokit_processing_core::orientation::{canonical_transform, from_clockwise_degrees};

use crate::engine::MetadataProvider;
use crate::process::run_tool;

/// Timescale for durations read from ffprobe.
const PROBE_TIMESCALE: i32 = 600;

/// Fixed-point scale of display matrix coefficients.
const MATRIX_ONE: f64 = 65_536.0;

/// ffprobe `-show_streams -show_format` output.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeFormat {
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeStream {
    pub index: usize,
    pub codec_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    pub bit_rate: Option<String>,
    pub duration: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    #[serde(default)]
    pub side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSideData {
    pub side_data_type: Option<String>,
    pub displaymatrix: Option<String>,
    /// Counter-clockwise degrees.
    pub rotation: Option<f64>,
}

impl ProbeStream {
    fn kind(&self) -> Option<TrackKind> {
        match self.codec_type.as_deref() {
            Some("video") => Some(TrackKind::Video),
            Some("audio") => Some(TrackKind::Audio),
            _ => None,
        }
    }

    fn natural_size(&self) -> Size {
        Size::new(
            self.width.unwrap_or(0) as f64,
            self.height.unwrap_or(0) as f64,
        )
    }

    fn frame_rate(&self) -> f64 {
        [&self.avg_frame_rate, &self.r_frame_rate]
            .into_iter()
            .filter_map(|rate| rate.as_deref().and_then(parse_rational))
            .find(|fps| *fps > 0.0)
            .unwrap_or(0.0)
    }

    /// The stored display transform.
    ///
    /// A display matrix whose linear part is a quarter turn maps to the
    /// canonical transform of that turn: muxers other than capture devices
    /// (ffmpeg among them) store the rotation with a zero translation. Any
    /// other matrix is used as-is. A bare rotation angle (side data or the
    /// legacy `rotate` tag) maps to the canonical transform of the matching
    /// orientation.
    fn stored_transform(&self) -> AffineTransform {
        let natural = self.natural_size();

        if let Some(matrix) = self
            .side_data_list
            .iter()
            .filter_map(|sd| sd.displaymatrix.as_deref())
            .find_map(parse_display_matrix)
        {
            return match matrix.quarter_turns() {
                Some(turns) => {
                    let degrees = f64::from(turns) * 90.0;
                    canonical_transform(from_clockwise_degrees(degrees), natural)
                }
                None => matrix,
            };
        }

        if let Some(ccw) = self.side_data_list.iter().find_map(|sd| sd.rotation) {
            return canonical_transform(from_clockwise_degrees(-ccw), natural);
        }

        if let Some(cw) = self
            .tags
            .as_ref()
            .and_then(|tags| tags.get("rotate"))
            .and_then(|r| r.trim().parse::<f64>().ok())
        {
            return canonical_transform(from_clockwise_degrees(cw), natural);
        }

        AffineTransform::IDENTITY
    }
}

/// Parse ffprobe's textual display matrix.
///
/// The matrix prints as three rows of `NNNNNNNN: a b u` with 16.16 fixed
/// point values laid out `[a b u; c d v; tx ty w]`.
pub fn parse_display_matrix(text: &str) -> Option<AffineTransform> {
    let values: Vec<f64> = text
        .lines()
        .filter_map(|line| line.split_once(':').map(|(_, rest)| rest))
        .flat_map(str::split_whitespace)
        .map(|v| v.parse::<i64>().map(|n| n as f64))
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() != 9 {
        return None;
    }
    Some(AffineTransform::new(
        values[0] / MATRIX_ONE,
        values[1] / MATRIX_ONE,
        values[3] / MATRIX_ONE,
        values[4] / MATRIX_ONE,
        values[6] / MATRIX_ONE,
        values[7] / MATRIX_ONE,
    ))
}

/// Parse `"30000/1001"` or `"25"`.
fn parse_rational(text: &str) -> Option<f64> {
    match text.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => text.trim().parse::<f64>().ok(),
    }
}

fn parse_number(text: Option<&String>) -> Option<f64> {
    text.and_then(|t| t.trim().parse::<f64>().ok())
}

/// Convert probe output to asset metadata.
pub fn asset_from_probe(probe: &ProbeOutput) -> EngineResult<AssetInfo> {
    let format_duration = probe
        .format
        .as_ref()
        .and_then(|f| parse_number(f.duration.as_ref()));
    let format_rate = probe
        .format
        .as_ref()
        .and_then(|f| parse_number(f.bit_rate.as_ref()));

    let mut tracks = Vec::new();
    for stream in &probe.streams {
        let Some(kind) = stream.kind() else {
            continue;
        };
        let seconds = parse_number(stream.duration.as_ref())
            .or(format_duration)
            .unwrap_or(0.0);
        let data_rate = parse_number(stream.bit_rate.as_ref())
            .or(if kind == TrackKind::Video {
                format_rate
            } else {
                None
            })
            .unwrap_or(0.0);

        let track = match kind {
            TrackKind::Video => TrackMetadata {
                index: stream.index,
                kind,
                natural_size: stream.natural_size(),
                preferred_transform: stream.stored_transform(),
                estimated_data_rate: data_rate,
                nominal_frame_rate: stream.frame_rate(),
                duration: MediaTime::from_seconds(seconds, PROBE_TIMESCALE),
            },
            TrackKind::Audio => TrackMetadata {
                index: stream.index,
                kind,
                natural_size: Size::ZERO,
                preferred_transform: AffineTransform::IDENTITY,
                estimated_data_rate: data_rate,
                nominal_frame_rate: 0.0,
                duration: MediaTime::from_seconds(seconds, PROBE_TIMESCALE),
            },
        };
        tracks.push(track);
    }

    let duration = format_duration
        .or_else(|| tracks.iter().map(|t| t.duration.seconds()).reduce(f64::max))
        .ok_or_else(|| EngineError::unsupported("probe reported no duration"))?;

    Ok(AssetInfo::new(
        MediaTime::from_seconds(duration, PROBE_TIMESCALE),
        tracks,
    ))
}

/// [`MetadataProvider`] that shells out to ffprobe.
#[derive(Debug, Clone)]
pub struct FfprobeMetadata {
    ffprobe_bin: PathBuf,
}

impl FfprobeMetadata {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_bin: ffprobe_bin.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.ffprobe_bin)
    }

    pub fn binary(&self) -> &Path {
        &self.ffprobe_bin
    }

    pub async fn probe(&self, source: &Path) -> EngineResult<ProbeOutput> {
        if !source.exists() {
            return Err(EngineError::unsupported(format!(
                "{} does not exist",
                source.display()
            )));
        }
        let stdout = run_tool(
            &self.ffprobe_bin,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-print_format"),
                OsStr::new("json"),
                OsStr::new("-show_streams"),
                OsStr::new("-show_format"),
                source.as_os_str(),
            ],
        )
        .await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| EngineError::process(format!("unreadable ffprobe output: {e}")))
    }
}

#[async_trait]
impl MetadataProvider for FfprobeMetadata {
    async fn load(&self, source: &Path) -> EngineResult<AssetInfo> {
        let probe = self.probe(source).await?;
        let asset = asset_from_probe(&probe)?;
        tracing::debug!(
            path = %source.display(),
            tracks = asset.tracks.len(),
            duration = %asset.duration,
            "Probed asset"
        );
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use videokit_media_model::Orientation;
    use videokit_processing_core::orientation::{resolve, resolve_track};

    const PORTRAIT_PHONE: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "avg_frame_rate": "30000/1001",
                "r_frame_rate": "30/1",
                "bit_rate": "9000000",
                "duration": "12.500000",
                "side_data_list": [
                    {
                        "side_data_type": "Display Matrix",
                        "displaymatrix": "\n00000000:            0       65536           0\n00000001:      -65536           0           0\n00000002:   70778880           0  1073741824\n",
                        "rotation": -90
                    }
                ]
            },
            {
                "index": 1,
                "codec_type": "audio",
                "bit_rate": "128000",
                "duration": "12.480000"
            },
            { "index": 2, "codec_type": "data" }
        ],
        "format": { "duration": "12.500000", "bit_rate": "9200000" }
    }"#;

    #[test]
    fn test_display_matrix_resolves_up() {
        let probe: ProbeOutput = serde_json::from_str(PORTRAIT_PHONE).unwrap();
        let asset = asset_from_probe(&probe).unwrap();

        assert_eq!(asset.tracks.len(), 2);
        let video = asset.first_track(TrackKind::Video).unwrap();
        assert_eq!(
            video.preferred_transform,
            AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0)
        );
        assert_eq!(resolve_track(video), Orientation::Up);
        assert!((video.nominal_frame_rate - 29.97).abs() < 0.01);
        assert_eq!(video.estimated_data_rate, 9_000_000.0);
        assert_eq!(asset.duration, MediaTime::new(7500, 600));

        let audio = asset.first_track(TrackKind::Audio).unwrap();
        assert_eq!(audio.index, 1);
        assert_eq!(audio.estimated_data_rate, 128_000.0);
    }

    #[test]
    fn test_translation_free_matrix_is_canonicalized() {
        // What ffmpeg writes for `-display_rotation -90`.
        let probe: ProbeOutput = serde_json::from_str(
            r#"{
                "streams": [{
                    "index": 0, "codec_type": "video", "width": 1920, "height": 1080,
                    "side_data_list": [{
                        "side_data_type": "Display Matrix",
                        "displaymatrix": "\n00000000:            0       65536           0\n00000001:      -65536           0           0\n00000002:            0           0  1073741824\n",
                        "rotation": -90
                    }]
                }],
                "format": { "duration": "2.0" }
            }"#,
        )
        .unwrap();
        let asset = asset_from_probe(&probe).unwrap();
        let video = asset.first_track(TrackKind::Video).unwrap();
        assert_eq!(
            video.preferred_transform,
            AffineTransform::new(0.0, 1.0, -1.0, 0.0, 1080.0, 0.0)
        );
        assert_eq!(resolve_track(video), Orientation::Up);
    }

    #[test]
    fn test_zero_translation_matrices_resolve_by_turn() {
        let natural = Size::new(1280.0, 720.0);
        let cases = [
            ("0 65536 0\n-65536 0 0", Orientation::Up),
            ("0 -65536 0\n65536 0 0", Orientation::Down),
            ("-65536 0 0\n0 -65536 0", Orientation::Left),
            ("65536 0 0\n0 65536 0", Orientation::Right),
        ];
        for (linear, expected) in cases {
            let mut rows = linear.lines();
            let text = format!(
                "00000000: {}\n00000001: {}\n00000002: 0 0 1073741824\n",
                rows.next().unwrap(),
                rows.next().unwrap()
            );
            let stream = ProbeStream {
                index: 0,
                codec_type: Some("video".into()),
                width: Some(1280),
                height: Some(720),
                avg_frame_rate: None,
                r_frame_rate: None,
                bit_rate: None,
                duration: None,
                tags: None,
                side_data_list: vec![ProbeSideData {
                    side_data_type: Some("Display Matrix".into()),
                    displaymatrix: Some(text),
                    rotation: None,
                }],
            };
            let transform = stream.stored_transform();
            assert_eq!(resolve(&transform, natural), expected, "{linear}");
        }
    }

    #[test]
    fn test_rotate_tag_fallback() {
        let probe: ProbeOutput = serde_json::from_str(
            r#"{
                "streams": [{
                    "index": 0, "codec_type": "video", "width": 1280, "height": 720,
                    "avg_frame_rate": "0/0", "r_frame_rate": "25/1",
                    "tags": { "rotate": "180" }
                }],
                "format": { "duration": "3.0", "bit_rate": "4000000" }
            }"#,
        )
        .unwrap();
        let asset = asset_from_probe(&probe).unwrap();
        let video = asset.first_track(TrackKind::Video).unwrap();
        assert_eq!(resolve_track(video), Orientation::Left);
        assert_eq!(video.nominal_frame_rate, 25.0);
        assert_eq!(video.estimated_data_rate, 4_000_000.0);
    }

    #[test]
    fn test_side_data_rotation_without_matrix() {
        let probe: ProbeOutput = serde_json::from_str(
            r#"{
                "streams": [{
                    "index": 0, "codec_type": "video", "width": 1080, "height": 1920,
                    "side_data_list": [{ "side_data_type": "Display Matrix", "rotation": 90 }]
                }],
                "format": { "duration": "1.0" }
            }"#,
        )
        .unwrap();
        let asset = asset_from_probe(&probe).unwrap();
        let video = asset.first_track(TrackKind::Video).unwrap();
        assert_eq!(resolve_track(video), Orientation::Down);
    }

    #[test]
    fn test_malformed_matrix_is_ignored() {
        assert!(parse_display_matrix("00000000: 0 65536").is_none());
        assert!(parse_display_matrix("00000000: x y z\n").is_none());
    }

    #[test]
    fn test_missing_duration_is_unsupported() {
        let probe: ProbeOutput = serde_json::from_str(r#"{"streams": []}"#).unwrap();
        assert!(matches!(
            asset_from_probe(&probe),
            Err(EngineError::Unsupported { .. })
        ));
    }
}
