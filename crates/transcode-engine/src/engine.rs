//! Collaborator interfaces for demux/decode, encode/mux and metadata.
//!
//! Sessions are values owned by a single transcode invocation. Engines are
//! shared factories; everything stateful lives in the sessions they open.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use videokit_common::error::EngineResult;
use videokit_common::time::MediaTime;
use videokit_media_model::{AffineTransform, AssetInfo, TrackKind, TrackMetadata};

/// Audio sample rate used for the decoded and re-encoded audio track.
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Audio channel count used for the decoded and re-encoded audio track.
pub const AUDIO_CHANNELS: u16 = 2;

/// Re-encoded audio bitrate in bits per second.
pub const AUDIO_BITRATE: u64 = 128_000;

/// Pixel layout of decoded video samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 32-bit ARGB, 8 bits per channel.
    Argb32,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Argb32 => 4,
        }
    }
}

/// Format a decode output delivers samples in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Video {
        pixel_format: PixelFormat,
    },
    /// Interleaved signed 16-bit linear PCM.
    Audio { sample_rate: u32, channels: u16 },
}

impl OutputFormat {
    /// Uncompressed 32-bit ARGB frames.
    pub fn argb() -> Self {
        OutputFormat::Video {
            pixel_format: PixelFormat::Argb32,
        }
    }

    /// Linear PCM, 44.1 kHz, stereo, 16-bit.
    pub fn pcm_stereo() -> Self {
        OutputFormat::Audio {
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
        }
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            OutputFormat::Video { .. } => TrackKind::Video,
            OutputFormat::Audio { .. } => TrackKind::Audio,
        }
    }
}

/// One decoded media sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub kind: TrackKind,
    pub pts: MediaTime,
    pub duration: MediaTime,
    pub data: Vec<u8>,
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerFormat {
    Mp4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
}

/// How the encoder fits input frames into the output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingMode {
    /// Scale to cover the output size, cropping the overflow.
    ResizeAspectFill,
}

/// Video encoder input settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoEncodeSettings {
    pub codec: VideoCodec,
    /// Average bitrate in bits per second.
    pub average_bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub scaling_mode: ScalingMode,
    pub frame_rate: f64,
    /// Display transform stored on the output track.
    pub transform: AffineTransform,
}

impl VideoEncodeSettings {
    /// H.264 settings for re-encoding `track` at `bitrate`.
    ///
    /// Size, frame rate and stored transform are carried over from the
    /// source, so the output plays back with the source's orientation.
    pub fn h264_for(track: &TrackMetadata, bitrate: u64) -> Self {
        let (width, height) = track.natural_size.to_pixels();
        Self {
            codec: VideoCodec::H264,
            average_bitrate: bitrate,
            width,
            height,
            scaling_mode: ScalingMode::ResizeAspectFill,
            frame_rate: track.nominal_frame_rate,
            transform: track.preferred_transform,
        }
    }
}

/// Audio encoder input settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioEncodeSettings {
    pub codec: AudioCodec,
    pub channels: u16,
    pub sample_rate: u32,
    pub bitrate: u64,
}

impl Default for AudioEncodeSettings {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Aac,
            channels: AUDIO_CHANNELS,
            sample_rate: AUDIO_SAMPLE_RATE,
            bitrate: AUDIO_BITRATE,
        }
    }
}

/// Settings for one encoder input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EncodeSettings {
    Video(VideoEncodeSettings),
    Audio(AudioEncodeSettings),
}

impl EncodeSettings {
    pub fn kind(&self) -> TrackKind {
        match self {
            EncodeSettings::Video(_) => TrackKind::Video,
            EncodeSettings::Audio(_) => TrackKind::Audio,
        }
    }
}

/// Reads container and track metadata.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn load(&self, source: &Path) -> EngineResult<AssetInfo>;
}

/// Opens demux/decode sessions.
#[async_trait]
pub trait DecodeEngine: Send + Sync {
    async fn open(&self, source: &Path) -> EngineResult<Box<dyn DecodeSession>>;
}

/// A demux/decode session over one source file.
#[async_trait]
pub trait DecodeSession: Send {
    /// Metadata of the opened asset.
    fn asset(&self) -> &AssetInfo;

    /// Attach an output delivering `track` in `format`. Must be called
    /// before [`DecodeSession::start`].
    fn attach_output(
        &mut self,
        track: &TrackMetadata,
        format: OutputFormat,
    ) -> EngineResult<Box<dyn DecodeOutput>>;

    /// Begin reading. Outputs deliver samples only after this.
    async fn start(&mut self) -> EngineResult<()>;

    /// Stop reading and release resources. Idempotent.
    async fn cancel(&mut self);
}

/// A stream of decoded samples for one track.
#[async_trait]
pub trait DecodeOutput: Send {
    /// Next sample in decode order; `None` at end of stream.
    async fn next_sample(&mut self) -> EngineResult<Option<Sample>>;
}

/// Opens encode/mux sessions.
#[async_trait]
pub trait EncodeEngine: Send + Sync {
    async fn open(
        &self,
        destination: &Path,
        container: ContainerFormat,
    ) -> EngineResult<Box<dyn EncodeSession>>;
}

/// An encode/mux session writing one output file.
#[async_trait]
pub trait EncodeSession: Send {
    fn destination(&self) -> &Path;

    /// Add an encoder input. Must be called before [`EncodeSession::start`].
    fn add_input(&mut self, settings: EncodeSettings) -> EngineResult<Box<dyn EncoderInput>>;

    /// Lay the file out for progressive playback (index before media).
    fn set_network_optimized(&mut self, enabled: bool);

    async fn start(&mut self) -> EngineResult<()>;

    /// Anchor the output timeline at `at`.
    fn start_session(&mut self, at: MediaTime);

    /// Flush and close the output. Every input must be marked finished.
    async fn finish(&mut self) -> EngineResult<PathBuf>;

    /// Abandon the output. Idempotent.
    async fn cancel(&mut self);
}

/// One encoder input accepting samples of a single track.
#[async_trait]
pub trait EncoderInput: Send {
    fn kind(&self) -> TrackKind;

    /// Whether the input can take another sample right now.
    fn is_ready(&self) -> bool;

    /// Suspend until the engine signals the input can take more data.
    /// Returns immediately when already ready.
    async fn ready(&mut self);

    async fn append(&mut self, sample: Sample) -> EngineResult<()>;

    /// No more samples will be appended.
    async fn mark_finished(&mut self) -> EngineResult<()>;
}
