//! VideoKit Transcode Engine
//!
//! Re-encodes a source at a target video bitrate by copying decoded
//! samples from a decode session into an encode session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │               SampleCopyTranscoder               │
//! │  ┌───────────────┐            ┌───────────────┐  │
//! │  │ DecodeSession │            │ EncodeSession │  │
//! │  │  audio output ├─ audio task ─▶ audio input │  │
//! │  │  video output ├─ video task ─▶ video input │  │
//! │  └───────────────┘            └───────┬───────┘  │
//! │            CompletionBarrier ─ finalize ┘         │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Engines are traits ([`engine`]); [`memory`] provides an in-process pair
//! for tests, [`ffmpeg`] and [`probe`] drive the `ffmpeg`/`ffprobe` tools.

pub mod barrier;
pub mod engine;
pub mod ffmpeg;
pub mod memory;
pub mod pipeline;
pub mod probe;
pub mod process;

pub use barrier::{BarrierState, CompletionBarrier, Finalize};
pub use engine::*;
pub use ffmpeg::{FfmpegDecodeEngine, FfmpegEncodeEngine, FfmpegTranscoder};
pub use pipeline::{SampleCopyTranscoder, Transcoder};
pub use probe::FfprobeMetadata;
pub use process::binary_available;
