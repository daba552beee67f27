//! Error types shared across VideoKit crates.

use std::path::PathBuf;

use crate::track::TrackKind;

/// Top-level error type for a mutate invocation.
///
/// Every variant is terminal: nothing is retried internally, and the
/// entry point surfaces exactly one of these per failed invocation.
#[derive(Debug, thiserror::Error)]
pub enum VideoKitError {
    #[error("Asset track init failed: source has no video track")]
    AssetTrackInitFailed,

    #[error("Decode session init failed: {message}")]
    DecodeSessionInitFailed { message: String },

    #[error("Could not attach {track} output to the decode session")]
    OutputAttachFailed { track: TrackKind },

    #[error("Encode session init failed: {message}")]
    EncodeSessionInitFailed { message: String },

    #[error("Export engine init failed: {message}")]
    ExportEngineInitFailed { message: String },

    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using VideoKitError.
pub type VideoKitResult<T> = Result<T, VideoKitError>;

/// Tag of a [`VideoKitError`], for callers that branch on the failure class
/// rather than on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AssetTrackInitFailed,
    DecodeSessionInitFailed,
    OutputAttachFailed(TrackKind),
    EncodeSessionInitFailed,
    ExportEngineInitFailed,
    UnderlyingEngineError,
}

impl VideoKitError {
    pub fn decode_init(msg: impl Into<String>) -> Self {
        Self::DecodeSessionInitFailed {
            message: msg.into(),
        }
    }

    pub fn encode_init(msg: impl Into<String>) -> Self {
        Self::EncodeSessionInitFailed {
            message: msg.into(),
        }
    }

    pub fn export_init(msg: impl Into<String>) -> Self {
        Self::ExportEngineInitFailed {
            message: msg.into(),
        }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// The failure class of this error.
    ///
    /// Ambient failures (I/O, JSON, configuration) are reported as
    /// underlying engine errors; the message keeps the detail.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AssetTrackInitFailed => ErrorKind::AssetTrackInitFailed,
            Self::DecodeSessionInitFailed { .. } => ErrorKind::DecodeSessionInitFailed,
            Self::OutputAttachFailed { track } => ErrorKind::OutputAttachFailed(*track),
            Self::EncodeSessionInitFailed { .. } => ErrorKind::EncodeSessionInitFailed,
            Self::ExportEngineInitFailed { .. } => ErrorKind::ExportEngineInitFailed,
            Self::Engine { .. }
            | Self::Config { .. }
            | Self::FileNotFound { .. }
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorKind::UnderlyingEngineError,
        }
    }
}

/// Error reported by an external collaborator (decode, encode, export
/// engines and metadata providers).
///
/// The pipeline maps these into [`VideoKitError`] according to the step
/// that failed, so the same engine failure may surface as a decode-init
/// error or as a mid-stream engine error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine unavailable: {message}")]
    Unavailable { message: String },

    #[error("Unsupported media: {message}")]
    Unsupported { message: String },

    #[error("Engine process failed: {message}")]
    Process { message: String },

    #[error("Invalid engine state: {message}")]
    InvalidState { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }
}

impl From<EngineError> for VideoKitError {
    fn from(err: EngineError) -> Self {
        VideoKitError::engine(err.to_string())
    }
}
