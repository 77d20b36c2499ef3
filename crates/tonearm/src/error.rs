//! Closed error type for the playback core.
//!
//! Session-start failures (open, stream selection, resampler/sink setup) are
//! fatal and surface synchronously before any thread exists. Per-packet
//! failures are recoverable: the producer logs them and moves on, and they
//! never cross the thread boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the playback core.
pub type Result<T> = std::result::Result<T, PlaybackError>;

/// Everything that can go wrong between opening a file and the sink.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// The container could not be opened or parsed.
    #[error("cannot open {path:?}: {reason}")]
    Open { path: PathBuf, reason: String },

    /// The container holds no usable audio stream.
    #[error("no audio stream in {path:?}")]
    NoAudioStream { path: PathBuf },

    /// No decoder exists for the selected stream, or its parameters are
    /// incomplete.
    #[error("unsupported codec in {path:?}: {reason}")]
    UnsupportedCodec { path: PathBuf, reason: String },

    /// Sample rate conversion could not be set up for the negotiated formats.
    #[error("resampler init failed ({src_rate} Hz -> {dst_rate} Hz, {channels} ch): {reason}")]
    ResamplerInit {
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        reason: String,
    },

    /// Output device discovery or stream setup failed.
    #[error("audio device error: {0}")]
    Device(String),

    /// A single packet failed to decode. The producer skips it.
    #[error("packet decode failed: {0}")]
    Decode(String),

    /// Decoder state is corrupted beyond per-packet recovery.
    #[error("decoder state lost: {0}")]
    DecoderLost(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlaybackError {
    /// Whether the producer may skip the failing unit and keep decoding.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlaybackError::Decode(_))
    }
}
