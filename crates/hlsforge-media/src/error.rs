//! Error types for hlsforge-media.

use std::io;
use thiserror::Error;

/// Result type for hlsforge-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hlsforge-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid MP4 file structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A track could not be attached to a reader or writer.
    #[error("Track {track_id} cannot be attached: {reason}")]
    TrackAttach { track_id: u32, reason: String },

    /// The writer refused a sample or failed to finalize.
    #[error("Writer failed: {0}")]
    Writer(String),

    /// The reader or writer was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a writer error.
    pub fn writer(msg: impl Into<String>) -> Self {
        Self::Writer(msg.into())
    }

    /// Create a track attach error.
    pub fn track_attach(track_id: u32, reason: impl Into<String>) -> Self {
        Self::TrackAttach {
            track_id,
            reason: reason.into(),
        }
    }
}
