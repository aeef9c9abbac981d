//! Error taxonomy for conversion, publishing and site migration.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Why an upload did not produce a public URL.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The upload service did not hand out a presigned location.
    #[error("presigned location request failed: {0}")]
    Location(String),

    /// The object store rejected the PUT.
    #[error("transfer failed with HTTP {status}: {body}")]
    Transfer { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("source has no usable video track")]
    NoVideoTrack,

    #[error("source has no audio track")]
    NoAudioTrack,

    #[error("could not attach track to reader: {0}")]
    ReaderAttachFailed(String),

    #[error("could not attach track to writer: {0}")]
    WriterAttachFailed(String),

    #[error("encoding failed: {0}")]
    EncodeFailed(String),

    #[error("conversion cancelled")]
    Cancelled,

    #[error("download of {url} failed: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("upload of {filename} failed: {source}")]
    UploadFailed {
        filename: String,
        #[source]
        source: UploadError,
    },

    #[error("could not fetch document {id}: {reason}")]
    DocumentFetchFailed { id: String, reason: String },

    #[error("could not update document {id}: {reason}")]
    DocumentUpdateFailed { id: String, reason: String },

    #[error("could not persist backup {}: {reason}", path.display())]
    BackupPersistFailed { path: PathBuf, reason: String },

    #[error("backup not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("document {id} is not a valid page: {reason}")]
    InvalidDocument { id: String, reason: String },

    #[error(transparent)]
    Media(#[from] hlsforge_media::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn encode_failed(reason: impl Into<String>) -> Self {
        Self::EncodeFailed(reason.into())
    }

    pub fn upload(filename: impl Into<String>, source: UploadError) -> Self {
        Self::UploadFailed {
            filename: filename.into(),
            source,
        }
    }

    pub fn fetch_failed(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::DocumentFetchFailed {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn update_failed(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::DocumentUpdateFailed {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure came from cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Media(hlsforge_media::Error::Cancelled)
        )
    }
}
