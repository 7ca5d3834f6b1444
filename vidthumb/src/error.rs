use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("source unavailable: {message}")]
    SourceUnavailable { message: String },

    #[error("frame extraction failed: {0}")]
    FrameExtractionFailed(String),

    #[error("encode failed: {0}")]
    EncodeFailed(String),

    #[error("failed to create output directory {}: {source}", path.display())]
    CreateDirectoryFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("format unsupported: {0}")]
    FormatUnsupported(String),
}

impl ThumbnailError {
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        ThumbnailError::SourceUnavailable {
            message: message.into(),
        }
    }

    /// Stable identifier used when errors cross a language boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ThumbnailError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ThumbnailError::SourceUnavailable { .. } => "SOURCE_UNAVAILABLE",
            ThumbnailError::FrameExtractionFailed(_) => "FRAME_EXTRACTION_FAILED",
            ThumbnailError::EncodeFailed(_) => "ENCODE_FAILED",
            ThumbnailError::CreateDirectoryFailed { .. } => "CREATE_DIRECTORY_FAILED",
            ThumbnailError::WriteFailed { .. } => "WRITE_FAILED",
            ThumbnailError::FormatUnsupported(_) => "FORMAT_UNSUPPORTED",
        }
    }
}

pub type Result<T> = std::result::Result<T, ThumbnailError>;
