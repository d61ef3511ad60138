use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = VisionError> = std::result::Result<T, E>;

/// Failures surfaced by the processing core.
///
/// "No text found" is deliberately absent: an empty recognizer result is the
/// [`crate::ocr::Recognition::Empty`] value, not an error.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to load cascade {path:?}: {reason}")]
    CascadeLoad { path: PathBuf, reason: String },
    #[error("failed to persist frame to {path:?}: {reason}")]
    EncodingFailure { path: PathBuf, reason: String },
    #[error("recognizer {binary:?} is unavailable: {source}")]
    RecognitionUnavailable {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("recognition failed: {0}")]
    RecognitionFailed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl VisionError {
    pub(crate) fn geometry(msg: impl Into<String>) -> Self {
        Self::InvalidGeometry(msg.into())
    }

    pub(crate) fn argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
