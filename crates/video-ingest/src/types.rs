use anyhow::Error;
use thiserror::Error;
use vision::PixelBuffer;

/// Frame pulled from a source, stamped when it was read.
#[derive(Debug, Clone)]
pub struct Frame {
    pub buffer: PixelBuffer,
    pub timestamp_ms: i64,
    /// Zero-based position in the stream.
    pub sequence: u64,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("failed to read a frame from {uri:?}: {reason}")]
    Read { uri: String, reason: String },
    #[error("failed to release video source {uri:?}: {reason}")]
    Release { uri: String, reason: String },
    #[error("video source {uri:?} has no more frames")]
    EndOfStream { uri: String },
    #[error(transparent)]
    Other(#[from] Error),
}

/// Swap the first and third byte of every packed 3-byte pixel in place.
pub fn bgr_to_rgb(data: &mut [u8]) {
    for px in data.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}
