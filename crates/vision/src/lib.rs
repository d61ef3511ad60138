//! Frame processing core: pixel buffers and the operations applied to frames
//! pulled from a capture device.
//!
//! - `buffer`: [`PixelBuffer`] plus clone/resize/crop/grayscale primitives.
//! - `photometric`: brightness/contrast remapping.
//! - `histogram`: intensity histograms rendered as bar charts.
//! - `overlay`: multi-line bitmap text.
//! - `ocr`: hand-off to an external text recognizer.
//! - `config`: settings shared by all of the above.
//!
//! Cascade-based region detection lives in the `ml-core` crate.

pub mod buffer;
pub mod config;
pub mod error;
mod font;
pub mod histogram;
pub mod ocr;
pub mod overlay;
pub mod photometric;

pub use buffer::{BitDepth, PixelBuffer};
pub use config::{CaptureSettings, RecognizerConfig, VisionConfig};
pub use error::{Result, VisionError};
pub use histogram::{Histogram, HistogramOptions, build_histogram};
pub use ocr::{OcrExtractor, OcrRequest, Recognition};
pub use overlay::{Font, TextOptions, draw_text, draw_text_mut};
pub use photometric::{AffineMap, apply_brightness_contrast};
