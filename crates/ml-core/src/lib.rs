//! Cascade-based region detection over [`vision::PixelBuffer`] frames.
//!
//! Load a [`Cascade`] once, wrap it in an `Arc`, and hand it to as many
//! [`RegionDetector`]s as there are worker threads.

pub mod cascade;
pub mod detector;
mod integral;

pub use cascade::Cascade;
pub use detector::{
    Candidate, DetectedRegion, DetectionParams, GROUP_EPS, RegionDetector, detect_with_cascade,
    group_candidates,
};
