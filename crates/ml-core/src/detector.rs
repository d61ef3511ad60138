use std::{path::Path, sync::Arc};

use image::{GrayImage, imageops::FilterType};
use serde::Serialize;
use tracing::debug;
use vision::{PixelBuffer, Result, VisionError};

use crate::{cascade::Cascade, integral::IntegralImage};

/// Relative edge tolerance used when merging candidate windows.
pub const GROUP_EPS: f64 = 0.2;

/// Single region returned by the detector, in source-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectedRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Raw candidate windows merged into this region.
    pub neighbors: u32,
}

/// Candidate window accepted by every cascade stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionParams {
    /// Pyramid step between scales; must exceed 1.
    pub scale_factor: f64,
    /// Groups need at least this many members to be reported.
    /// Zero disables grouping.
    pub min_neighbors: u32,
    pub min_size: (u32, u32),
    pub max_size: Option<(u32, u32)>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.2,
            min_neighbors: 2,
            min_size: (20, 20),
            max_size: None,
        }
    }
}

impl DetectionParams {
    fn validate(&self) -> Result<()> {
        if !(self.scale_factor.is_finite() && self.scale_factor > 1.0) {
            return Err(VisionError::InvalidArgument(format!(
                "scale factor must be a finite value above 1, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }
}

/// Multi-scale sliding-window detector over a shared cascade.
#[derive(Debug, Clone)]
pub struct RegionDetector {
    cascade: Arc<Cascade>,
    params: DetectionParams,
}

impl RegionDetector {
    pub fn new(cascade: Arc<Cascade>, params: DetectionParams) -> Self {
        Self { cascade, params }
    }

    /// Load the cascade at `path` and pair it with default parameters.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cascade = Cascade::load(path)?;
        Ok(Self::new(Arc::new(cascade), DetectionParams::default()))
    }

    pub fn with_params(mut self, params: DetectionParams) -> Self {
        self.params = params;
        self
    }

    pub fn cascade(&self) -> &Arc<Cascade> {
        &self.cascade
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Find every region the cascade accepts. Non-gray or 16-bit buffers are
    /// converted to 8-bit grayscale first.
    pub fn detect(&self, buffer: &PixelBuffer) -> Result<Vec<DetectedRegion>> {
        let candidates = self.candidates(buffer)?;
        let regions = group_candidates(&candidates, self.params.min_neighbors, GROUP_EPS);
        debug!(
            candidates = candidates.len(),
            regions = regions.len(),
            "detection finished"
        );
        Ok(regions)
    }

    /// Raw accepted windows before grouping, in scan order.
    pub fn candidates(&self, buffer: &PixelBuffer) -> Result<Vec<Candidate>> {
        self.params.validate()?;
        let gray = buffer.to_gray8();
        Ok(self.scan(&gray))
    }

    fn scan(&self, gray: &GrayImage) -> Vec<Candidate> {
        let (img_w, img_h) = gray.dimensions();
        let (win_w, win_h) = self.cascade.window();
        let (min_w, min_h) = self.params.min_size;
        let mut found = Vec::new();

        let mut factor = 1.0f64;
        loop {
            let scaled_w = (f64::from(img_w) / factor).round() as u32;
            let scaled_h = (f64::from(img_h) / factor).round() as u32;
            if scaled_w < win_w || scaled_h < win_h {
                break;
            }
            let window_w = (f64::from(win_w) * factor).round() as u32;
            let window_h = (f64::from(win_h) * factor).round() as u32;
            if let Some((max_w, max_h)) = self.params.max_size {
                if window_w > max_w || window_h > max_h {
                    break;
                }
            }
            if window_w < min_w || window_h < min_h {
                factor *= self.params.scale_factor;
                continue;
            }

            let resized;
            let level = if (scaled_w, scaled_h) == (img_w, img_h) {
                gray
            } else {
                resized = image::imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle);
                &resized
            };
            let integral = IntegralImage::new(level);
            let step = if factor > 2.0 { 1 } else { 2 };
            let before = found.len();

            for y in (0..=scaled_h - win_h).step_by(step) {
                for x in (0..=scaled_w - win_w).step_by(step) {
                    if self.cascade.accepts(&integral, x, y) {
                        found.push(Candidate {
                            x: (f64::from(x) * factor).round() as u32,
                            y: (f64::from(y) * factor).round() as u32,
                            width: window_w,
                            height: window_h,
                        });
                    }
                }
            }
            debug!(
                factor,
                scaled_w,
                scaled_h,
                hits = found.len() - before,
                "pyramid level scanned"
            );
            factor *= self.params.scale_factor;
        }
        found
    }
}

/// Load the cascade at `path` and run one detection with default parameters.
/// Nothing is cached between calls.
pub fn detect_with_cascade<P: AsRef<Path>>(
    buffer: &PixelBuffer,
    path: P,
) -> Result<Vec<DetectedRegion>> {
    RegionDetector::load(path)?.detect(buffer)
}

fn similar(a: &Candidate, b: &Candidate, eps: f64) -> bool {
    let delta = eps * f64::from(a.width.min(b.width) + a.height.min(b.height)) * 0.5;
    let close = |p: u32, q: u32| f64::from(p.abs_diff(q)) <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge overlapping candidates into regions.
///
/// Similarity is transitive. Groups with fewer than `min_neighbors` members
/// are dropped, as is any group lying inside a clearly stronger one. With
/// `min_neighbors == 0` every candidate is returned on its own.
pub fn group_candidates(
    candidates: &[Candidate],
    min_neighbors: u32,
    eps: f64,
) -> Vec<DetectedRegion> {
    if min_neighbors == 0 {
        return candidates
            .iter()
            .map(|c| DetectedRegion {
                x: c.x,
                y: c.y,
                width: c.width,
                height: c.height,
                neighbors: 1,
            })
            .collect();
    }

    let n = candidates.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&candidates[i], &candidates[j], eps) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    // Groups are numbered by the first candidate that reaches them.
    let mut label_of_root = vec![usize::MAX; n];
    let mut sums: Vec<[u64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (i, c) in candidates.iter().enumerate() {
        let root = find(&mut parent, i);
        if label_of_root[root] == usize::MAX {
            label_of_root[root] = sums.len();
            sums.push([0; 4]);
            counts.push(0);
        }
        let label = label_of_root[root];
        let s = &mut sums[label];
        s[0] += u64::from(c.x);
        s[1] += u64::from(c.y);
        s[2] += u64::from(c.width);
        s[3] += u64::from(c.height);
        counts[label] += 1;
    }

    let averaged: Vec<DetectedRegion> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &count)| {
            let avg = |v: u64| (v as f64 / f64::from(count)).round() as u32;
            DetectedRegion {
                x: avg(s[0]),
                y: avg(s[1]),
                width: avg(s[2]),
                height: avg(s[3]),
                neighbors: count,
            }
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(_, r)| r.neighbors >= min_neighbors)
        .filter(|&(i, r1)| {
            !averaged.iter().enumerate().any(|(j, r2)| {
                if i == j || r2.neighbors < min_neighbors {
                    return false;
                }
                let dx = (f64::from(r2.width) * eps).round() as i64;
                let dy = (f64::from(r2.height) * eps).round() as i64;
                let inside = i64::from(r1.x) >= i64::from(r2.x) - dx
                    && i64::from(r1.y) >= i64::from(r2.y) - dy
                    && i64::from(r1.x + r1.width) <= i64::from(r2.x + r2.width) + dx
                    && i64::from(r1.y + r1.height) <= i64::from(r2.y + r2.height) + dy;
                inside && (r2.neighbors > r1.neighbors.max(3) || r1.neighbors < 3)
            })
        })
        .map(|(_, r)| *r)
        .collect()
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::cascade::tests::EDGE_CASCADE;

    fn detector() -> RegionDetector {
        let cascade = Cascade::from_xml_str(EDGE_CASCADE).unwrap();
        RegionDetector::new(Arc::new(cascade), DetectionParams::default())
    }

    /// Bright left half, dark right half, edge at column 50.
    fn edge_frame(bright_left: bool) -> PixelBuffer {
        let image = GrayImage::from_fn(100, 100, |x, _| {
            let left = x < 50;
            Luma([if left == bright_left { 200 } else { 20 }])
        });
        PixelBuffer::from_gray8(image).unwrap()
    }

    fn candidate(x: u32, y: u32, w: u32, h: u32) -> Candidate {
        Candidate {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn edge_is_found_on_the_expected_side() {
        let regions = detector().detect(&edge_frame(true)).unwrap();
        assert!(!regions.is_empty());
        for region in &regions {
            assert!(region.x <= 50 && region.x + region.width >= 50, "{region:?}");
            assert!(region.width >= 20 && region.height >= 20);
            assert!(region.neighbors >= 2);
        }
    }

    #[test]
    fn mirrored_and_flat_frames_yield_nothing() {
        let detector = detector();
        assert!(detector.detect(&edge_frame(false)).unwrap().is_empty());
        let flat = PixelBuffer::from_gray8(GrayImage::from_pixel(64, 64, Luma([128]))).unwrap();
        assert!(detector.detect(&flat).unwrap().is_empty());
    }

    #[test]
    fn frames_smaller_than_the_window_are_not_an_error() {
        let tiny = PixelBuffer::from_gray8(GrayImage::new(10, 10)).unwrap();
        assert!(detector().detect(&tiny).unwrap().is_empty());
    }

    #[test]
    fn colour_input_is_converted_before_scanning() {
        let gray = edge_frame(true);
        let rgb = PixelBuffer::from_rgb8(gray.to_dynamic().to_rgb8()).unwrap();
        let detector = detector();
        assert_eq!(detector.detect(&rgb).unwrap(), detector.detect(&gray).unwrap());
    }

    #[test]
    fn max_size_limits_the_pyramid() {
        let detector = detector().with_params(DetectionParams {
            max_size: Some((20, 20)),
            ..DetectionParams::default()
        });
        let candidates = detector.candidates(&edge_frame(true)).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|c| c.width == 20 && c.height == 20));
    }

    #[test]
    fn scale_factor_must_grow() {
        let detector = detector().with_params(DetectionParams {
            scale_factor: 1.0,
            ..DetectionParams::default()
        });
        assert!(matches!(
            detector.detect(&edge_frame(true)),
            Err(VisionError::InvalidArgument(_))
        ));
    }

    #[test]
    fn grouping_drops_weak_clusters() {
        let candidates = [
            candidate(10, 10, 20, 20),
            candidate(200, 200, 20, 20),
            candidate(12, 11, 20, 20),
            candidate(200, 202, 20, 20),
            candidate(11, 9, 22, 22),
            candidate(400, 50, 20, 20),
        ];
        let regions = group_candidates(&candidates, 3, GROUP_EPS);
        assert_eq!(
            regions,
            vec![DetectedRegion {
                x: 11,
                y: 10,
                width: 21,
                height: 21,
                neighbors: 3,
            }]
        );
        assert_eq!(group_candidates(&candidates, 2, GROUP_EPS).len(), 2);
        assert_eq!(group_candidates(&candidates, 1, GROUP_EPS).len(), 3);
        assert_eq!(group_candidates(&candidates, 0, GROUP_EPS).len(), 6);
    }

    #[test]
    fn exactly_min_neighbors_windows_confirm_a_region() {
        let pair = [candidate(10, 10, 20, 20), candidate(11, 10, 20, 20)];
        let regions = group_candidates(&pair, 2, GROUP_EPS);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].neighbors, 2);
        assert!(group_candidates(&pair, 3, GROUP_EPS).is_empty());
    }

    #[test]
    fn similarity_is_transitive() {
        // Neighbouring windows are 3px apart; the ends are 9px apart.
        let chain: Vec<_> = (0..4).map(|i| candidate(i * 3, 0, 20, 20)).collect();
        let regions = group_candidates(&chain, 2, GROUP_EPS);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].neighbors, 4);
    }

    #[test]
    fn weak_group_inside_a_strong_one_is_dropped() {
        let mut candidates: Vec<_> = (0..6).map(|_| candidate(0, 0, 100, 100)).collect();
        candidates.extend((0..3).map(|_| candidate(40, 40, 20, 20)));
        let regions = group_candidates(&candidates, 2, GROUP_EPS);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].width, 100);
    }

    #[test]
    fn detector_is_shared_across_threads() {
        let detector = detector();
        let frame = edge_frame(true);
        let expected = detector.detect(&frame).unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| detector.detect(&frame).unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn regions_serialize_for_cli_output() {
        let region = DetectedRegion {
            x: 1,
            y: 2,
            width: 3,
            height: 4,
            neighbors: 5,
        };
        let json = serde_json::to_string(&region).unwrap();
        assert_eq!(json, r#"{"x":1,"y":2,"width":3,"height":4,"neighbors":5}"#);
    }
}
