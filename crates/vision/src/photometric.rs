//! Brightness/contrast remapping.
//!
//! Both knobs are trackbar-style integers expected in `[0, 200]`. Values
//! outside that range are not rejected; they simply produce whatever the
//! affine map yields.

use crate::buffer::{BitDepth, PixelBuffer};

/// Per-sample affine map `out = gain * in + offset`, offset in 8-bit units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineMap {
    pub gain: f64,
    pub offset: f64,
}

impl AffineMap {
    pub fn brightness_contrast(contrast: i32, brightness: i32) -> Self {
        let contrast = f64::from(contrast);
        let brightness = f64::from(brightness);
        if contrast == 0.0 {
            return Self {
                gain: 1.0,
                offset: brightness,
            };
        }
        if contrast > 0.0 {
            let delta = 127.0 * contrast / 100.0;
            let gain = 255.0 / (255.0 - 2.0 * delta);
            Self {
                gain,
                offset: gain * (brightness - delta),
            }
        } else {
            let delta = -128.0 * contrast / 100.0;
            let gain = (256.0 - 2.0 * delta) / 255.0;
            Self {
                gain,
                offset: gain * brightness + delta,
            }
        }
    }

    pub fn apply(&self, value: f64) -> f64 {
        self.gain * value + self.offset
    }

    /// Map undoing `self`, ignoring clamping.
    pub fn invert(&self) -> Self {
        Self {
            gain: 1.0 / self.gain,
            offset: -self.offset / self.gain,
        }
    }
}

/// Remap every sample of every channel in place.
pub fn apply_brightness_contrast(buffer: &mut PixelBuffer, contrast: i32, brightness: i32) {
    let map = AffineMap::brightness_contrast(contrast, brightness);
    apply_affine(buffer, &map);
}

/// Apply an arbitrary affine map, scaling the offset to the buffer depth.
pub fn apply_affine(buffer: &mut PixelBuffer, map: &AffineMap) {
    let offset = match buffer.depth() {
        BitDepth::Eight => map.offset,
        BitDepth::Sixteen => map.offset * f64::from(u16::MAX) / 255.0,
    };
    let gain = map.gain;
    buffer.map_samples(|value| gain * value + offset);
}

#[cfg(test)]
mod tests {
    use image::GrayImage;

    use super::*;

    fn ramp() -> PixelBuffer {
        let img = GrayImage::from_fn(256, 1, |x, _| image::Luma([x as u8]));
        PixelBuffer::from_gray8(img).unwrap()
    }

    #[test]
    fn zero_contrast_only_shifts_by_brightness() {
        let map = AffineMap::brightness_contrast(0, 40);
        assert_eq!(map, AffineMap { gain: 1.0, offset: 40.0 });

        let mut buf = ramp();
        apply_brightness_contrast(&mut buf, 0, 40);
        assert_eq!(buf.sample(10, 0, 0), Some(50));
        assert_eq!(buf.sample(128, 0, 0), Some(168));
        assert_eq!(buf.sample(250, 0, 0), Some(255));
        assert_eq!(buf.dimensions(), (256, 1));
    }

    #[test]
    fn zero_contrast_and_brightness_leave_samples_untouched() {
        let original = ramp();
        let mut buf = original.clone();
        apply_brightness_contrast(&mut buf, 0, 0);
        assert_eq!(buf, original);
    }

    #[test]
    fn negative_contrast_flattens_the_ramp() {
        let map = AffineMap::brightness_contrast(-50, 0);
        assert!((map.gain - 128.0 / 255.0).abs() < 1e-12);
        assert!((map.offset - 64.0).abs() < 1e-12);
    }

    #[test]
    fn positive_contrast_steepens_the_ramp() {
        let map = AffineMap::brightness_contrast(50, 100);
        assert!(map.gain > 1.0);
        let mut buf = ramp();
        apply_brightness_contrast(&mut buf, 50, 100);
        let lo = buf.sample(20, 0, 0).unwrap();
        let hi = buf.sample(30, 0, 0).unwrap();
        assert!(hi - lo > 10);
    }

    #[test]
    fn inverse_recovers_unclamped_samples() {
        for contrast in (0..=200).step_by(7) {
            for brightness in (0..=200).step_by(11) {
                let map = AffineMap::brightness_contrast(contrast, brightness);
                let inverse = map.invert();
                let mut buf = ramp();
                apply_brightness_contrast(&mut buf, contrast, brightness);
                for x in 0..256u32 {
                    let out = buf.sample(x, 0, 0).unwrap();
                    if out == 0 || out == 255 {
                        continue;
                    }
                    let recovered = inverse.apply(f64::from(out)).round();
                    assert_eq!(
                        recovered,
                        f64::from(x),
                        "contrast={contrast} brightness={brightness} out={out}"
                    );
                }
            }
        }
    }

    #[test]
    fn sixteen_bit_offset_is_scaled() {
        let mut buf = PixelBuffer::new(2, 2, 3, BitDepth::Sixteen).unwrap();
        apply_brightness_contrast(&mut buf, 0, 1);
        assert_eq!(buf.sample(1, 1, 2), Some(257));
    }
}
