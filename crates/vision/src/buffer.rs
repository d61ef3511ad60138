//! Owned pixel buffers and the format conversions shared by every component.
//!
//! A [`PixelBuffer`] is always one of four layouts: 8- or 16-bit samples with
//! one (gray) or three (RGB) channels. Conversions that change the layout
//! return a new buffer; the `*_mut`/in-place helpers only touch sample values.

use std::path::Path;

use image::{
    DynamicImage, GrayImage, ImageBuffer, ImageError, ImageFormat, Luma, Rgb, RgbImage,
    imageops::{self, FilterType},
};

use crate::error::{Result, VisionError};

pub type Gray16Image = ImageBuffer<Luma<u16>, Vec<u16>>;
pub type Rgb16Image = ImageBuffer<Rgb<u16>, Vec<u16>>;

/// Width of a single sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    pub fn bits(self) -> u8 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }

    /// Largest representable sample value.
    pub fn max_value(self) -> u16 {
        match self {
            BitDepth::Eight => u8::MAX as u16,
            BitDepth::Sixteen => u16::MAX,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Storage {
    Gray8(GrayImage),
    Rgb8(RgbImage),
    Gray16(Gray16Image),
    Rgb16(Rgb16Image),
}

/// Run `$body` against the inner image buffer regardless of layout.
macro_rules! with_image {
    ($storage:expr, $img:ident => $body:expr) => {
        match $storage {
            Storage::Gray8($img) => $body,
            Storage::Rgb8($img) => $body,
            Storage::Gray16($img) => $body,
            Storage::Rgb16($img) => $body,
        }
    };
}

/// Like [`with_image!`] but re-wraps the produced buffer in the same layout.
macro_rules! map_image {
    ($storage:expr, $img:ident => $body:expr) => {
        match $storage {
            Storage::Gray8($img) => Storage::Gray8($body),
            Storage::Rgb8($img) => Storage::Rgb8($body),
            Storage::Gray16($img) => Storage::Gray16($body),
            Storage::Rgb16($img) => Storage::Rgb16($body),
        }
    };
}

/// Sample types a buffer can hold.
pub(crate) trait Sample: Copy {
    fn to_f64(self) -> f64;
    fn saturate(value: f64) -> Self;
    fn widen(self) -> u16;
}

impl Sample for u8 {
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn saturate(value: f64) -> Self {
        value.round().clamp(0.0, f64::from(u8::MAX)) as u8
    }

    fn widen(self) -> u16 {
        u16::from(self)
    }
}

impl Sample for u16 {
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn saturate(value: f64) -> Self {
        value.round().clamp(0.0, f64::from(u16::MAX)) as u16
    }

    fn widen(self) -> u16 {
        self
    }
}

/// Rectangular grid of samples with homogeneous depth and channel count.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    storage: Storage,
}

impl PixelBuffer {
    /// Allocate a zero-filled buffer.
    pub fn new(width: u32, height: u32, channels: u8, depth: BitDepth) -> Result<Self> {
        check_dimensions(width, height)?;
        let storage = match (channels, depth) {
            (1, BitDepth::Eight) => Storage::Gray8(GrayImage::new(width, height)),
            (3, BitDepth::Eight) => Storage::Rgb8(RgbImage::new(width, height)),
            (1, BitDepth::Sixteen) => Storage::Gray16(Gray16Image::new(width, height)),
            (3, BitDepth::Sixteen) => Storage::Rgb16(Rgb16Image::new(width, height)),
            (other, _) => {
                return Err(VisionError::UnsupportedFormat(format!(
                    "{other} channels (expected 1 or 3)"
                )));
            }
        };
        Ok(Self { storage })
    }

    /// Wrap raw 8-bit samples laid out row-major, `channels` interleaved.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Result<Self> {
        check_dimensions(width, height)?;
        let expected = width as usize * height as usize * channels as usize;
        if data.len() != expected {
            return Err(VisionError::argument(format!(
                "unexpected frame buffer size: got {} bytes, expected {expected}",
                data.len()
            )));
        }
        let storage = match channels {
            1 => GrayImage::from_raw(width, height, data).map(Storage::Gray8),
            3 => RgbImage::from_raw(width, height, data).map(Storage::Rgb8),
            other => {
                return Err(VisionError::UnsupportedFormat(format!(
                    "{other} channels (expected 1 or 3)"
                )));
            }
        };
        storage
            .map(|storage| Self { storage })
            .ok_or_else(|| VisionError::argument("sample buffer does not match dimensions"))
    }

    pub fn from_gray8(image: GrayImage) -> Result<Self> {
        check_dimensions(image.width(), image.height())?;
        Ok(Self {
            storage: Storage::Gray8(image),
        })
    }

    pub fn from_rgb8(image: RgbImage) -> Result<Self> {
        check_dimensions(image.width(), image.height())?;
        Ok(Self {
            storage: Storage::Rgb8(image),
        })
    }

    /// Import a decoded image, dropping alpha and narrowing float formats to 16 bit.
    pub fn from_dynamic(image: DynamicImage) -> Result<Self> {
        check_dimensions(image.width(), image.height())?;
        let storage = match image {
            DynamicImage::ImageLuma8(img) => Storage::Gray8(img),
            DynamicImage::ImageRgb8(img) => Storage::Rgb8(img),
            DynamicImage::ImageLuma16(img) => Storage::Gray16(img),
            DynamicImage::ImageRgb16(img) => Storage::Rgb16(img),
            DynamicImage::ImageLumaA8(_) => Storage::Gray8(image.to_luma8()),
            DynamicImage::ImageRgba8(_) => Storage::Rgb8(image.to_rgb8()),
            DynamicImage::ImageLumaA16(_) => Storage::Gray16(image.to_luma16()),
            _ => Storage::Rgb16(image.to_rgb16()),
        };
        Ok(Self { storage })
    }

    /// Decode an image file from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|err| match err {
            ImageError::IoError(io) => VisionError::Io(io),
            other => VisionError::UnsupportedFormat(format!("{}: {other}", path.display())),
        })?;
        Self::from_dynamic(image)
    }

    /// Persist the buffer losslessly as PNG.
    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        with_image!(&self.storage, img => img.save_with_format(path, ImageFormat::Png)).map_err(
            |err| VisionError::EncodingFailure {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
        )
    }

    pub fn width(&self) -> u32 {
        with_image!(&self.storage, img => img.width())
    }

    pub fn height(&self) -> u32 {
        with_image!(&self.storage, img => img.height())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn channels(&self) -> u8 {
        match self.storage {
            Storage::Gray8(_) | Storage::Gray16(_) => 1,
            Storage::Rgb8(_) | Storage::Rgb16(_) => 3,
        }
    }

    pub fn depth(&self) -> BitDepth {
        match self.storage {
            Storage::Gray8(_) | Storage::Rgb8(_) => BitDepth::Eight,
            Storage::Gray16(_) | Storage::Rgb16(_) => BitDepth::Sixteen,
        }
    }

    /// Read one sample; `None` when the coordinate or channel is out of range.
    pub fn sample(&self, x: u32, y: u32, channel: u8) -> Option<u16> {
        if x >= self.width() || y >= self.height() || channel >= self.channels() {
            return None;
        }
        let c = channel as usize;
        Some(with_image!(&self.storage, img => img.get_pixel(x, y).0[c].widen()))
    }

    /// Borrow the samples when the buffer is 8-bit grayscale.
    pub fn as_gray8(&self) -> Option<&GrayImage> {
        match &self.storage {
            Storage::Gray8(img) => Some(img),
            _ => None,
        }
    }

    /// Copy the buffer out as an `image` crate value.
    pub fn to_dynamic(&self) -> DynamicImage {
        self.clone().into_dynamic()
    }

    pub fn into_dynamic(self) -> DynamicImage {
        match self.storage {
            Storage::Gray8(img) => DynamicImage::ImageLuma8(img),
            Storage::Rgb8(img) => DynamicImage::ImageRgb8(img),
            Storage::Gray16(img) => DynamicImage::ImageLuma16(img),
            Storage::Rgb16(img) => DynamicImage::ImageRgb16(img),
        }
    }

    /// Resample into a new buffer of exactly `width` x `height`.
    pub fn resize(&self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VisionError::geometry(format!(
                "resize target {width}x{height} must be non-empty"
            )));
        }
        let storage = map_image!(
            &self.storage,
            img => imageops::resize(img, width, height, FilterType::Triangle)
        );
        Ok(Self { storage })
    }

    /// Copy the `w` x `h` rectangle at (`x`, `y`). Out-of-bounds rectangles are
    /// rejected rather than clamped.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Result<Self> {
        let (width, height) = self.dimensions();
        let right = x.checked_add(w);
        let bottom = y.checked_add(h);
        let fits = matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height);
        if w == 0 || h == 0 || !fits {
            return Err(VisionError::geometry(format!(
                "crop {w}x{h} at ({x}, {y}) exceeds {width}x{height} buffer"
            )));
        }
        let storage = map_image!(
            &self.storage,
            img => imageops::crop_imm(img, x, y, w, h).to_image()
        );
        Ok(Self { storage })
    }

    /// Single-channel copy of the buffer. Gray input yields an equal clone,
    /// never an alias of `self`.
    pub fn to_grayscale(&self) -> Self {
        let storage = match &self.storage {
            Storage::Gray8(_) | Storage::Gray16(_) => return self.clone(),
            Storage::Rgb8(img) => Storage::Gray8(imageops::grayscale(img)),
            Storage::Rgb16(img) => Storage::Gray16(imageops::grayscale(img)),
        };
        Self { storage }
    }

    /// Copy with samples rescaled to `depth`; same depth yields a clone.
    pub fn to_depth(&self, depth: BitDepth) -> Self {
        if self.depth() == depth {
            return self.clone();
        }
        let dynamic = self.to_dynamic();
        let storage = match (self.channels(), depth) {
            (1, BitDepth::Eight) => Storage::Gray8(dynamic.to_luma8()),
            (_, BitDepth::Eight) => Storage::Rgb8(dynamic.to_rgb8()),
            (1, BitDepth::Sixteen) => Storage::Gray16(dynamic.to_luma16()),
            (_, BitDepth::Sixteen) => Storage::Rgb16(dynamic.to_rgb16()),
        };
        Self { storage }
    }

    /// 8-bit grayscale copy, the input contract of the histogram and detector.
    pub fn to_gray8(&self) -> GrayImage {
        match &self.storage {
            Storage::Gray8(img) => img.clone(),
            _ => self.to_grayscale().to_dynamic().to_luma8(),
        }
    }

    /// Fill every sample with zero.
    pub fn clear(&mut self) {
        self.map_samples(|_| 0.0);
    }

    /// Mirror the buffer around its vertical axis.
    pub fn flip_horizontal(&mut self) {
        with_image!(&mut self.storage, img => imageops::flip_horizontal_in_place(img));
    }

    /// Rewrite every sample through `f`, saturating to the sample range.
    pub(crate) fn map_samples(&mut self, mut f: impl FnMut(f64) -> f64) {
        with_image!(&mut self.storage, img => {
            for sample in img.iter_mut() {
                *sample = Sample::saturate(f(sample.to_f64()));
            }
        });
    }

    /// Paint every channel of one pixel with an 8-bit intensity, scaled up for
    /// 16-bit buffers. Coordinates outside the buffer are ignored.
    pub(crate) fn set_level(&mut self, x: i64, y: i64, level: u8) {
        if x < 0 || y < 0 || x >= i64::from(self.width()) || y >= i64::from(self.height()) {
            return;
        }
        let (x, y) = (x as u32, y as u32);
        let wide = u16::from(level) * 257;
        match &mut self.storage {
            Storage::Gray8(img) => img.put_pixel(x, y, Luma([level])),
            Storage::Rgb8(img) => img.put_pixel(x, y, Rgb([level; 3])),
            Storage::Gray16(img) => img.put_pixel(x, y, Luma([wide])),
            Storage::Rgb16(img) => img.put_pixel(x, y, Rgb([wide; 3])),
        }
    }
}

fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(VisionError::geometry(format!(
            "buffer dimensions {width}x{height} must be positive"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_rgb(width: u32, height: u32) -> PixelBuffer {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 10) as u8, (y * 10) as u8, ((x + y) * 5) as u8])
        });
        PixelBuffer::from_rgb8(img).unwrap()
    }

    #[test]
    fn new_rejects_unsupported_channel_counts() {
        assert!(matches!(
            PixelBuffer::new(4, 4, 4, BitDepth::Eight),
            Err(VisionError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            PixelBuffer::new(0, 4, 1, BitDepth::Eight),
            Err(VisionError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn from_raw_checks_length() {
        let err = PixelBuffer::from_raw(2, 2, 3, vec![0; 11]).unwrap_err();
        assert!(matches!(err, VisionError::InvalidArgument(_)));
        let buf = PixelBuffer::from_raw(2, 2, 3, vec![7; 12]).unwrap();
        assert_eq!(buf.channels(), 3);
        assert_eq!(buf.sample(1, 1, 2), Some(7));
    }

    #[test]
    fn crop_copies_requested_rectangle() {
        let buf = gradient_rgb(8, 6);
        let sub = buf.crop(2, 1, 4, 3).unwrap();
        assert_eq!(sub.dimensions(), (4, 3));
        assert_eq!(sub.sample(0, 0, 0), buf.sample(2, 1, 0));
        assert_eq!(sub.sample(3, 2, 1), buf.sample(5, 3, 1));
    }

    #[test]
    fn crop_out_of_bounds_is_rejected() {
        let buf = gradient_rgb(8, 6);
        assert!(matches!(
            buf.crop(5, 0, 4, 2),
            Err(VisionError::InvalidGeometry(_))
        ));
        assert!(matches!(
            buf.crop(0, 5, 1, 2),
            Err(VisionError::InvalidGeometry(_))
        ));
        assert!(matches!(
            buf.crop(u32::MAX, 0, 2, 2),
            Err(VisionError::InvalidGeometry(_))
        ));
        assert!(buf.crop(0, 0, 8, 6).is_ok());
    }

    #[test]
    fn resize_produces_exact_size() {
        let buf = gradient_rgb(10, 7);
        let out = buf.resize(33, 4).unwrap();
        assert_eq!(out.dimensions(), (33, 4));
        assert_eq!(out.channels(), 3);
        assert_eq!(buf.dimensions(), (10, 7));
        assert!(buf.resize(0, 4).is_err());
    }

    #[test]
    fn grayscale_reduces_channels() {
        let buf = gradient_rgb(4, 4);
        let gray = buf.to_grayscale();
        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.depth(), BitDepth::Eight);
        assert_eq!(gray.to_grayscale(), gray);
    }

    #[test]
    fn depth_round_trip_preserves_values() {
        let buf = gradient_rgb(3, 3);
        let wide = buf.to_depth(BitDepth::Sixteen);
        assert_eq!(wide.depth(), BitDepth::Sixteen);
        assert_eq!(wide.sample(1, 2, 0), buf.sample(1, 2, 0).map(|v| v * 257));
        assert_eq!(wide.to_depth(BitDepth::Eight), buf);
    }

    #[test]
    fn clear_and_flip_mutate_in_place() {
        let mut buf = gradient_rgb(5, 2);
        let left = buf.sample(0, 1, 0);
        buf.flip_horizontal();
        assert_eq!(buf.sample(4, 1, 0), left);
        buf.clear();
        for (x, y, c) in (0..5).flat_map(|x| (0..2).flat_map(move |y| (0..3).map(move |c| (x, y, c)))) {
            assert_eq!(buf.sample(x, y, c), Some(0));
        }
        assert_eq!(buf.dimensions(), (5, 2));
    }
}
