//! Intensity histograms and their bar-chart rendering.

use image::{GrayImage, Luma};
use tracing::debug;

use crate::{
    buffer::PixelBuffer,
    error::{Result, VisionError},
};

pub const DEFAULT_BIN_COUNT: usize = 64;
pub const DEFAULT_RANGE: (f64, f64) = (0.0, 256.0);

#[derive(Clone, Debug, PartialEq)]
pub struct HistogramOptions {
    /// Half-open value range `[lo, hi)`; samples outside it are not counted.
    pub range: (f64, f64),
    pub bin_count: usize,
    /// Chart `(width, height)`; defaults to the source dimensions.
    pub chart_size: Option<(u32, u32)>,
}

impl Default for HistogramOptions {
    fn default() -> Self {
        Self {
            range: DEFAULT_RANGE,
            bin_count: DEFAULT_BIN_COUNT,
            chart_size: None,
        }
    }
}

impl HistogramOptions {
    fn validate(&self) -> Result<()> {
        let (lo, hi) = self.range;
        if self.bin_count == 0 {
            return Err(VisionError::argument("histogram needs at least one bin"));
        }
        if lo.is_nan() || hi.is_nan() || lo >= hi {
            return Err(VisionError::argument(format!(
                "histogram range [{lo}, {hi}) is empty"
            )));
        }
        if matches!(self.chart_size, Some((w, h)) if w == 0 || h == 0) {
            return Err(VisionError::argument("histogram chart size must be non-empty"));
        }
        Ok(())
    }
}

/// Bin counters for one grayscale buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    bins: Vec<u64>,
}

impl Histogram {
    /// Count the samples of `buffer` after reducing it to 8-bit grayscale.
    pub fn compute(buffer: &PixelBuffer, options: &HistogramOptions) -> Result<Self> {
        options.validate()?;
        let gray = buffer.to_gray8();

        let (lo, hi) = options.range;
        let bin_count = options.bin_count;
        let scale = bin_count as f64 / (hi - lo);
        let mut bins = vec![0u64; bin_count];
        for &sample in gray.iter() {
            let value = f64::from(sample);
            if value < lo || value >= hi {
                continue;
            }
            let idx = (((value - lo) * scale) as usize).min(bin_count - 1);
            bins[idx] += 1;
        }
        Ok(Self { bins })
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Largest bin; any of several equal maxima is as good as another.
    pub fn max_bin(&self) -> u64 {
        self.bins.iter().copied().max().unwrap_or(0)
    }

    /// Bar heights scaled so the fullest bin spans `height`. An empty
    /// histogram yields all-zero bars.
    pub fn bar_heights(&self, height: u32) -> Vec<u32> {
        let max = self.max_bin();
        if max == 0 {
            return vec![0; self.bins.len()];
        }
        let scale = f64::from(height) / max as f64;
        self.bins
            .iter()
            .map(|&count| ((count as f64 * scale).round() as u32).min(height))
            .collect()
    }

    /// Black bars on a white 8-bit single-channel chart.
    pub fn render(&self, width: u32, height: u32) -> Result<PixelBuffer> {
        let bin_count = self.bins.len() as u64;
        let mut chart = GrayImage::from_pixel(width, height, Luma([255]));
        for (i, bar) in self.bar_heights(height).into_iter().enumerate() {
            let i = i as u64;
            let x0 = (i * u64::from(width) / bin_count) as u32;
            let x1 = ((i + 1) * u64::from(width) / bin_count) as u32;
            for y in height - bar..height {
                for x in x0..x1 {
                    chart.put_pixel(x, y, Luma([0]));
                }
            }
        }
        PixelBuffer::from_gray8(chart)
    }
}

/// Compute the histogram of `buffer` and render it as a bar chart. The source
/// buffer is never modified.
pub fn build_histogram(buffer: &PixelBuffer, options: &HistogramOptions) -> Result<PixelBuffer> {
    let histogram = Histogram::compute(buffer, options)?;
    let (width, height) = options.chart_size.unwrap_or(buffer.dimensions());
    debug!(
        bins = options.bin_count,
        max = histogram.max_bin(),
        width,
        height,
        "rendering histogram"
    );
    histogram.render(width, height)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};

    use super::*;
    use crate::buffer::BitDepth;

    fn constant(width: u32, height: u32, value: u8) -> PixelBuffer {
        PixelBuffer::from_gray8(GrayImage::from_pixel(width, height, Luma([value]))).unwrap()
    }

    fn column_is_black(chart: &PixelBuffer, x: u32) -> bool {
        (0..chart.height()).all(|y| chart.sample(x, y, 0) == Some(0))
    }

    fn column_is_white(chart: &PixelBuffer, x: u32) -> bool {
        (0..chart.height()).all(|y| chart.sample(x, y, 0) == Some(255))
    }

    #[test]
    fn constant_buffer_fills_a_single_bin() {
        let buf = constant(128, 40, 100);
        let options = HistogramOptions::default();
        let histogram = Histogram::compute(&buf, &options).unwrap();
        let nonzero: Vec<usize> = histogram
            .bins()
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(nonzero, vec![25]);
        assert_eq!(histogram.max_bin(), 128 * 40);

        let chart = build_histogram(&buf, &options).unwrap();
        assert_eq!(chart.dimensions(), (128, 40));
        assert_eq!(chart.channels(), 1);
        // 128 px / 64 bins: bin 25 owns columns 50 and 51.
        assert!(column_is_black(&chart, 50));
        assert!(column_is_black(&chart, 51));
        for x in (0..128).filter(|x| *x != 50 && *x != 51) {
            assert!(column_is_white(&chart, x), "column {x}");
        }
    }

    #[test]
    fn all_zero_histogram_renders_blank_chart() {
        let buf = constant(16, 16, 200);
        let options = HistogramOptions {
            range: (0.0, 100.0),
            ..HistogramOptions::default()
        };
        let histogram = Histogram::compute(&buf, &options).unwrap();
        assert_eq!(histogram.max_bin(), 0);
        assert!(histogram.bar_heights(16).iter().all(|h| *h == 0));

        let chart = build_histogram(&buf, &options).unwrap();
        assert!((0..16).all(|x| column_is_white(&chart, x)));
    }

    #[test]
    fn samples_outside_range_are_excluded() {
        let img = GrayImage::from_fn(4, 1, |x, _| Luma([[5, 50, 150, 250][x as usize]]));
        let buf = PixelBuffer::from_gray8(img).unwrap();
        let options = HistogramOptions {
            range: (40.0, 200.0),
            bin_count: 4,
            chart_size: None,
        };
        let histogram = Histogram::compute(&buf, &options).unwrap();
        assert_eq!(histogram.bins(), &[1, 0, 1, 0]);
    }

    #[test]
    fn colour_input_is_converted_and_left_untouched() {
        let img = RgbImage::from_pixel(8, 8, Rgb([255, 255, 255]));
        let buf = PixelBuffer::from_rgb8(img).unwrap();
        let before = buf.clone();
        let chart = build_histogram(
            &buf,
            &HistogramOptions {
                chart_size: Some((64, 10)),
                ..HistogramOptions::default()
            },
        )
        .unwrap();
        assert_eq!(buf, before);
        assert_eq!(chart.dimensions(), (64, 10));
        assert!(column_is_black(&chart, 63));
        assert_eq!(chart.depth(), BitDepth::Eight);
    }

    #[test]
    fn sixteen_bit_input_is_binned_on_the_eight_bit_scale() {
        let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(32, 16, Luma([100 * 257]));
        let buf = PixelBuffer::from_dynamic(DynamicImage::ImageLuma16(img)).unwrap();
        let histogram = Histogram::compute(&buf, &HistogramOptions::default()).unwrap();
        assert_eq!(histogram.max_bin(), 512);
        assert_eq!(histogram.bins()[25], 512);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let buf = constant(4, 4, 1);
        for options in [
            HistogramOptions {
                bin_count: 0,
                ..HistogramOptions::default()
            },
            HistogramOptions {
                range: (10.0, 10.0),
                ..HistogramOptions::default()
            },
            HistogramOptions {
                chart_size: Some((0, 5)),
                ..HistogramOptions::default()
            },
        ] {
            assert!(matches!(
                build_histogram(&buf, &options),
                Err(VisionError::InvalidArgument(_))
            ));
        }
    }
}
