use image::GrayImage;

/// Summed-area tables of pixel values and squared pixel values.
///
/// Both tables carry a zero first row and column, so entry `(x, y)` holds the
/// sum over `[0, x) x [0, y)`.
#[derive(Debug)]
pub(crate) struct IntegralImage {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(image: &GrayImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let stride = width + 1;
        let mut sum = vec![0u64; stride * (height + 1)];
        let mut sq_sum = vec![0u64; stride * (height + 1)];

        for y in 0..height {
            let mut row = 0u64;
            let mut sq_row = 0u64;
            for x in 0..width {
                let v = u64::from(image.get_pixel(x as u32, y as u32)[0]);
                row += v;
                sq_row += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[at - stride] + row;
                sq_sum[at] = sq_sum[at - stride] + sq_row;
            }
        }

        Self {
            stride,
            sum,
            sq_sum,
        }
    }

    pub(crate) fn sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        self.rect(&self.sum, x, y, width, height)
    }

    pub(crate) fn sq_sum(&self, x: u32, y: u32, width: u32, height: u32) -> u64 {
        self.rect(&self.sq_sum, x, y, width, height)
    }

    fn rect(&self, table: &[u64], x: u32, y: u32, width: u32, height: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        let at = |x: usize, y: usize| table[y * self.stride + x];
        (at(x1, y1) + at(x0, y0)) - (at(x1, y0) + at(x0, y1))
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn rect_sums_match_brute_force() {
        let image = GrayImage::from_fn(7, 5, |x, y| Luma([(x * 10 + y * 3) as u8]));
        let integral = IntegralImage::new(&image);
        let (x, y, w, h) = (2, 1, 4, 3);
        let mut expected = 0u64;
        let mut expected_sq = 0u64;
        for yy in y..y + h {
            for xx in x..x + w {
                let v = u64::from(image.get_pixel(xx, yy)[0]);
                expected += v;
                expected_sq += v * v;
            }
        }
        assert_eq!(integral.sum(x, y, w, h), expected);
        assert_eq!(integral.sq_sum(x, y, w, h), expected_sq);
        assert_eq!(integral.sum(0, 0, 7, 5), image.pixels().map(|p| u64::from(p[0])).sum::<u64>());
    }
}
