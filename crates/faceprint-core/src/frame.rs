//! Frame type and grayscale derivation.

use image::{DynamicImage, GrayImage, Luma, RgbaImage};
use std::time::Instant;

// BT.601 luma weights in 14-bit fixed point.
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;
const LUMA_SHIFT: u32 = 14;

/// A captured colour frame. Created per camera callback, dropped once annotated.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Convert any decoded image into an RGBA frame.
    pub fn from_dynamic(image: DynamicImage, sequence: u64) -> Self {
        Self::new(image.into_rgba8(), sequence)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Derive the single-channel detection buffer. Alpha is ignored.
    pub fn grayscale(&self) -> GrayImage {
        let (w, h) = self.image.dimensions();
        let mut gray = GrayImage::new(w, h);
        for (src, dst) in self.image.pixels().zip(gray.pixels_mut()) {
            let [r, g, b, _] = src.0;
            let y = (r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B
                + (1 << (LUMA_SHIFT - 1)))
                >> LUMA_SHIFT;
            *dst = Luma([y.min(255) as u8]);
        }
        gray
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let gray = self.grayscale();
        let data = gray.as_raw();
        if data.is_empty() {
            return 0.0;
        }
        data.iter().map(|&b| b as f32).sum::<f32>() / data.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_grayscale_primaries() {
        let mut img = RgbaImage::new(3, 1);
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 0, Rgba([0, 255, 0, 255]));
        img.put_pixel(2, 0, Rgba([0, 0, 255, 255]));
        let gray = Frame::new(img, 0).grayscale();
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 29);
    }

    #[test]
    fn test_grayscale_preserves_neutral() {
        for v in [0u8, 1, 128, 254, 255] {
            let img = RgbaImage::from_pixel(2, 2, Rgba([v, v, v, 0]));
            let gray = Frame::new(img, 0).grayscale();
            assert!(gray.pixels().all(|p| p.0[0] == v), "value {v}");
        }
    }

    #[test]
    fn test_from_dynamic_converts_to_rgba() {
        let dynamic = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 3, Luma([9])));
        let frame = Frame::from_dynamic(dynamic, 7);
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.image.get_pixel(0, 0).0, [9, 9, 9, 255]);
    }

    #[test]
    fn test_avg_brightness() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([100, 100, 100, 255]));
        assert!((Frame::new(img, 0).avg_brightness() - 100.0).abs() < 1e-3);
    }
}
