use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Identity label attached to enrolled samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub i32);

/// The single synthetic identity every enrolled sample carries.
///
/// Enrolment is one-person: the model answers "how close is this face to the
/// enrolled one", never "which of several people is this".
pub const ENROLLED_LABEL: Label = Label(1);

/// Axis-aligned face rectangle in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Intersect with a `width`×`height` image. `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<FaceRegion> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.right().min(width) - self.x;
        let h = self.bottom().min(height) - self.y;
        if w == 0 || h == 0 {
            return None;
        }
        Some(FaceRegion::new(self.x, self.y, w, h))
    }
}

/// A fixed-size single-channel face crop, tagged with an identity label.
#[derive(Debug, Clone)]
pub struct FaceSample {
    pub pixels: GrayImage,
    pub label: Label,
}

impl FaceSample {
    /// Crop `region` out of `gray` and resize it to `size`×`size`.
    ///
    /// Returns `None` when the region lies entirely outside the image.
    pub fn from_region(gray: &GrayImage, region: &FaceRegion, size: u32) -> Option<FaceSample> {
        let clamped = region.clamp_to(gray.width(), gray.height())?;
        let crop = imageops::crop_imm(gray, clamped.x, clamped.y, clamped.width, clamped.height)
            .to_image();
        let pixels = if crop.dimensions() == (size, size) {
            crop
        } else {
            imageops::resize(&crop, size, size, FilterType::Triangle)
        };
        Some(FaceSample {
            pixels,
            label: ENROLLED_LABEL,
        })
    }
}

/// Output of querying a trained model with one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// Nearest enrolled label, or `None` when the distance reached the model threshold.
    pub label: Option<Label>,
    /// Chi-square histogram distance. Lower is closer; 0.0 is an identical texture.
    pub distance: f64,
}

impl Prediction {
    /// Integer score shown on the overlay and kept in the history (truncated toward zero).
    pub fn score(&self) -> i32 {
        self.distance as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_clamp_inside() {
        let r = FaceRegion::new(10, 10, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(r));
    }

    #[test]
    fn test_clamp_overhanging() {
        let r = FaceRegion::new(90, 95, 20, 20);
        assert_eq!(r.clamp_to(100, 100), Some(FaceRegion::new(90, 95, 10, 5)));
    }

    #[test]
    fn test_clamp_outside() {
        let r = FaceRegion::new(100, 0, 20, 20);
        assert_eq!(r.clamp_to(100, 100), None);
    }

    #[test]
    fn test_sample_has_fixed_shape_and_label() {
        let gray = GrayImage::from_pixel(320, 240, Luma([77]));
        let sample = FaceSample::from_region(&gray, &FaceRegion::new(40, 30, 150, 150), 100).unwrap();
        assert_eq!(sample.pixels.dimensions(), (100, 100));
        assert_eq!(sample.label, ENROLLED_LABEL);
        assert!(sample.pixels.pixels().all(|p| p.0[0] == 77));
    }

    #[test]
    fn test_sample_crops_the_region() {
        let gray = GrayImage::from_fn(200, 200, |x, _| if x < 100 { Luma([0]) } else { Luma([255]) });
        let sample = FaceSample::from_region(&gray, &FaceRegion::new(100, 0, 100, 100), 100).unwrap();
        assert!(sample.pixels.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_score_truncates() {
        let p = Prediction { label: Some(ENROLLED_LABEL), distance: 41.97 };
        assert_eq!(p.score(), 41);
    }
}
