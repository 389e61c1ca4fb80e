//! Multi-scale sliding-window face detection over an LBP cascade.
//!
//! Scans an image pyramid with the cascade's base window, then merges the raw
//! hits into face rectangles by neighbour grouping.

use crate::cascade::{Cascade, IntegralImage};
use crate::config::DetectorConfig;
use crate::types::FaceRegion;
use image::imageops::{self, FilterType};
use image::GrayImage;
use std::borrow::Cow;
use std::path::Path;
use thiserror::Error;

/// Relative tolerance for two hits to count as the same face.
const GROUP_EPS: f64 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0} (place lbpcascade_frontalface.xml in models/ or set FACEPRINT_CASCADE_PATH)")]
    ModelNotFound(String),
    #[error("failed to read cascade {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("cascade xml: {0}")]
    Xml(#[from] roxmltree::Error),
    #[error("invalid cascade: {0}")]
    InvalidCascade(String),
    #[error("unsupported cascade: {0}")]
    Unsupported(String),
    #[error("invalid detector config: {0}")]
    InvalidConfig(String),
}

/// Locates candidate face rectangles in a grayscale image.
///
/// An empty result is a normal outcome, not an error. Callers that are
/// single-face take index 0: the first rectangle in scan order, not the
/// largest or most confident.
pub trait FaceDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError>;
}

/// LBP cascade detector.
pub struct CascadeDetector {
    cascade: Cascade,
    config: DetectorConfig,
}

impl CascadeDetector {
    /// Load a cascade XML file. Fails if the file is missing or unusable.
    pub fn load(path: &Path, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !path.exists() {
            return Err(DetectorError::ModelNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| DetectorError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let cascade = Cascade::from_xml_str(&text)?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window_size(),
            stages = cascade.stage_count(),
            features = cascade.feature_count(),
            "loaded LBP cascade"
        );

        Self::new(cascade, config)
    }

    pub fn new(cascade: Cascade, config: DetectorConfig) -> Result<Self, DetectorError> {
        if !(config.scale_factor > 1.0) {
            return Err(DetectorError::InvalidConfig(format!(
                "scale_factor must be > 1.0, got {}",
                config.scale_factor
            )));
        }
        if config.window_stride == 0 {
            return Err(DetectorError::InvalidConfig("window_stride must be at least 1".into()));
        }
        Ok(Self { cascade, config })
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    /// Raw cascade hits over all scales, before grouping.
    pub fn candidates(&self, image: &GrayImage) -> Vec<FaceRegion> {
        let (img_w, img_h) = image.dimensions();
        let (win_w, win_h) = self.cascade.window_size();
        let mut hits = Vec::new();

        for factor in pyramid_factors((img_w, img_h), (win_w, win_h), &self.config) {
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            let scaled: Cow<GrayImage> = if (scaled_w, scaled_h) == (img_w, img_h) {
                Cow::Borrowed(image)
            } else {
                Cow::Owned(imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle))
            };
            let integral = IntegralImage::new(&scaled);

            let step = if factor > 2.0 { 1 } else { self.config.window_stride as usize };
            let face_w = (win_w as f64 * factor).round() as u32;
            let face_h = (win_h as f64 * factor).round() as u32;

            for y in (0..=scaled_h - win_h).step_by(step) {
                for x in (0..=scaled_w - win_w).step_by(step) {
                    if self.cascade.classify(&integral, x, y) {
                        hits.push(FaceRegion::new(
                            (x as f64 * factor).round() as u32,
                            (y as f64 * factor).round() as u32,
                            face_w,
                            face_h,
                        ));
                    }
                }
            }
        }

        hits
    }
}

impl FaceDetector for CascadeDetector {
    fn detect(&mut self, image: &GrayImage) -> Result<Vec<FaceRegion>, DetectorError> {
        let hits = self.candidates(image);
        let faces = group_rectangles(&hits, self.config.min_neighbors, GROUP_EPS);
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            hits = hits.len(),
            faces = faces.len(),
            "cascade scan"
        );
        Ok(faces)
    }
}

/// Scale factors whose window fits `[min_size, max_size]` and whose scaled
/// image still holds at least one base window.
fn pyramid_factors(image: (u32, u32), window: (u32, u32), config: &DetectorConfig) -> Vec<f64> {
    let (img_w, img_h) = image;
    let (win_w, win_h) = window;
    let (min_w, min_h) = config.min_size;
    let (max_w, max_h) = match config.max_size {
        Some((w, h)) if w > 0 && h > 0 => (w, h),
        _ => (img_w, img_h),
    };

    let mut factors = Vec::new();
    let mut factor = 1.0f64;
    loop {
        let scaled_w = (img_w as f64 / factor).round() as u32;
        let scaled_h = (img_h as f64 / factor).round() as u32;
        if scaled_w < win_w || scaled_h < win_h {
            break;
        }
        let face_w = (win_w as f64 * factor).round() as u32;
        let face_h = (win_h as f64 * factor).round() as u32;
        if face_w > max_w || face_h > max_h {
            break;
        }
        if face_w >= min_w && face_h >= min_h {
            factors.push(factor);
        }
        factor *= config.scale_factor;
    }
    factors
}

fn similar(a: &FaceRegion, b: &FaceRegion, eps: f64) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge overlapping hits into faces.
///
/// Hits are partitioned into classes of mutually similar rectangles; each
/// class becomes its averaged rectangle. Classes with `group_threshold` or
/// fewer members are dropped, as are rectangles nested inside a stronger
/// neighbour. Classes are emitted in order of their first hit. A zero
/// threshold returns the hits unchanged.
pub fn group_rectangles(rects: &[FaceRegion], group_threshold: u32, eps: f64) -> Vec<FaceRegion> {
    if group_threshold == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj.max(ri)] = ri.min(rj);
                }
            }
        }
    }

    // Class ids in order of first appearance.
    let mut class_of_root = vec![usize::MAX; n];
    let mut sums: Vec<[u64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        if class_of_root[root] == usize::MAX {
            class_of_root[root] = sums.len();
            sums.push([0; 4]);
            counts.push(0);
        }
        let c = class_of_root[root];
        sums[c][0] += r.x as u64;
        sums[c][1] += r.y as u64;
        sums[c][2] += r.width as u64;
        sums[c][3] += r.height as u64;
        counts[c] += 1;
    }

    let averaged: Vec<FaceRegion> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &count)| {
            let avg = |v: u64| (v as f64 / count as f64).round() as u32;
            FaceRegion::new(avg(s[0]), avg(s[1]), avg(s[2]), avg(s[3]))
        })
        .collect();

    let mut faces = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= group_threshold {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= group_threshold {
                return false;
            }
            let dx = (r2.width as f64 * eps).round() as i64;
            let dy = (r2.height as f64 * eps).round() as i64;
            r1.x as i64 >= r2.x as i64 - dx
                && r1.y as i64 >= r2.y as i64 - dy
                && r1.right() as i64 <= r2.right() as i64 + dx
                && r1.bottom() as i64 <= r2.bottom() as i64 + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            faces.push(*r1);
        }
    }
    faces
}
