//! LBPH (local binary pattern histogram) enrolment and recognition.
//!
//! Each sample becomes a spatial histogram of circular LBP codes; a query is
//! scored by its chi-square distance to the nearest enrolled histogram.
//! Scores are distances: lower is closer, 0.0 is an identical texture.

use crate::config::LbphConfig;
use crate::types::{FaceSample, Label, Prediction};
use image::GrayImage;
use ndarray::{s, Array2};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerError {
    #[error("training needs exactly {expected} samples, got {actual}")]
    SampleCountMismatch { expected: usize, actual: usize },
    #[error("recognizer already trained; retraining is not supported")]
    AlreadyTrained,
    #[error("sample is {width}x{height}, too small for radius {radius} and a {grid_x}x{grid_y} grid")]
    SampleTooSmall {
        width: u32,
        height: u32,
        radius: u32,
        grid_x: u32,
        grid_y: u32,
    },
}

/// Builds a recognition model from enrolled samples.
///
/// A trainer is single-use: a second `train` call is a sequencing bug and
/// returns [`RecognizerError::AlreadyTrained`].
pub trait Trainer {
    type Model: Recognize;

    fn train(&mut self, samples: &[FaceSample]) -> Result<Self::Model, RecognizerError>;
}

/// A trained, immutable model.
pub trait Recognize {
    fn predict(&self, sample: &FaceSample) -> Prediction;
}

/// One-shot LBPH trainer expecting exactly `expected_samples` crops.
pub struct LbphTrainer {
    config: LbphConfig,
    expected_samples: usize,
    trained: bool,
}

impl LbphTrainer {
    pub fn new(config: LbphConfig, expected_samples: usize) -> Self {
        Self {
            config,
            expected_samples,
            trained: false,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }
}

impl Trainer for LbphTrainer {
    type Model = LbphModel;

    fn train(&mut self, samples: &[FaceSample]) -> Result<LbphModel, RecognizerError> {
        if self.trained {
            return Err(RecognizerError::AlreadyTrained);
        }
        if samples.len() != self.expected_samples {
            return Err(RecognizerError::SampleCountMismatch {
                expected: self.expected_samples,
                actual: samples.len(),
            });
        }

        let enrolled = samples
            .iter()
            .map(|s| Ok((s.label, spatial_histogram(&s.pixels, &self.config)?)))
            .collect::<Result<Vec<_>, RecognizerError>>()?;
        self.trained = true;

        tracing::info!(
            samples = enrolled.len(),
            histogram_len = enrolled.first().map(|(_, h)| h.len()).unwrap_or(0),
            "LBPH model trained"
        );

        Ok(LbphModel {
            config: self.config.clone(),
            enrolled,
        })
    }
}

/// Enrolled LBPH histograms with their labels.
#[derive(Debug, Clone)]
pub struct LbphModel {
    config: LbphConfig,
    enrolled: Vec<(Label, Vec<f32>)>,
}

impl LbphModel {
    pub fn len(&self) -> usize {
        self.enrolled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enrolled.is_empty()
    }
}

impl Recognize for LbphModel {
    fn predict(&self, sample: &FaceSample) -> Prediction {
        // Too small to histogram: nothing enrolled can be close.
        let Ok(query) = spatial_histogram(&sample.pixels, &self.config) else {
            return Prediction { label: None, distance: f64::MAX };
        };

        let mut best: Option<(Label, f64)> = None;
        for (label, hist) in &self.enrolled {
            if hist.len() != query.len() {
                continue;
            }
            let dist = chi_square(hist, &query);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((*label, dist));
            }
        }

        match best {
            Some((label, distance)) => {
                let within = self.config.threshold.map_or(true, |t| distance < t);
                Prediction {
                    label: within.then_some(label),
                    distance,
                }
            }
            None => Prediction { label: None, distance: f64::MAX },
        }
    }
}

/// Circular LBP codes with bilinear sampling.
///
/// Output is `(height - 2r) × (width - 2r)`. A neighbour sets its bit when its
/// interpolated value is above the centre or within float epsilon of it.
pub fn lbp_codes(gray: &GrayImage, radius: u32, neighbors: u32) -> Array2<u32> {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let r = radius as usize;
    if w <= 2 * r || h <= 2 * r {
        return Array2::zeros((0, 0));
    }
    let mut codes = Array2::<u32>::zeros((h - 2 * r, w - 2 * r));
    let px = |row: usize, col: usize| gray.as_raw()[row * w + col] as f32;

    for n in 0..neighbors {
        let angle = 2.0 * std::f64::consts::PI * n as f64 / neighbors as f64;
        let x = (radius as f64 * angle.cos()) as f32;
        let y = (-(radius as f64) * angle.sin()) as f32;
        let (fx, fy) = (x.floor() as isize, y.floor() as isize);
        let (cx, cy) = (x.ceil() as isize, y.ceil() as isize);
        let (tx, ty) = (x - fx as f32, y - fy as f32);
        let w1 = (1.0 - tx) * (1.0 - ty);
        let w2 = tx * (1.0 - ty);
        let w3 = (1.0 - tx) * ty;
        let w4 = tx * ty;

        for i in r..h - r {
            let (row_f, row_c) = ((i as isize + fy) as usize, (i as isize + cy) as usize);
            for j in r..w - r {
                let (col_f, col_c) = ((j as isize + fx) as usize, (j as isize + cx) as usize);
                let t = w1 * px(row_f, col_f) + w2 * px(row_f, col_c) + w3 * px(row_c, col_f) + w4 * px(row_c, col_c);
                let centre = px(i, j);
                if t > centre || (t - centre).abs() < f32::EPSILON {
                    codes[[i - r, j - r]] |= 1 << n;
                }
            }
        }
    }
    codes
}

/// Concatenated per-cell LBP histograms, each normalised by its cell's pixel count.
pub fn spatial_histogram(gray: &GrayImage, config: &LbphConfig) -> Result<Vec<f32>, RecognizerError> {
    let codes = lbp_codes(gray, config.radius, config.neighbors);
    let (rows, cols) = codes.dim();
    let cell_w = cols / config.grid_x as usize;
    let cell_h = rows / config.grid_y as usize;
    if cell_w == 0 || cell_h == 0 {
        return Err(RecognizerError::SampleTooSmall {
            width: gray.width(),
            height: gray.height(),
            radius: config.radius,
            grid_x: config.grid_x,
            grid_y: config.grid_y,
        });
    }

    let bins = 1usize << config.neighbors;
    let cells = (config.grid_x * config.grid_y) as usize;
    let mut hist = vec![0.0f32; bins * cells];
    let norm = 1.0 / (cell_w * cell_h) as f32;

    for gy in 0..config.grid_y as usize {
        for gx in 0..config.grid_x as usize {
            let offset = (gy * config.grid_x as usize + gx) * bins;
            let cell = codes.slice(s![gy * cell_h..(gy + 1) * cell_h, gx * cell_w..(gx + 1) * cell_w]);
            for &code in cell.iter() {
                hist[offset + code as usize] += norm;
            }
        }
    }
    Ok(hist)
}

/// Symmetric chi-square distance: `2 * Σ (a-b)² / (a+b)`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let (x, y) = (x as f64, y as f64);
            let denom = x + y;
            if denom.abs() > f64::EPSILON {
                (x - y).powi(2) / denom
            } else {
                0.0
            }
        })
        .sum();
    2.0 * sum
}
