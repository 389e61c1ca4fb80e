//! Pipeline tunables, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Cascade scan parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Pyramid step between scales; must be > 1.
    pub scale_factor: f64,
    /// Minimum grouped neighbours for a candidate to survive. 0 disables grouping.
    pub min_neighbors: u32,
    /// Sliding-window step at scales up to 2x (1 beyond).
    pub window_stride: u32,
    /// Smallest face window, `[width, height]`.
    pub min_size: (u32, u32),
    /// Largest face window; `None` means the frame size.
    pub max_size: Option<(u32, u32)>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            window_stride: 2,
            min_size: (100, 100),
            max_size: None,
        }
    }
}

/// LBPH recognizer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbphConfig {
    pub radius: u32,
    pub neighbors: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    /// Distance at or above which a prediction carries no label. `None` = unbounded.
    pub threshold: Option<f64>,
}

impl Default for LbphConfig {
    fn default() -> Self {
        Self {
            radius: 1,
            neighbors: 8,
            grid_x: 8,
            grid_y: 8,
            threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Face samples collected before training.
    pub enroll_target: usize,
    /// Scores kept for the running average.
    pub history_capacity: usize,
    /// Side length of the square face sample.
    pub sample_size: u32,
    pub detector: DetectorConfig,
    pub recognizer: LbphConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enroll_target: 10,
            history_capacity: 20,
            sample_size: 100,
            detector: DetectorConfig::default(),
            recognizer: LbphConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enroll_target == 0 {
            return Err(ConfigError::Invalid("enroll_target must be at least 1".into()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be at least 1".into()));
        }

        let det = &self.detector;
        if !(det.scale_factor > 1.0) {
            return Err(ConfigError::Invalid(format!(
                "detector.scale_factor must be > 1.0, got {}",
                det.scale_factor
            )));
        }
        if det.window_stride == 0 {
            return Err(ConfigError::Invalid("detector.window_stride must be at least 1".into()));
        }
        if let Some((max_w, max_h)) = det.max_size {
            if max_w < det.min_size.0 || max_h < det.min_size.1 {
                return Err(ConfigError::Invalid("detector.max_size is smaller than min_size".into()));
            }
        }

        let rec = &self.recognizer;
        if rec.radius == 0 {
            return Err(ConfigError::Invalid("recognizer.radius must be at least 1".into()));
        }
        if !(1..=16).contains(&rec.neighbors) {
            return Err(ConfigError::Invalid(format!(
                "recognizer.neighbors must be in 1..=16, got {}",
                rec.neighbors
            )));
        }
        if rec.grid_x == 0 || rec.grid_y == 0 {
            return Err(ConfigError::Invalid("recognizer grid must be at least 1x1".into()));
        }
        let lbp_side = self.sample_size.saturating_sub(2 * rec.radius);
        if lbp_side < rec.grid_x || lbp_side < rec.grid_y {
            return Err(ConfigError::Invalid(format!(
                "sample_size {} leaves empty {}x{} grid cells at radius {}",
                self.sample_size, rec.grid_x, rec.grid_y, rec.radius
            )));
        }
        Ok(())
    }
}
