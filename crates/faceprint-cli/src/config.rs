use faceprint_core::{ConfigError, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Cascade resource used when neither the config file nor the environment names one.
pub const DEFAULT_CASCADE_PATH: &str = "models/lbpcascade_frontalface.xml";

/// Effective runtime settings: an optional TOML file overlaid with `FACEPRINT_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// OpenCV LBP cascade XML for the face detector.
    pub cascade_path: PathBuf,
    /// Frame pacing of the producer.
    pub fps: u32,
    pub pipeline: PipelineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cascade_path: PathBuf::from(DEFAULT_CASCADE_PATH),
            fps: 30,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from `file` (if any), then apply the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay `FACEPRINT_*` values. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("FACEPRINT_CASCADE_PATH") {
            self.cascade_path = PathBuf::from(path);
        }
        let p = &mut self.pipeline;
        env_parse(&lookup, "FACEPRINT_ENROLL_TARGET", &mut p.enroll_target);
        env_parse(&lookup, "FACEPRINT_HISTORY_CAPACITY", &mut p.history_capacity);
        env_parse(&lookup, "FACEPRINT_SCALE_FACTOR", &mut p.detector.scale_factor);
        env_parse(&lookup, "FACEPRINT_MIN_NEIGHBORS", &mut p.detector.min_neighbors);
        let mut min_face = p.detector.min_size.0;
        if env_parse(&lookup, "FACEPRINT_MIN_FACE_SIZE", &mut min_face) {
            p.detector.min_size = (min_face, min_face);
        }
        env_parse(&lookup, "FACEPRINT_FPS", &mut self.fps);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 {
            return Err(ConfigError::Invalid("fps must be at least 1".into()));
        }
        self.pipeline.validate()
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> bool {
    let Some(raw) = lookup(key) else {
        return false;
    };
    match raw.trim().parse() {
        Ok(value) => {
            *slot = value;
            true
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.fps, 30);
        assert_eq!(s.cascade_path, PathBuf::from(DEFAULT_CASCADE_PATH));
        assert_eq!(s.pipeline.enroll_target, 10);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut s = Settings::default();
        s.apply_env(env(&[
            ("FACEPRINT_CASCADE_PATH", "/tmp/c.xml"),
            ("FACEPRINT_ENROLL_TARGET", "4"),
            ("FACEPRINT_HISTORY_CAPACITY", "7"),
            ("FACEPRINT_MIN_FACE_SIZE", "64"),
            ("FACEPRINT_SCALE_FACTOR", "1.25"),
            ("FACEPRINT_MIN_NEIGHBORS", "2"),
            ("FACEPRINT_FPS", "15"),
        ]));
        assert_eq!(s.cascade_path, PathBuf::from("/tmp/c.xml"));
        assert_eq!(s.pipeline.enroll_target, 4);
        assert_eq!(s.pipeline.history_capacity, 7);
        assert_eq!(s.pipeline.detector.min_size, (64, 64));
        assert_eq!(s.pipeline.detector.scale_factor, 1.25);
        assert_eq!(s.pipeline.detector.min_neighbors, 2);
        assert_eq!(s.fps, 15);
    }

    #[test]
    fn test_bad_env_value_ignored() {
        let mut s = Settings::default();
        s.apply_env(env(&[("FACEPRINT_ENROLL_TARGET", "lots"), ("FACEPRINT_MIN_FACE_SIZE", "-3")]));
        assert_eq!(s.pipeline.enroll_target, 10);
        assert_eq!(s.pipeline.detector.min_size, (100, 100));
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faceprint.toml");
        std::fs::write(
            &path,
            "fps = 5\ncascade_path = \"cascade.xml\"\n\n[pipeline]\nenroll_target = 3\n\n[pipeline.detector]\nmin_neighbors = 1\n",
        )
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut s: Settings = toml::from_str(&text).unwrap();
        assert_eq!(s.fps, 5);
        assert_eq!(s.pipeline.enroll_target, 3);
        assert_eq!(s.pipeline.detector.min_neighbors, 1);
        assert_eq!(s.pipeline.history_capacity, 20);

        s.apply_env(env(&[("FACEPRINT_ENROLL_TARGET", "8")]));
        assert_eq!(s.pipeline.enroll_target, 8);
        assert_eq!(s.fps, 5);
    }

    #[test]
    fn test_zero_fps_rejected() {
        let s = Settings { fps: 0, ..Settings::default() };
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = Settings::load(Some(Path::new("/nonexistent/faceprint.toml")));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_toml_round_trip_is_stable() {
        let s = Settings::default();
        let text = toml::to_string_pretty(&s).unwrap();
        let back: Settings = toml::from_str(&text).unwrap();
        assert_eq!(back, s);
    }
}
