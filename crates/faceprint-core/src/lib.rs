//! faceprint-core — single-subject face enrolment and recognition.
//!
//! Detects faces with an LBP cascade, enrols the first N detections as one
//! identity, trains an LBPH model, then scores every later detection against
//! it. Everything here is synchronous and owns no threads; the binary decides
//! where the pipeline runs.

pub mod cascade;
pub mod collector;
pub mod config;
pub mod detector;
pub mod frame;
pub mod history;
pub mod overlay;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use config::{ConfigError, DetectorConfig, LbphConfig, PipelineConfig};
pub use detector::{CascadeDetector, DetectorError, FaceDetector};
pub use frame::Frame;
pub use history::ConfidenceHistory;
pub use pipeline::{FrameOutcome, Phase, Pipeline, PipelineError, Recognition};
pub use recognizer::{LbphModel, LbphTrainer, Recognize, Trainer};
pub use types::{FaceRegion, FaceSample, Label, Prediction};
