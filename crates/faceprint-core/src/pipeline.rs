//! Per-frame recognition pipeline.
//!
//! grayscale → detect → (collect | recognize) → annotate. The pipeline owns
//! all mutable state (samples, history, phase, model) and expects frames one
//! at a time from a single thread.

use crate::collector::{enrolment_status, Offer, SampleCollector};
use crate::config::{ConfigError, PipelineConfig};
use crate::detector::{CascadeDetector, DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::history::{ConfidenceHistory, HistoryError};
use crate::overlay;
use crate::recognizer::{LbphTrainer, Recognize, RecognizerError, Trainer};
use crate::types::{FaceRegion, FaceSample, Label};
use std::path::Path;
use thiserror::Error;

pub const TRAINING_STATUS: &str = "training...";
pub const RECOGNITION_STATUS: &str = "recognition...";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("training: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("history: {0}")]
    History(#[from] HistoryError),
    #[error("frame submitted while the model was training")]
    TrainingInProgress,
}

/// Lifecycle stage. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Enrolling,
    /// Held only for the duration of the synchronous `train` call.
    Training,
    Recognizing,
    /// Training failed; every later frame reports the same error.
    Failed(RecognizerError),
}

/// Score produced for one recognized frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub label: Option<Label>,
    pub score: i32,
    pub average: i32,
    pub text: String,
    pub text_anchor: (u32, u32),
}

/// What the pipeline hands back for one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    /// The colour frame, annotated when a face was found.
    pub frame: Frame,
    pub region: Option<FaceRegion>,
    /// Status lines for the display surface, in emission order.
    pub statuses: Vec<String>,
    pub recognition: Option<Recognition>,
}

impl FrameOutcome {
    fn untouched(frame: Frame) -> Self {
        Self {
            frame,
            region: None,
            statuses: Vec::new(),
            recognition: None,
        }
    }
}

pub struct Pipeline<D, T: Trainer> {
    config: PipelineConfig,
    detector: D,
    trainer: T,
    collector: SampleCollector,
    history: ConfidenceHistory,
    model: Option<T::Model>,
    phase: Phase,
}

impl Pipeline<CascadeDetector, LbphTrainer> {
    /// Build the cascade + LBPH pipeline. A missing or corrupt cascade fails here.
    pub fn from_cascade_file(cascade_path: &Path, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let detector = CascadeDetector::load(cascade_path, config.detector.clone())?;
        let trainer = LbphTrainer::new(config.recognizer.clone(), config.enroll_target);
        Self::new(detector, trainer, config)
    }
}

impl<D: FaceDetector, T: Trainer> Pipeline<D, T> {
    pub fn new(detector: D, trainer: T, config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            collector: SampleCollector::new(config.enroll_target),
            history: ConfidenceHistory::new(config.history_capacity),
            config,
            detector,
            trainer,
            model: None,
            phase: Phase::Enrolling,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn model(&self) -> Option<&T::Model> {
        self.model.as_ref()
    }

    pub fn history(&self) -> &ConfidenceHistory {
        &self.history
    }

    pub fn samples_collected(&self) -> usize {
        self.collector.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one frame through the pipeline.
    ///
    /// A frame without a face comes back unmodified. Errors are sequencing
    /// bugs or detector failures, never "no face".
    pub fn process(&mut self, mut frame: Frame) -> Result<FrameOutcome, PipelineError> {
        match self.phase {
            Phase::Training => return Err(PipelineError::TrainingInProgress),
            Phase::Failed(err) => return Err(err.into()),
            Phase::Enrolling | Phase::Recognizing => {}
        }

        let gray = frame.grayscale();
        let regions = self.detector.detect(&gray)?;
        let Some(region) = regions.first().copied() else {
            tracing::trace!(sequence = frame.sequence, "no face");
            return Ok(FrameOutcome::untouched(frame));
        };
        let Some(sample) = FaceSample::from_region(&gray, &region, self.config.sample_size) else {
            tracing::debug!(sequence = frame.sequence, ?region, "face region outside frame");
            return Ok(FrameOutcome::untouched(frame));
        };

        tracing::debug!(
            sequence = frame.sequence,
            brightness = frame.avg_brightness(),
            faces = regions.len(),
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            "face detected"
        );
        overlay::draw_face_outline(&mut frame.image, &region);

        let mut statuses = Vec::new();
        let mut recognition = None;
        match self.phase {
            Phase::Enrolling => self.enroll(sample, &mut statuses)?,
            Phase::Recognizing => {
                let result = self.recognize(&sample, &region)?;
                overlay::draw_text(&mut frame.image, &result.text, result.text_anchor);
                recognition = Some(result);
            }
            Phase::Training => return Err(PipelineError::TrainingInProgress),
            Phase::Failed(err) => return Err(err.into()),
        }

        Ok(FrameOutcome {
            frame,
            region: Some(region),
            statuses,
            recognition,
        })
    }

    fn enroll(&mut self, sample: FaceSample, statuses: &mut Vec<String>) -> Result<(), PipelineError> {
        let Offer::Accepted { remaining } = self.collector.offer(sample) else {
            return Ok(());
        };
        tracing::debug!(remaining, "enrolment sample collected");
        statuses.push(enrolment_status(remaining));

        if remaining == 0 {
            self.phase = Phase::Training;
            statuses.push(TRAINING_STATUS.to_string());
            tracing::info!(samples = self.collector.len(), "training recognizer");

            let samples = self.collector.take_samples();
            let model = match self.trainer.train(&samples) {
                Ok(model) => model,
                Err(err) => {
                    self.phase = Phase::Failed(err);
                    return Err(err.into());
                }
            };
            self.model = Some(model);
            self.phase = Phase::Recognizing;

            statuses.push(RECOGNITION_STATUS.to_string());
            tracing::info!("recognition phase started");
        }
        Ok(())
    }

    fn recognize(&mut self, sample: &FaceSample, region: &FaceRegion) -> Result<Recognition, PipelineError> {
        let model = self.model.as_ref().ok_or(PipelineError::TrainingInProgress)?;
        let prediction = model.predict(sample);
        let score = prediction.score();
        self.history.push(score);
        let average = self.history.average()?;

        tracing::debug!(
            label = ?prediction.label,
            distance = prediction.distance,
            score,
            average,
            "recognized"
        );

        Ok(Recognition {
            label: prediction.label,
            score,
            average,
            text: overlay::score_text(score, average),
            text_anchor: overlay::text_anchor(region),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::tests::{top_bright_pattern, TOP_BRIGHT_CASCADE};
    use crate::cascade::Cascade;
    use crate::config::DetectorConfig;
    use crate::recognizer::LbphModel;
    use crate::types::ENROLLED_LABEL;
    use image::{Luma, Rgba, RgbaImage};

    /// Reports a fixed region whenever the frame is not uniformly black.
    struct FixedDetector {
        region: FaceRegion,
    }

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, image: &image::GrayImage) -> Result<Vec<FaceRegion>, DetectorError> {
            if image.pixels().all(|p| p.0[0] == 0) {
                Ok(Vec::new())
            } else {
                Ok(vec![self.region])
            }
        }
    }

    fn small_config(target: usize, capacity: usize) -> PipelineConfig {
        PipelineConfig {
            enroll_target: target,
            history_capacity: capacity,
            ..PipelineConfig::default()
        }
    }

    fn fixed_pipeline(target: usize, capacity: usize, region: FaceRegion) -> Pipeline<FixedDetector, LbphTrainer> {
        let config = small_config(target, capacity);
        let trainer = LbphTrainer::new(config.recognizer.clone(), target);
        Pipeline::new(FixedDetector { region }, trainer, config).unwrap()
    }

    fn textured_frame(seq: u64) -> Frame {
        let img = RgbaImage::from_fn(320, 240, |x, y| {
            let v = ((x * 7 + y * 13 + (x * y) % 31) % 251) as u8;
            Rgba([v, v / 2, 255 - v, 255])
        });
        Frame::new(img, seq)
    }

    fn black_frame(seq: u64) -> Frame {
        Frame::new(RgbaImage::from_pixel(320, 240, Rgba([0, 0, 0, 255])), seq)
    }

    #[test]
    fn test_end_to_end_enrol_then_recognize() {
        let mut pipeline = fixed_pipeline(3, 5, FaceRegion::new(60, 40, 120, 120));
        assert_eq!(pipeline.phase(), Phase::Enrolling);

        for seq in 0..2 {
            let out = pipeline.process(textured_frame(seq)).unwrap();
            assert!(out.recognition.is_none());
            assert_eq!(pipeline.phase(), Phase::Enrolling);
        }
        let out = pipeline.process(textured_frame(2)).unwrap();
        assert_eq!(
            out.statuses,
            vec![
                "face frames left to train: 0".to_string(),
                TRAINING_STATUS.to_string(),
                RECOGNITION_STATUS.to_string(),
            ]
        );
        assert_eq!(pipeline.phase(), Phase::Recognizing);
        assert!(pipeline.model().is_some());

        let out = pipeline.process(textured_frame(3)).unwrap();
        let rec = out.recognition.expect("recognition on 4th frame");
        let (score, average) = rec.text.split_once('/').unwrap();
        assert!(score.parse::<i32>().is_ok() && average.parse::<i32>().is_ok(), "text {}", rec.text);
        assert_eq!(rec.label, Some(ENROLLED_LABEL));
        assert_eq!(rec.score, 0);
        assert_eq!(rec.text, "0/0");
        assert_eq!(rec.text_anchor, (50, 30));
        assert_eq!(pipeline.history().len(), 1);
    }

    #[test]
    fn test_enrolment_status_counts_down() {
        let mut pipeline = fixed_pipeline(3, 5, FaceRegion::new(10, 10, 100, 100));
        let out = pipeline.process(textured_frame(0)).unwrap();
        assert_eq!(out.statuses, vec!["face frames left to train: 2".to_string()]);
        assert_eq!(pipeline.samples_collected(), 1);
    }

    #[test]
    fn test_no_face_leaves_frame_untouched() {
        let mut pipeline = fixed_pipeline(3, 5, FaceRegion::new(10, 10, 100, 100));
        let frame = black_frame(0);
        let before = frame.image.clone();
        let out = pipeline.process(frame).unwrap();
        assert!(out.region.is_none());
        assert!(out.statuses.is_empty());
        assert_eq!(out.frame.image, before);
        assert_eq!(pipeline.samples_collected(), 0);
    }

    #[test]
    fn test_outline_drawn_while_enrolling() {
        let mut pipeline = fixed_pipeline(3, 5, FaceRegion::new(10, 10, 100, 100));
        let out = pipeline.process(textured_frame(0)).unwrap();
        assert_eq!(*out.frame.image.get_pixel(10, 50), overlay::OUTLINE_COLOR);
        assert!(!out.frame.image.pixels().any(|p| *p == overlay::TEXT_COLOR));
    }

    #[test]
    fn test_trains_exactly_once_and_ignores_extra_samples() {
        let mut pipeline = fixed_pipeline(2, 5, FaceRegion::new(10, 10, 100, 100));
        for seq in 0..6 {
            pipeline.process(textured_frame(seq)).unwrap();
        }
        assert_eq!(pipeline.phase(), Phase::Recognizing);
        assert_eq!(pipeline.model().map(LbphModel::len), Some(2));
        assert_eq!(pipeline.samples_collected(), 0);
        assert_eq!(pipeline.history().len(), 4);
    }

    #[test]
    fn test_history_capped_and_text_drawn() {
        let mut pipeline = fixed_pipeline(1, 3, FaceRegion::new(40, 40, 100, 100));
        for seq in 0..8 {
            let out = pipeline.process(textured_frame(seq)).unwrap();
            if seq > 0 {
                assert!(out.frame.image.pixels().any(|p| *p == overlay::TEXT_COLOR));
            }
        }
        assert_eq!(pipeline.history().len(), 3);
    }

    #[test]
    fn test_region_at_origin_anchors_text_at_origin() {
        let mut pipeline = fixed_pipeline(1, 3, FaceRegion::new(0, 0, 100, 100));
        pipeline.process(textured_frame(0)).unwrap();
        let rec = pipeline.process(textured_frame(1)).unwrap().recognition.unwrap();
        assert_eq!(rec.text_anchor, (0, 0));
    }

    #[test]
    fn test_missed_frames_do_not_advance_enrolment() {
        let mut pipeline = fixed_pipeline(2, 5, FaceRegion::new(10, 10, 100, 100));
        pipeline.process(textured_frame(0)).unwrap();
        pipeline.process(black_frame(1)).unwrap();
        pipeline.process(black_frame(2)).unwrap();
        assert_eq!(pipeline.phase(), Phase::Enrolling);
        pipeline.process(textured_frame(3)).unwrap();
        assert_eq!(pipeline.phase(), Phase::Recognizing);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = small_config(0, 5);
        let trainer = LbphTrainer::new(config.recognizer.clone(), 0);
        let result = Pipeline::new(FixedDetector { region: FaceRegion::new(0, 0, 1, 1) }, trainer, config);
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_mismatched_trainer_fails_loudly() {
        let config = small_config(2, 5);
        let trainer = LbphTrainer::new(config.recognizer.clone(), 3);
        let mut pipeline =
            Pipeline::new(FixedDetector { region: FaceRegion::new(10, 10, 100, 100) }, trainer, config).unwrap();
        pipeline.process(textured_frame(0)).unwrap();
        let err = pipeline.process(textured_frame(1)).unwrap_err();
        let mismatch = RecognizerError::SampleCountMismatch { expected: 3, actual: 2 };
        assert!(matches!(err, PipelineError::Recognizer(e) if e == mismatch));
        assert_eq!(pipeline.phase(), Phase::Failed(mismatch));
    }

    #[test]
    fn test_failed_training_keeps_reporting_cause() {
        let config = small_config(1, 5);
        let trainer = LbphTrainer::new(config.recognizer.clone(), 2);
        let mut pipeline =
            Pipeline::new(FixedDetector { region: FaceRegion::new(10, 10, 100, 100) }, trainer, config).unwrap();
        assert!(pipeline.process(textured_frame(0)).is_err());

        for seq in 1..3 {
            let err = pipeline.process(textured_frame(seq)).unwrap_err();
            assert!(
                matches!(err, PipelineError::Recognizer(RecognizerError::SampleCountMismatch { expected: 2, actual: 1 })),
                "got {err:?}"
            );
        }
        // No-face frames report it too: the pipeline cannot make progress.
        assert!(pipeline.process(black_frame(3)).is_err());
        assert!(pipeline.model().is_none());
    }

    #[test]
    fn test_cascade_pipeline_end_to_end() {
        let config = PipelineConfig {
            enroll_target: 3,
            history_capacity: 5,
            detector: DetectorConfig {
                min_neighbors: 0,
                min_size: (24, 24),
                ..DetectorConfig::default()
            },
            ..PipelineConfig::default()
        };
        let detector = CascadeDetector::new(
            Cascade::from_xml_str(TOP_BRIGHT_CASCADE).unwrap(),
            config.detector.clone(),
        )
        .unwrap();
        let trainer = LbphTrainer::new(config.recognizer.clone(), config.enroll_target);
        let mut pipeline = Pipeline::new(detector, trainer, config).unwrap();

        let face = top_bright_pattern(26, 26, 0, 0);
        let frame = |seq| {
            let img = RgbaImage::from_fn(26, 26, |x, y| {
                let Luma([v]) = *face.get_pixel(x, y);
                Rgba([v, v, v, 255])
            });
            Frame::new(img, seq)
        };

        for seq in 0..3 {
            let out = pipeline.process(frame(seq)).unwrap();
            assert_eq!(out.region, Some(FaceRegion::new(0, 0, 24, 24)));
        }
        assert_eq!(pipeline.phase(), Phase::Recognizing);

        let out = pipeline.process(frame(3)).unwrap();
        let rec = out.recognition.unwrap();
        assert_eq!(rec.text, "0/0");
        assert_eq!(rec.text_anchor, (0, 0));
        assert_eq!(pipeline.history().len(), 1);

        let blank = Frame::new(RgbaImage::from_pixel(26, 26, Rgba([90, 90, 90, 255])), 4);
        let before = blank.image.clone();
        let out = pipeline.process(blank).unwrap();
        assert!(out.region.is_none());
        assert_eq!(out.frame.image, before);
    }

    #[test]
    fn test_from_cascade_file_missing() {
        let result = Pipeline::from_cascade_file(Path::new("/nonexistent/cascade.xml"), PipelineConfig::default());
        assert!(matches!(result, Err(PipelineError::Detector(DetectorError::ModelNotFound(_)))));
    }
}
