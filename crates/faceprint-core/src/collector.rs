//! Enrolment sample collection.
//!
//! Accepts face crops until the target count is reached. No deduplication and
//! no quality filtering: every offered crop counts.

use crate::types::FaceSample;

/// Result of offering one crop to the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Stored; `remaining` more are needed before training.
    Accepted { remaining: usize },
    /// Target already reached or samples already handed off; the crop was dropped.
    Rejected,
}

pub struct SampleCollector {
    target: usize,
    samples: Vec<FaceSample>,
    sealed: bool,
}

impl SampleCollector {
    pub fn new(target: usize) -> Self {
        Self {
            target,
            samples: Vec::with_capacity(target),
            sealed: false,
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.target - self.samples.len()
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.target
    }

    pub fn offer(&mut self, sample: FaceSample) -> Offer {
        if self.sealed || self.is_complete() {
            return Offer::Rejected;
        }
        self.samples.push(sample);
        Offer::Accepted {
            remaining: self.remaining(),
        }
    }

    /// Hand the collected samples to the trainer. Later offers are rejected.
    pub fn take_samples(&mut self) -> Vec<FaceSample> {
        self.sealed = true;
        std::mem::take(&mut self.samples)
    }
}

/// Status line shown while enrolling.
pub fn enrolment_status(remaining: usize) -> String {
    format!("face frames left to train: {remaining}")
}
