//! Fixed-capacity FIFO of recent recognition scores, used to smooth the overlay.

use std::collections::VecDeque;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HistoryError {
    #[error("average requested from an empty history")]
    Empty,
}

/// Last-N integer scores in insertion order; the oldest is evicted first.
#[derive(Debug, Clone)]
pub struct ConfidenceHistory {
    capacity: usize,
    values: VecDeque<i32>,
}

impl ConfidenceHistory {
    /// Create an empty history. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append a score, evicting from the front until `len() == capacity()`.
    pub fn push(&mut self, value: i32) {
        self.values.push_back(value);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// Arithmetic mean of the held scores, truncated toward zero.
    pub fn average(&self) -> Result<i32, HistoryError> {
        if self.values.is_empty() {
            return Err(HistoryError::Empty);
        }
        let sum: i64 = self.values.iter().map(|&v| v as i64).sum();
        Ok((sum / self.values.len() as i64) as i32)
    }

    /// Most recently pushed score.
    pub fn youngest(&self) -> Option<i32> {
        self.values.back().copied()
    }

    /// Least recently pushed score still held.
    pub fn oldest(&self) -> Option<i32> {
        self.values.front().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.values.iter().copied()
    }
}
