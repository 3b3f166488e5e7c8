//! Baseline sample accumulation
//!
//! Collects the first `baseline_capacity` intervals of an epoch. Intervals are
//! never validated: zero, negative or non-finite values are stored as-is and
//! surface later as a degenerate calibration if they break the fit.

use crate::stats::Summary;

/// Outcome of feeding one interval to the accumulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// The interval was appended and the baseline still has room
    StillCollecting { remaining: usize },
    /// The interval was appended and filled the baseline
    Saturated,
}

/// Append-only baseline under construction
#[derive(Debug, Clone)]
pub struct SampleAccumulator {
    samples: Vec<f64>,
    capacity: usize,
}

impl SampleAccumulator {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an interval.
    ///
    /// Calling this on a saturated accumulator is a no-op that reports
    /// `Saturated`; the engine freezes the baseline before that can happen.
    pub fn observe(&mut self, interval: f64) -> Accumulation {
        if self.is_saturated() {
            return Accumulation::Saturated;
        }

        self.samples.push(interval);

        if self.is_saturated() {
            Accumulation::Saturated
        } else {
            Accumulation::StillCollecting {
                remaining: self.capacity - self.samples.len(),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_saturated(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Freeze the collected samples into a read-only baseline
    pub fn freeze(self) -> Baseline {
        Baseline::new(self.samples)
    }
}

/// Frozen calibration baseline of one epoch
#[derive(Debug, Clone)]
pub struct Baseline {
    samples: Vec<f64>,
    summary: Summary,
}

impl Baseline {
    pub fn new(samples: Vec<f64>) -> Self {
        let summary = Summary::of(&samples);
        Self { samples, summary }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn summary(&self) -> Summary {
        self.summary
    }

    pub fn mean(&self) -> f64 {
        self.summary.mean
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
