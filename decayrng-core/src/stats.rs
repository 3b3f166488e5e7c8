//! Sample statistics shared by the calibrator and the drift monitor

use serde::Serialize;

/// Count, mean and unbiased variance of a sample set
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub mean: f64,
    /// Sample variance with an `n - 1` denominator (0 when `count < 2`)
    pub variance: f64,
}

impl Summary {
    /// Summarize a slice in two passes
    pub fn of(samples: &[f64]) -> Self {
        let count = samples.len();
        if count == 0 {
            return Self {
                count: 0,
                mean: 0.0,
                variance: 0.0,
            };
        }

        let mean = samples.iter().sum::<f64>() / count as f64;
        let variance = if count > 1 {
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (count - 1) as f64
        } else {
            0.0
        };

        Self {
            count: count as u64,
            mean,
            variance,
        }
    }
}

/// Online mean/variance accumulator (Welford)
///
/// Used in place of retaining every post-baseline interval: the drift test
/// only ever needs the mean and variance.
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn summary(&self) -> Summary {
        let variance = if self.count > 1 {
            self.m2 / (self.count - 1) as f64
        } else {
            0.0
        };
        Summary {
            count: self.count,
            mean: self.mean,
            variance,
        }
    }
}
