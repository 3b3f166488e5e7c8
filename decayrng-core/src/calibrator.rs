// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! Exponential-model calibration
//!
//! Fits `λ̂ = 1 / mean(baseline)` and places `bucket_count - 1` thresholds at
//! the equiprobable quantiles of the fitted exponential distribution:
//!
//! ```text
//! B_k = -ln(1 - k / bucket_count) / λ̂,    k = 1 .. bucket_count - 1
//! ```
//!
//! Each of the resulting half-open buckets carries probability mass
//! `1 / bucket_count` under the fitted model, whatever the true rate.

use crate::accumulator::Baseline;
use crate::{Error, Result};
use serde::Serialize;

/// Number of buckets for a baseline of the given size: `round(sqrt(capacity))`
pub fn bucket_count_for(baseline_capacity: usize) -> usize {
    (baseline_capacity as f64).sqrt().round() as usize
}

/// Payload bits per symbol: `ceil(log2(bucket_count))`
pub fn symbol_width(bucket_count: usize) -> u8 {
    if bucket_count <= 1 {
        return 0;
    }
    (usize::BITS - (bucket_count - 1).leading_zeros()) as u8
}

/// Largest bucket count the timer can still resolve for a source
///
/// `e · mean_interval / resolution`, scaled down by `safety_factor` (0..1) to
/// leave room for noise and correlation. Both intervals use the same unit.
pub fn max_safe_bucket_count(mean_interval: f64, resolution: f64, safety_factor: f64) -> u64 {
    let m_max = std::f64::consts::E * mean_interval / resolution;
    (m_max * safety_factor).round().max(0.0) as u64
}

/// Timer resolution of the capture source and the margin applied to it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionLimit {
    pub resolution: f64,
    pub safety_factor: f64,
}

impl ResolutionLimit {
    pub fn new(resolution: f64, safety_factor: f64) -> Self {
        Self {
            resolution,
            safety_factor,
        }
    }

    /// Safe bucket count for a fitted table, if the table exceeds it
    pub fn exceeded_by(&self, table: &BoundaryTable) -> Option<u64> {
        let safe = max_safe_bucket_count(1.0 / table.rate(), self.resolution, self.safety_factor);
        (table.bucket_count() as u64 > safe).then_some(safe)
    }
}

/// Ordered thresholds separating equiprobable buckets
///
/// Always holds at least one strictly increasing, finite threshold, so the
/// classifier never sees an empty table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryTable {
    boundaries: Vec<f64>,
    rate: f64,
}

impl BoundaryTable {
    /// Build a table from explicit thresholds
    pub fn from_thresholds(boundaries: Vec<f64>, rate: f64) -> Result<Self> {
        if boundaries.is_empty() {
            return Err(Error::Internal(
                "boundary table needs at least one threshold".to_string(),
            ));
        }
        if boundaries.iter().any(|b| !b.is_finite()) {
            return Err(Error::Internal("boundary table holds non-finite threshold".to_string()));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Internal(
                "boundary thresholds must be strictly increasing".to_string(),
            ));
        }
        Ok(Self { boundaries, rate })
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    /// Fitted rate parameter `λ̂` (events per interval unit)
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn bucket_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    /// Map an interval to its bucket, see [`crate::classifier::classify`]
    pub fn classify(&self, interval: f64) -> usize {
        crate::classifier::classify(interval, self)
    }
}

/// Derive the boundary table for one epoch
///
/// Fails with [`Error::DegenerateCalibration`] when the baseline mean is not
/// strictly positive or the resulting rate or thresholds are not finite.
pub fn build_boundaries(baseline: &Baseline, bucket_count: usize) -> Result<BoundaryTable> {
    if bucket_count < 2 {
        return Err(Error::Config(format!(
            "bucket_count must be >= 2, got {}",
            bucket_count
        )));
    }

    let mean = baseline.mean();
    let degenerate = || Error::DegenerateCalibration { mean };

    if baseline.is_empty() || !(mean > 0.0) {
        return Err(degenerate());
    }

    let rate = 1.0 / mean;
    if !rate.is_finite() || rate <= 0.0 {
        return Err(degenerate());
    }

    let boundaries: Vec<f64> = (1..bucket_count)
        .map(|k| {
            let p = k as f64 / bucket_count as f64;
            -(-p).ln_1p() / rate
        })
        .collect();

    BoundaryTable::from_thresholds(boundaries, rate).map_err(|_| degenerate())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bucket_count_rounding() {
        assert_eq!(bucket_count_for(10_000), 100);
        assert_eq!(bucket_count_for(4), 2);
        assert_eq!(bucket_count_for(3), 2);
        assert_eq!(bucket_count_for(2), 1);
        assert_eq!(bucket_count_for(30), 5);
    }

    #[test]
    fn test_symbol_width() {
        assert_eq!(symbol_width(2), 1);
        assert_eq!(symbol_width(3), 2);
        assert_eq!(symbol_width(4), 2);
        assert_eq!(symbol_width(5), 3);
        assert_eq!(symbol_width(100), 7);
        assert_eq!(symbol_width(128), 7);
        assert_eq!(symbol_width(129), 8);
        assert_eq!(symbol_width(65_536), 16);
    }

    #[test]
    fn test_boundaries_match_exponential_quantiles() {
        let baseline = Baseline::new(vec![1.0, 2.0, 3.0, 4.0]);
        let table = build_boundaries(&baseline, 4).unwrap();

        assert_eq!(table.boundaries().len(), 3);
        assert!((table.rate() - 0.4).abs() < 1e-12);

        let expected: Vec<f64> = [0.25f64, 0.5, 0.75]
            .iter()
            .map(|p| -(1.0 - p).ln() * 2.5)
            .collect();
        for (got, want) in table.boundaries().iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_median_boundary_for_two_buckets() {
        let baseline = Baseline::new(vec![10.0; 16]);
        let table = build_boundaries(&baseline, 2).unwrap();
        assert_eq!(table.bucket_count(), 2);
        assert!((table.boundaries()[0] - 10.0 * std::f64::consts::LN_2).abs() < 1e-9);
    }

    #[test]
    fn test_zero_mean_is_degenerate() {
        let baseline = Baseline::new(vec![0.0; 9]);
        let err = build_boundaries(&baseline, 3).unwrap_err();
        assert!(err.is_degenerate_calibration());
    }

    #[test]
    fn test_negative_and_nan_means_are_degenerate() {
        let negative = Baseline::new(vec![-1.0, -2.0, -3.0, -4.0]);
        assert!(build_boundaries(&negative, 2)
            .unwrap_err()
            .is_degenerate_calibration());

        let nan = Baseline::new(vec![1.0, f64::NAN, 3.0, 4.0]);
        assert!(build_boundaries(&nan, 2).unwrap_err().is_degenerate_calibration());
    }

    #[test]
    fn test_infinite_mean_is_degenerate() {
        let baseline = Baseline::new(vec![1.0, f64::INFINITY, 3.0, 4.0]);
        assert!(build_boundaries(&baseline, 2)
            .unwrap_err()
            .is_degenerate_calibration());
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        assert!(BoundaryTable::from_thresholds(vec![], 1.0).is_err());
        assert!(BoundaryTable::from_thresholds(vec![1.0, 1.0], 1.0).is_err());
        assert!(BoundaryTable::from_thresholds(vec![2.0, 1.0], 1.0).is_err());
        assert!(BoundaryTable::from_thresholds(vec![1.0, f64::NAN], 1.0).is_err());
        assert!(BoundaryTable::from_thresholds(vec![1.0, 2.0], 1.0).is_ok());
    }

    #[test]
    fn test_max_safe_bucket_count() {
        // 1 ms mean interval on a 1 µs timer, 70% safety margin
        let safe = max_safe_bucket_count(1_000.0, 1.0, 0.7);
        assert_eq!(safe, (std::f64::consts::E * 1_000.0 * 0.7).round() as u64);
        assert_eq!(max_safe_bucket_count(1.0, 10.0, 0.0), 0);
    }

    #[test]
    fn test_resolution_limit() {
        // mean 2.5 µs: e * 2.5 * 0.7 ~= 4.76 -> 5 safe buckets
        let table = build_boundaries(&Baseline::new(vec![1.0, 2.0, 3.0, 4.0]), 4).unwrap();
        assert_eq!(ResolutionLimit::new(1.0, 0.7).exceeded_by(&table), None);
        assert_eq!(ResolutionLimit::new(2.0, 0.7).exceeded_by(&table), Some(2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_boundaries_strictly_increasing(
            samples in prop::collection::vec(0.001f64..1e6, 2..200),
            bucket_count in 2usize..300,
        ) {
            prop_assume!(samples.iter().any(|&x| x != samples[0]));
            let table = build_boundaries(&Baseline::new(samples), bucket_count).unwrap();
            prop_assert_eq!(table.boundaries().len(), bucket_count - 1);
            for w in table.boundaries().windows(2) {
                prop_assert!(w[0] < w[1]);
            }
        }
    }
}
