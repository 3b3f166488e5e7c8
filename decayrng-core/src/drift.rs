// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! Drift detection between the baseline and the live interval stream
//!
//! Welch's two-sample t statistic for unequal variances:
//!
//! ```text
//! t = |mean_b - mean_p| / sqrt(var_b / n_b + var_p / n_p)
//! ```
//!
//! compared against a fixed critical value (2.58, roughly two-sided 99% under
//! the normal approximation). The degrees of freedom are not
//! used for the decision; they and the exact p-value are reported for
//! observability only.

use crate::stats::Summary;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Default critical value for `|t|`
pub const DEFAULT_CRITICAL_VALUE: f64 = 2.58;

/// Drift test outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Stable,
    Drifted,
}

/// Full result of one drift check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub verdict: Verdict,
    /// `|t|`; infinite when both variances are zero and the means differ,
    /// NaN when either sample holds a NaN
    pub t_statistic: f64,
    pub critical_value: f64,
    /// Welch–Satterthwaite degrees of freedom, when defined
    pub degrees_of_freedom: Option<f64>,
    /// Two-sided p-value under Student's t with the Welch df, when defined
    pub p_value: Option<f64>,
    pub baseline: Summary,
    pub post_baseline: Summary,
}

impl DriftReport {
    pub fn is_drifted(&self) -> bool {
        self.verdict == Verdict::Drifted
    }
}

/// Welch t-test against a fixed critical value
#[derive(Debug, Clone, Copy)]
pub struct DriftMonitor {
    critical_value: f64,
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CRITICAL_VALUE)
    }
}

impl DriftMonitor {
    pub fn new(critical_value: f64) -> Self {
        Self { critical_value }
    }

    pub fn critical_value(&self) -> f64 {
        self.critical_value
    }

    /// Compare baseline and post-baseline summaries
    ///
    /// With zero pooled standard error the samples are either identical in
    /// mean (`t = 0`, stable) or separated without any noise (`t = ∞`,
    /// drifted). A NaN in either summary yields `t = NaN`, which counts as
    /// drifted: the epoch's statistics can no longer vouch for the boundaries.
    pub fn check(&self, baseline: &Summary, post_baseline: &Summary) -> DriftReport {
        let a = baseline.variance / baseline.count.max(1) as f64;
        let b = post_baseline.variance / post_baseline.count.max(1) as f64;
        let se = (a + b).sqrt();
        let diff = (baseline.mean - post_baseline.mean).abs();

        let t = if diff.is_nan() || se.is_nan() {
            f64::NAN
        } else if se > 0.0 {
            diff / se
        } else if diff > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let verdict = if t.is_nan() || t > self.critical_value {
            Verdict::Drifted
        } else {
            Verdict::Stable
        };

        let degrees_of_freedom = welch_degrees_of_freedom(baseline, post_baseline);
        let p_value = degrees_of_freedom.and_then(|df| two_sided_p_value(t, df));

        DriftReport {
            verdict,
            t_statistic: t,
            critical_value: self.critical_value,
            degrees_of_freedom,
            p_value,
            baseline: *baseline,
            post_baseline: *post_baseline,
        }
    }
}

/// Welch–Satterthwaite approximation of the degrees of freedom
pub fn welch_degrees_of_freedom(x: &Summary, y: &Summary) -> Option<f64> {
    if x.count < 2 || y.count < 2 {
        return None;
    }
    let (nx, ny) = (x.count as f64, y.count as f64);
    let a = x.variance / nx;
    let b = y.variance / ny;
    let denom = a * a / (nx - 1.0) + b * b / (ny - 1.0);
    if denom <= 0.0 {
        return None;
    }
    let df = (a + b).powi(2) / denom;
    df.is_finite().then_some(df)
}

fn two_sided_p_value(t: f64, df: f64) -> Option<f64> {
    if t.is_nan() {
        return None;
    }
    if t.is_infinite() {
        return Some(0.0);
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * (1.0 - dist.cdf(t))).clamp(0.0, 1.0))
}
