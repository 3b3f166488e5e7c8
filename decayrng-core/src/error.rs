// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! Error types for the DecayRNG system
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for DecayRNG operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// The baseline cannot support an exponential fit (mean <= 0 or non-finite rate).
    ///
    /// Fatal to the current epoch only; the engine has already reset to collecting.
    #[error("Degenerate calibration: baseline mean {mean} yields no finite rate")]
    DegenerateCalibration { mean: f64 },

    /// The capture stream violated the framing rules
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is transient and the capture link should be re-established
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Protocol(_))
    }

    /// Check if error is the distinguishable degenerate-calibration condition
    pub fn is_degenerate_calibration(&self) -> bool {
        matches!(self, Error::DegenerateCalibration { .. })
    }
}

impl From<::config::ConfigError> for Error {
    fn from(e: ::config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}
