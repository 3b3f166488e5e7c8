// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! DecayRNG Core Library
//!
//! Turns the inter-arrival intervals of a radioactive-decay detector into
//! uniformly distributed symbols. Intervals of a Poisson process are
//! exponentially distributed; the engine fits that distribution on a
//! baseline, splits it into equiprobable buckets and emits the bucket index
//! of every later interval. A Welch t-test watches for drift of the source
//! and forces a fresh calibration when the rate moves.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `accumulator`: bounded baseline collection
//! - `calibrator`: exponential fit and equiprobable boundary table
//! - `classifier`: interval to bucket index
//! - `drift`: Welch t-test drift monitor
//! - `engine`: the recalibration state machine and its shared handle
//! - `queue` / `symbol`: output FIFO and bit packing
//! - `protocol` / `capture`: capture-server wire format and TCP client
//! - `config`, `metrics`, `retry`, `error`: ambient plumbing
//!
//! # Example
//!
//! ```
//! use decayrng_core::{Engine, EngineConfig, Observation};
//!
//! let mut engine = Engine::new(EngineConfig::new(4, 2)).unwrap();
//! for x in [1.0, 2.0, 3.0, 4.0] {
//!     assert_eq!(engine.observe(x).unwrap(), Observation::Pending);
//! }
//! assert!(engine.observe(5.0).unwrap().symbol().is_some());
//! ```

pub mod accumulator;
pub mod calibrator;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod drift;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod symbol;

pub use crate::config::{DriftPolicy, EngineConfig, GatewayConfig};
pub use engine::{Engine, Observation, SharedEngine};
pub use error::{Error, Result};
pub use symbol::Symbol;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum single request size to prevent OOM
pub const MAX_REQUEST_SIZE: usize = 65_536; // 64 KiB

/// Default baseline size (100 buckets)
pub const DEFAULT_BASELINE_CAPACITY: usize = 10_000;

/// Default number of post-baseline intervals between drift checks
pub const DEFAULT_BATCH_LENGTH: u64 = 10_000;
