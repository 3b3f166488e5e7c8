// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! Recalibration controller
//!
//! The engine is a sequential reducer over the interval stream. Each epoch
//! starts in `Collecting`, freezes its baseline once `baseline_capacity`
//! intervals are in, then classifies every further interval into a symbol
//! until a drift check fails and the epoch is thrown away.
//!
//! ```text
//!                 baseline saturated
//!   Collecting ───────────────────────> Classifying
//!       ^                                   │
//!       │   drift detected / degenerate     │
//!       └───────────── calibration ─────────┘
//! ```

use crate::accumulator::{Accumulation, Baseline, SampleAccumulator};
use crate::calibrator::{build_boundaries, BoundaryTable};
use crate::config::{DriftPolicy, EngineConfig};
use crate::drift::{DriftMonitor, DriftReport};
use crate::protocol::{EngineStatus, Phase as PhaseKind};
use crate::queue::OutputQueue;
use crate::stats::RunningStats;
use crate::symbol::Symbol;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of feeding one interval to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Still calibrating, or the produced symbol was retracted on drift
    Pending,
    /// The interval was classified and its symbol queued
    Symbol(Symbol),
}

impl Observation {
    pub fn symbol(self) -> Option<Symbol> {
        match self {
            Observation::Symbol(s) => Some(s),
            Observation::Pending => None,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, Observation::Pending)
    }
}

/// Cumulative engine counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub intervals_observed: u64,
    pub symbols_emitted: u64,
    pub calibrations: u64,
    pub calibration_failures: u64,
    pub drift_checks: u64,
    pub drifts_detected: u64,
    pub resets: u64,
}

/// State valid only once the baseline is frozen
#[derive(Debug)]
struct Epoch {
    baseline: Baseline,
    /// Built lazily on the first classification of the epoch
    boundaries: Option<BoundaryTable>,
    post_baseline: RunningStats,
}

impl Epoch {
    fn new(baseline: Baseline) -> Self {
        Self {
            baseline,
            boundaries: None,
            post_baseline: RunningStats::new(),
        }
    }
}

#[derive(Debug)]
enum Phase {
    Collecting(SampleAccumulator),
    Classifying(Epoch),
}

/// Interval-to-symbol debiasing engine
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    bucket_count: usize,
    monitor: DriftMonitor,
    phase: Phase,
    epoch: u64,
    queue: OutputQueue,
    stats: EngineStats,
    last_report: Option<DriftReport>,
}

impl Engine {
    /// Create an engine in the initial `Collecting` state
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let bucket_count = config.bucket_count();
        let width = config.symbol_width();
        let queue = match config.max_queued_symbols {
            Some(cap) => OutputQueue::with_cap(width, cap),
            None => OutputQueue::new(width),
        };

        Ok(Self {
            monitor: DriftMonitor::new(config.critical_value),
            phase: Phase::Collecting(SampleAccumulator::new(config.baseline_capacity)),
            bucket_count,
            epoch: 0,
            queue,
            stats: EngineStats::default(),
            last_report: None,
            config,
        })
    }

    /// Feed one interval (microseconds) through the state machine
    ///
    /// Returns [`Error::DegenerateCalibration`] when the frozen baseline
    /// cannot be fitted; the engine has then already reset to `Collecting`
    /// and the interval is dropped.
    pub fn observe(&mut self, interval: f64) -> Result<Observation> {
        self.stats.intervals_observed += 1;

        match &mut self.phase {
            Phase::Collecting(acc) => {
                if acc.observe(interval) == Accumulation::Saturated {
                    self.freeze_baseline();
                }
                Ok(Observation::Pending)
            }
            Phase::Classifying(_) => self.classify(interval),
        }
    }

    fn freeze_baseline(&mut self) {
        let placeholder = Phase::Collecting(SampleAccumulator::new(0));
        if let Phase::Collecting(acc) = std::mem::replace(&mut self.phase, placeholder) {
            debug!("Epoch {} baseline saturated with {} samples", self.epoch, acc.len());
            self.phase = Phase::Classifying(Epoch::new(acc.freeze()));
        }
    }

    fn classify(&mut self, interval: f64) -> Result<Observation> {
        let Phase::Classifying(epoch) = &mut self.phase else {
            return Err(Error::Internal(
                "classification requested while collecting".to_string(),
            ));
        };

        if epoch.boundaries.is_none() {
            match build_boundaries(&epoch.baseline, self.bucket_count) {
                Ok(table) => {
                    info!(
                        "Epoch {} calibrated: rate {:.6e}/µs, mean {:.3} µs, {} buckets",
                        self.epoch,
                        table.rate(),
                        epoch.baseline.mean(),
                        table.bucket_count()
                    );
                    epoch.boundaries = Some(table);
                    self.stats.calibrations += 1;
                }
                Err(e) => {
                    error!("Epoch {} calibration failed: {}", self.epoch, e);
                    self.stats.calibration_failures += 1;
                    self.reset();
                    return Err(e);
                }
            }
        }

        let index = match &epoch.boundaries {
            Some(table) => table.classify(interval),
            None => {
                return Err(Error::Internal(
                    "classifier invoked without a boundary table".to_string(),
                ))
            }
        };

        // bucket_count <= Symbol::MAX_BUCKETS is enforced by config validation
        let symbol = Symbol::new(index as u16);
        epoch.post_baseline.push(interval);
        let accepted = epoch.post_baseline.count();
        let baseline = epoch.baseline.summary();
        let post_baseline = epoch.post_baseline.summary();

        self.queue.push(symbol, self.epoch);
        self.stats.symbols_emitted += 1;

        if accepted % self.config.batch_length != 0 {
            return Ok(Observation::Symbol(symbol));
        }

        let report = self.monitor.check(&baseline, &post_baseline);
        self.stats.drift_checks += 1;

        if !report.is_drifted() {
            debug!(
                "Epoch {} stable after {} samples (|t| = {:.3})",
                self.epoch, accepted, report.t_statistic
            );
            self.last_report = Some(report);
            return Ok(Observation::Symbol(symbol));
        }

        warn!(
            "Epoch {} drifted after {} samples: |t| = {:.3} > {:.3}, means {:.3} vs {:.3}",
            self.epoch,
            accepted,
            report.t_statistic,
            report.critical_value,
            baseline.mean,
            post_baseline.mean
        );
        self.stats.drifts_detected += 1;
        self.last_report = Some(report);

        let outcome = match self.config.drift_policy {
            DriftPolicy::Retain => Observation::Symbol(symbol),
            DriftPolicy::Retract => {
                let removed = self.queue.retract_epoch(self.epoch);
                info!("Retracted {} queued symbols of epoch {}", removed, self.epoch);
                Observation::Pending
            }
        };

        self.reset();
        Ok(outcome)
    }

    /// Discard the current epoch and start collecting a fresh baseline
    ///
    /// The output queue is left untouched.
    pub fn recalibrate(&mut self) {
        info!("Forced recalibration of epoch {}", self.epoch);
        self.reset();
    }

    fn reset(&mut self) {
        self.phase = Phase::Collecting(SampleAccumulator::new(self.config.baseline_capacity));
        self.epoch += 1;
        self.stats.resets += 1;
    }

    /// Pop exactly `n` symbols, or `None` if fewer are queued
    pub fn drain(&mut self, n: usize) -> Option<Vec<Symbol>> {
        self.queue.drain(n)
    }

    /// Pop exactly `n` packed bytes, or `None` if not enough bits are queued
    pub fn drain_bytes(&mut self, n: usize) -> Option<Bytes> {
        self.queue.drain_bytes(n)
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self.phase, Phase::Collecting(_))
    }

    pub fn is_classifying(&self) -> bool {
        matches!(self.phase, Phase::Classifying(_))
    }

    pub fn phase(&self) -> PhaseKind {
        match self.phase {
            Phase::Collecting(_) => PhaseKind::Collecting,
            Phase::Classifying(_) => PhaseKind::Classifying,
        }
    }

    /// Current boundary table, once the epoch has calibrated
    pub fn boundaries(&self) -> Option<&BoundaryTable> {
        match &self.phase {
            Phase::Classifying(epoch) => epoch.boundaries.as_ref(),
            Phase::Collecting(_) => None,
        }
    }

    /// Samples in the current baseline (frozen or still filling)
    pub fn baseline_len(&self) -> usize {
        match &self.phase {
            Phase::Collecting(acc) => acc.len(),
            Phase::Classifying(epoch) => epoch.baseline.len(),
        }
    }

    /// Accepted post-baseline samples in the current epoch
    pub fn post_baseline_count(&self) -> u64 {
        match &self.phase {
            Phase::Collecting(_) => 0,
            Phase::Classifying(epoch) => epoch.post_baseline.count(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn symbol_width(&self) -> u8 {
        self.queue.width()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn queue(&self) -> &OutputQueue {
        &self.queue
    }

    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    /// Most recent drift check of any epoch
    pub fn last_report(&self) -> Option<&DriftReport> {
        self.last_report.as_ref()
    }

    /// Snapshot for status reporting
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            phase: self.phase(),
            epoch: self.epoch,
            baseline_len: self.baseline_len(),
            baseline_capacity: self.config.baseline_capacity,
            post_baseline_samples: self.post_baseline_count(),
            batch_length: self.config.batch_length,
            bucket_count: self.bucket_count,
            symbol_bits: self.symbol_width(),
            rate_estimate: self.boundaries().map(BoundaryTable::rate),
            queued_symbols: self.queue.len(),
            available_bytes: self.queue.available_bytes(),
            oldest_symbol_at: self.queue.oldest_timestamp(),
            data_freshness_seconds: self.queue.freshness_seconds(),
            drift_policy: self.config.drift_policy,
            engine: self.stats(),
            queue: self.queue.stats(),
            last_drift_check: self.last_report.clone(),
        }
    }
}

/// Cloneable handle to one engine behind a single exclusive lock
///
/// The capture path (`observe`) and the export path (`drain*`) serialize on
/// the same mutex, so neither ever sees a partially applied step. The lock
/// is never held across an `.await`.
#[derive(Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    pub fn observe(&self, interval: f64) -> Result<Observation> {
        self.inner.lock().observe(interval)
    }

    pub fn drain(&self, n: usize) -> Option<Vec<Symbol>> {
        self.inner.lock().drain(n)
    }

    pub fn drain_bytes(&self, n: usize) -> Option<Bytes> {
        self.inner.lock().drain_bytes(n)
    }

    pub fn recalibrate(&self) {
        self.inner.lock().recalibrate()
    }

    pub fn status(&self) -> EngineStatus {
        self.inner.lock().status()
    }

    /// Copy of the current boundary table together with its epoch
    pub fn boundaries(&self) -> Option<(u64, BoundaryTable)> {
        let engine = self.inner.lock();
        engine.boundaries().cloned().map(|t| (engine.epoch(), t))
    }

    /// Run `f` with exclusive access to the engine
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine) -> R) -> R {
        f(&mut self.inner.lock())
    }
}
