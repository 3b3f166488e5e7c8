// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! Metrics collection and reporting

use crate::protocol::{EngineStatus, Phase};
use parking_lot::RwLock;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const LATENCY_WINDOW: usize = 10_000;

const COUNTER: &str = "counter";
const GAUGE: &str = "gauge";

/// Process-wide metrics collector
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    start_time: Instant,

    // Capture link
    intervals_received: AtomicU64,
    intervals_dropped: AtomicU64,
    backwards: AtomicU64,
    capture_connects: AtomicU64,
    capture_failures: AtomicU64,
    capture_connected: AtomicBool,

    // Export
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    bytes_served: AtomicU64,
    symbols_served: AtomicU64,

    // Latency tracking (microseconds)
    request_latencies: RwLock<Vec<u64>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                start_time: Instant::now(),
                intervals_received: AtomicU64::new(0),
                intervals_dropped: AtomicU64::new(0),
                backwards: AtomicU64::new(0),
                capture_connects: AtomicU64::new(0),
                capture_failures: AtomicU64::new(0),
                capture_connected: AtomicBool::new(false),
                requests_total: AtomicU64::new(0),
                requests_failed: AtomicU64::new(0),
                bytes_served: AtomicU64::new(0),
                symbols_served: AtomicU64::new(0),
                request_latencies: RwLock::new(Vec::with_capacity(LATENCY_WINDOW)),
            }),
        }
    }

    // Capture metrics
    pub fn record_interval(&self) {
        self.inner.intervals_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Interval lost because the engine rejected it (degenerate calibration)
    pub fn record_interval_dropped(&self) {
        self.inner.intervals_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Timestamp older than its predecessor on the capture link
    pub fn record_backwards_timestamp(&self) {
        self.inner.backwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture_connected(&self) {
        self.inner.capture_connects.fetch_add(1, Ordering::Relaxed);
        self.inner.capture_connected.store(true, Ordering::Relaxed);
    }

    pub fn record_capture_disconnected(&self) {
        self.inner.capture_connected.store(false, Ordering::Relaxed);
    }

    pub fn record_capture_failure(&self) {
        self.inner.capture_failures.fetch_add(1, Ordering::Relaxed);
        self.inner.capture_connected.store(false, Ordering::Relaxed);
    }

    pub fn intervals_received(&self) -> u64 {
        self.inner.intervals_received.load(Ordering::Relaxed)
    }

    pub fn intervals_dropped(&self) -> u64 {
        self.inner.intervals_dropped.load(Ordering::Relaxed)
    }

    pub fn backwards(&self) -> u64 {
        self.inner.backwards.load(Ordering::Relaxed)
    }

    pub fn capture_connects(&self) -> u64 {
        self.inner.capture_connects.load(Ordering::Relaxed)
    }

    pub fn capture_failures(&self) -> u64 {
        self.inner.capture_failures.load(Ordering::Relaxed)
    }

    pub fn capture_connected(&self) -> bool {
        self.inner.capture_connected.load(Ordering::Relaxed)
    }

    // Request metrics
    pub fn record_request(&self, bytes: usize, symbols: usize, latency_micros: u64) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_served.fetch_add(bytes as u64, Ordering::Relaxed);
        self.inner.symbols_served.fetch_add(symbols as u64, Ordering::Relaxed);

        let mut latencies = self.inner.request_latencies.write();
        latencies.push(latency_micros);
        if latencies.len() > LATENCY_WINDOW {
            latencies.drain(0..LATENCY_WINDOW / 2);
        }
    }

    pub fn record_request_failure(&self) {
        self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.inner.requests_total.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.inner.requests_failed.load(Ordering::Relaxed)
    }

    pub fn bytes_served(&self) -> u64 {
        self.inner.bytes_served.load(Ordering::Relaxed)
    }

    pub fn symbols_served(&self) -> u64 {
        self.inner.symbols_served.load(Ordering::Relaxed)
    }

    // Derived metrics
    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    pub fn requests_per_second(&self) -> f64 {
        let uptime = self.uptime_seconds() as f64;
        if uptime > 0.0 {
            self.requests_total() as f64 / uptime
        } else {
            0.0
        }
    }

    pub fn latency_percentile(&self, percentile: f64) -> Option<u64> {
        let latencies = self.inner.request_latencies.read();
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() as f64 * percentile).ceil() as usize).min(sorted.len() - 1);
        Some(sorted[index])
    }

    pub fn latency_p50(&self) -> Option<u64> {
        self.latency_percentile(0.50)
    }

    pub fn latency_p99(&self) -> Option<u64> {
        self.latency_percentile(0.99)
    }

    /// Generate Prometheus-compatible metrics output
    ///
    /// Engine gauges and counters are included when a status snapshot is
    /// supplied.
    pub fn prometheus_format(&self, engine: Option<&EngineStatus>) -> String {
        let mut out = String::new();

        let mut series = vec![
            ("intervals_received_total", COUNTER, "Intervals received", self.intervals_received()),
            ("intervals_dropped_total", COUNTER, "Intervals dropped", self.intervals_dropped()),
            ("backwards_timestamps_total", COUNTER, "Out-of-order timestamps", self.backwards()),
            ("capture_connects_total", COUNTER, "Capture connections", self.capture_connects()),
            ("capture_failures_total", COUNTER, "Capture link failures", self.capture_failures()),
            ("capture_connected", GAUGE, "Capture link up", self.capture_connected() as u64),
            ("requests_total", COUNTER, "Total number of requests", self.requests_total()),
            ("requests_failed_total", COUNTER, "Failed requests", self.requests_failed()),
            ("bytes_served_total", COUNTER, "Total packed bytes served", self.bytes_served()),
            ("symbols_served_total", COUNTER, "Total symbols served", self.symbols_served()),
            ("uptime_seconds", GAUGE, "Service uptime in seconds", self.uptime_seconds()),
        ];

        if let Some(p50) = self.latency_p50() {
            series.push(("latency_p50_microseconds", GAUGE, "Request latency p50", p50));
        }
        if let Some(p99) = self.latency_p99() {
            series.push(("latency_p99_microseconds", GAUGE, "Request latency p99", p99));
        }

        if let Some(status) = engine {
            let stats = &status.engine;
            let classifying = (status.phase == Phase::Classifying) as u64;
            series.extend([
                ("engine_classifying", GAUGE, "1 while classifying", classifying),
                ("engine_epoch", GAUGE, "Calibration epoch", status.epoch),
                ("engine_baseline_samples", GAUGE, "Baseline size", status.baseline_len as u64),
                ("engine_queued_symbols", GAUGE, "Queued symbols", status.queued_symbols as u64),
                ("engine_symbols_emitted_total", COUNTER, "Symbols emitted", stats.symbols_emitted),
                ("engine_calibrations_total", COUNTER, "Calibrations", stats.calibrations),
                (
                    "engine_calibration_failures_total",
                    COUNTER,
                    "Degenerate calibrations",
                    stats.calibration_failures,
                ),
                ("engine_drift_checks_total", COUNTER, "Drift checks", stats.drift_checks),
                ("engine_drifts_total", COUNTER, "Drifts detected", stats.drifts_detected),
                (
                    "engine_symbols_retracted_total",
                    COUNTER,
                    "Symbols retracted on drift",
                    status.queue.symbols_retracted,
                ),
            ]);
        }

        for (name, kind, help, value) in series {
            metric(&mut out, name, kind, help, value);
        }
        out
    }
}

fn metric(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP decayrng_{} {}", name, help);
    let _ = writeln!(out, "# TYPE decayrng_{} {}", name, kind);
    let _ = writeln!(out, "decayrng_{} {}", name, value);
}
