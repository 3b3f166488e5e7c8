//! Capture link to the timestamp server and the feeder driving the engine
//!
//! The client keeps one TCP connection to the capture server alive,
//! reconnecting with backoff, and forwards derived intervals over a bounded
//! channel. [`feed`] drains that channel into the shared engine.

use crate::calibrator::ResolutionLimit;
use crate::engine::SharedEngine;
use crate::metrics::Metrics;
use crate::protocol::{read_frame, write_frame, Frame, IntervalDeriver, CONN_DATA};
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use std::io;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Configuration for the capture client
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// `host:port` of the capture server
    pub address: String,
    /// Reconnect policy
    pub retry_policy: RetryPolicy,
}

impl CaptureConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// How a single connection ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    ReceiverClosed,
    ServerExit,
}

/// TCP client for the capture server's timestamp stream
pub struct CaptureClient {
    config: CaptureConfig,
    metrics: Metrics,
}

impl CaptureClient {
    pub fn new(config: CaptureConfig, metrics: Metrics) -> Self {
        Self { config, metrics }
    }

    /// Forward intervals to `tx` until cancelled or the receiver is dropped
    ///
    /// Retryable failures (I/O, protocol desync, server exit) trigger a
    /// reconnect with backoff; each new connection primes a fresh
    /// [`IntervalDeriver`], so no interval spans a reconnect.
    pub async fn run(self, tx: mpsc::Sender<f64>, cancel: CancellationToken) -> Result<()> {
        let mut backoff = self.config.retry_policy.backoff();

        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                r = TcpStream::connect(&self.config.address) => r,
            };

            match connected {
                Ok(stream) => {
                    self.metrics.record_capture_connected();
                    backoff.reset();

                    match self.session(stream, &tx, &cancel).await {
                        Ok(SessionEnd::Cancelled) | Ok(SessionEnd::ReceiverClosed) => {
                            self.metrics.record_capture_disconnected();
                            return Ok(());
                        }
                        Ok(SessionEnd::ServerExit) => {
                            info!("Capture server {} closed the stream", self.config.address);
                            self.metrics.record_capture_disconnected();
                        }
                        Err(e) if e.is_retryable() => {
                            warn!("Capture link to {} broke: {}", self.config.address, e);
                            self.metrics.record_capture_failure();
                        }
                        Err(e) => {
                            error!("Capture link to {} failed: {}", self.config.address, e);
                            self.metrics.record_capture_failure();
                            return Err(e);
                        }
                    }
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", self.config.address, e);
                    self.metrics.record_capture_failure();
                }
            }

            let Some(delay) = backoff.next_delay() else {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    format!(
                        "giving up on {} after {} attempts",
                        self.config.address,
                        backoff.attempts()
                    ),
                )));
            };

            debug!("Reconnecting to {} in {:?}", self.config.address, delay);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = sleep(delay) => {}
            }
        }
    }

    #[instrument(skip_all, fields(address = %self.config.address))]
    async fn session(
        &self,
        stream: TcpStream,
        tx: &mpsc::Sender<f64>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        stream.set_nodelay(true)?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half.write_all(&[CONN_DATA]).await?;
        info!("Capture link established");

        let mut deriver = IntervalDeriver::new();

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write_frame(&mut write_half, Frame::Exit).await;
                    return Ok(SessionEnd::Cancelled);
                }
                frame = read_frame(&mut reader) => frame?,
            };

            let timestamp = match frame {
                Some(Frame::Timestamp(ts)) => ts,
                Some(Frame::Empty) => continue,
                Some(Frame::Exit) => return Ok(SessionEnd::ServerExit),
                None => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "capture server closed the connection without exit signal",
                    )))
                }
            };

            let backwards = deriver.backwards_count();
            let Some(interval) = deriver.next(timestamp) else {
                continue;
            };
            if deriver.backwards_count() > backwards {
                self.metrics.record_backwards_timestamp();
            }

            let sent = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write_frame(&mut write_half, Frame::Exit).await;
                    return Ok(SessionEnd::Cancelled);
                }
                sent = tx.send(interval) => sent,
            };

            if sent.is_err() {
                debug!("Interval receiver hung up, closing capture link");
                let _ = write_frame(&mut write_half, Frame::Exit).await;
                return Ok(SessionEnd::ReceiverClosed);
            }
            self.metrics.record_interval();
        }
    }
}

/// Drain intervals from `rx` into the engine until the channel closes
///
/// Degenerate calibrations are logged and counted but do not stop the
/// feeder; any other engine error is returned. When `limit` is set, every
/// new boundary table is checked against the timer resolution.
pub async fn feed(
    engine: SharedEngine,
    mut rx: mpsc::Receiver<f64>,
    metrics: Metrics,
    limit: Option<ResolutionLimit>,
) -> Result<u64> {
    let mut fed = 0u64;

    while let Some(interval) = rx.recv().await {
        let (outcome, calibrated) = engine.with(|e| {
            let was_calibrated = e.boundaries().is_some();
            let outcome = e.observe(interval);
            let calibrated = match (was_calibrated, e.boundaries()) {
                (false, Some(table)) => Some((e.epoch(), table.clone())),
                _ => None,
            };
            (outcome, calibrated)
        });
        fed += 1;

        match outcome {
            Ok(_) => {}
            Err(e) if e.is_degenerate_calibration() => metrics.record_interval_dropped(),
            Err(e) => {
                error!("Engine rejected interval {}: {}", interval, e);
                return Err(e);
            }
        }

        if let (Some(limit), Some((epoch, table))) = (limit, calibrated) {
            if let Some(safe) = limit.exceeded_by(&table) {
                warn!(
                    "Epoch {} uses {} buckets; a {} µs timer resolves ~{} at mean {:.3} µs",
                    epoch,
                    table.bucket_count(),
                    limit.resolution,
                    safe,
                    1.0 / table.rate()
                );
            }
        }
    }

    debug!("Interval channel closed after {} intervals", fed);
    Ok(fed)
}
