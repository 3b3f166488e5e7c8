// SPDX-License-Identifier: MIT
//
// DecayRNG: Interval Debiasing Engine
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara

//! Wire format of the capture stream and the status types served over HTTP
//!
//! The capture server speaks a tiny signalled protocol over TCP:
//!
//! ```text
//! client -> server : 0x01                      (data connection)
//! server -> client : 0x00                      (nothing available)
//!                  | 0xFF <u128 LE, 16 bytes>  (detection timestamp, µs)
//!                  | 0x19                      (exit)
//! client -> server : 0x19                      (exit, before closing)
//! ```

use crate::calibrator::BoundaryTable;
use crate::config::DriftPolicy;
use crate::drift::DriftReport;
use crate::engine::EngineStats;
use crate::queue::QueueStats;
use crate::{Error, Result};
use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Connection type byte for a data connection
pub const CONN_DATA: u8 = 0x01;
/// Server has no timestamp to send right now
pub const SIG_EMPTY: u8 = 0x00;
/// A 16-byte timestamp follows
pub const SIG_PACKET: u8 = !SIG_EMPTY;
/// Either side is closing the connection
pub const SIG_EXIT: u8 = 0x19;
/// Size of an encoded timestamp
pub const TIMESTAMP_LEN: usize = 16;

/// One signal from the capture server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Empty,
    /// Detection time in microseconds since the Unix epoch
    Timestamp(u128),
    Exit,
}

impl Frame {
    /// Append the wire encoding of this frame to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Frame::Empty => buf.put_u8(SIG_EMPTY),
            Frame::Exit => buf.put_u8(SIG_EXIT),
            Frame::Timestamp(micros) => {
                buf.reserve(1 + TIMESTAMP_LEN);
                buf.put_u8(SIG_PACKET);
                buf.put_u128_le(*micros);
            }
        }
    }
}

/// Read the next frame
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary. An end
/// of stream inside a timestamp is an I/O error; an unknown signal byte is
/// a protocol error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let signal = match reader.read_u8().await {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match signal {
        SIG_EMPTY => Ok(Some(Frame::Empty)),
        SIG_EXIT => Ok(Some(Frame::Exit)),
        SIG_PACKET => {
            let mut raw = [0u8; TIMESTAMP_LEN];
            reader.read_exact(&mut raw).await?;
            Ok(Some(Frame::Timestamp(u128::from_le_bytes(raw))))
        }
        other => Err(Error::Protocol(format!("unknown signal byte 0x{:02x}", other))),
    }
}

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, frame: Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(1 + TIMESTAMP_LEN);
    frame.encode(&mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Turns successive detection timestamps into inter-arrival intervals
///
/// The first timestamp only primes the deriver. A timestamp older than its
/// predecessor yields a zero interval.
#[derive(Debug, Default)]
pub struct IntervalDeriver {
    last: Option<u128>,
    backwards: u64,
}

impl IntervalDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interval in microseconds since the previous timestamp
    pub fn next(&mut self, timestamp: u128) -> Option<f64> {
        let previous = self.last.replace(timestamp)?;
        match timestamp.checked_sub(previous) {
            Some(delta) => Some(delta as f64),
            None => {
                self.backwards += 1;
                warn!(
                    "Timestamp {} precedes previous {}; using zero interval",
                    timestamp, previous
                );
                Some(0.0)
            }
        }
    }

    /// Timestamps seen out of order so far
    pub fn backwards_count(&self) -> u64 {
        self.backwards
    }
}

/// Health status for system monitoring
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Which half of the epoch lifecycle the engine is in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Collecting,
    Classifying,
}

/// Engine snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub phase: Phase,
    pub epoch: u64,
    pub baseline_len: usize,
    pub baseline_capacity: usize,
    pub post_baseline_samples: u64,
    pub batch_length: u64,
    pub bucket_count: usize,
    pub symbol_bits: u8,
    /// Fitted rate per microsecond, once calibrated
    pub rate_estimate: Option<f64>,
    pub queued_symbols: usize,
    pub available_bytes: usize,
    pub oldest_symbol_at: Option<DateTime<Utc>>,
    pub data_freshness_seconds: Option<u64>,
    pub drift_policy: DriftPolicy,
    pub engine: EngineStats,
    pub queue: QueueStats,
    pub last_drift_check: Option<DriftReport>,
}

/// Gateway status response
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    /// Overall health status
    pub status: HealthStatus,

    /// Whether the capture link is currently connected
    pub capture_connected: bool,

    /// Service uptime in seconds
    pub uptime_seconds: u64,

    /// Total requests served
    pub total_requests_served: u64,

    /// Total bytes served
    pub total_bytes_served: u64,

    /// Current requests per second
    pub requests_per_second: f64,

    pub engine: EngineStatus,

    /// Any warnings or issues
    pub warnings: Vec<String>,
}

/// Boundary table of the current epoch
#[derive(Debug, Clone, Serialize)]
pub struct BoundaryExport {
    pub epoch: u64,
    pub rate: f64,
    pub bucket_count: usize,
    pub boundaries: Vec<f64>,
}

impl BoundaryExport {
    pub fn new(epoch: u64, table: &BoundaryTable) -> Self {
        Self {
            epoch,
            rate: table.rate(),
            bucket_count: table.bucket_count(),
            boundaries: table.boundaries().to_vec(),
        }
    }
}

/// Encoding format for served bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncodingFormat {
    /// Raw binary data
    Binary,
    /// Hexadecimal encoding
    Hex,
    /// Base64 encoding
    Base64,
}

impl EncodingFormat {
    /// Parse from string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "binary" | "raw" => Some(Self::Binary),
            "hex" | "hexadecimal" => Some(Self::Hex),
            "base64" | "b64" => Some(Self::Base64),
            _ => None,
        }
    }

    /// Get MIME type for this encoding
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Binary => "application/octet-stream",
            Self::Hex | Self::Base64 => "text/plain; charset=utf-8",
        }
    }

    /// Render `data` in this encoding
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Binary => data.to_vec(),
            Self::Hex => hex::encode(data).into_bytes(),
            Self::Base64 => base64::engine::general_purpose::STANDARD
                .encode(data)
                .into_bytes(),
        }
    }
}
