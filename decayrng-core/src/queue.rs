//! Ordered output queue of produced symbols
//!
//! FIFO of symbols awaiting export, with all-or-nothing draining either as
//! symbol indices or as packed bytes. The queue carries no lock of its own:
//! it lives inside the engine and is guarded by the engine's single lock.

use crate::symbol::{Symbol, SymbolPacker};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Entry in the output queue with provenance tracking
#[derive(Debug, Clone)]
struct QueuedSymbol {
    symbol: Symbol,
    epoch: u64,
    produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub total_pushes: u64,
    pub symbols_drained: u64,
    pub bytes_drained: u64,
    pub drains_refused: u64,
    pub evictions_overflow: u64,
    pub symbols_retracted: u64,
}

/// FIFO of produced symbols
///
/// # Design
///
/// - Unbounded unless a soft cap is configured, in which case the oldest
///   symbol is evicted to make room
/// - Every entry remembers its calibration epoch so a drifted epoch's
///   symbols can be retracted
/// - Byte export packs `width` bits per symbol MSB-first and carries
///   leftover bits into the next byte request
#[derive(Debug)]
pub struct OutputQueue {
    entries: VecDeque<QueuedSymbol>,
    width: u8,
    max_symbols: Option<usize>,
    packer: SymbolPacker,
    stats: QueueStats,
}

impl OutputQueue {
    /// Create an unbounded queue for symbols of `width` bits
    pub fn new(width: u8) -> Self {
        Self {
            entries: VecDeque::new(),
            width,
            max_symbols: None,
            packer: SymbolPacker::new(),
            stats: QueueStats::default(),
        }
    }

    /// Create a queue that evicts its oldest symbol beyond `max_symbols`
    pub fn with_cap(width: u8, max_symbols: usize) -> Self {
        let mut queue = Self::new(width);
        queue.max_symbols = Some(max_symbols);
        queue
    }

    /// Append a symbol produced during `epoch`
    pub fn push(&mut self, symbol: Symbol, epoch: u64) {
        if let Some(cap) = self.max_symbols {
            while self.entries.len() >= cap && self.entries.pop_front().is_some() {
                self.stats.evictions_overflow += 1;
            }
        }

        self.entries.push_back(QueuedSymbol {
            symbol,
            epoch,
            produced_at: Utc::now(),
        });
        self.stats.total_pushes += 1;
    }

    /// Pop exactly `n` symbols (FIFO)
    ///
    /// Returns `None` if fewer than `n` are queued; nothing is consumed then.
    pub fn drain(&mut self, n: usize) -> Option<Vec<Symbol>> {
        if self.entries.len() < n {
            self.stats.drains_refused += 1;
            return None;
        }

        let out: Vec<Symbol> = self.entries.drain(..n).map(|e| e.symbol).collect();
        self.stats.symbols_drained += n as u64;
        Some(out)
    }

    /// Pop exactly `n` bytes of packed symbol bits
    ///
    /// Returns `None` if the queued bits cannot fill `n` bytes; nothing is
    /// consumed then.
    pub fn drain_bytes(&mut self, n: usize) -> Option<Bytes> {
        if n == 0 {
            return Some(Bytes::new());
        }

        let needed = self.packer.symbols_needed(n, self.width);
        if self.width == 0 || self.entries.len() < needed {
            self.stats.drains_refused += 1;
            return None;
        }

        let mut source = self.entries.drain(..needed).map(|e| e.symbol);
        let packed = self.packer.pack(n, self.width, &mut source)?;

        self.stats.symbols_drained += needed as u64;
        self.stats.bytes_drained += n as u64;
        Some(Bytes::from(packed))
    }

    /// Drop every still-queued symbol produced during `epoch`
    ///
    /// Bits already moved into the packer carry are not recalled.
    pub fn retract_epoch(&mut self, epoch: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.epoch != epoch);
        let removed = before - self.entries.len();
        self.stats.symbols_retracted += removed as u64;
        removed
    }

    /// Number of queued symbols
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bits per symbol
    pub fn width(&self) -> u8 {
        self.width
    }

    /// Whole bytes [`drain_bytes`](Self::drain_bytes) could serve right now
    pub fn available_bytes(&self) -> usize {
        (self.packer.carry_bits() + self.entries.len() * self.width as usize) / 8
    }

    /// Get timestamp of oldest queued symbol
    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.front().map(|e| e.produced_at)
    }

    /// Get age of oldest queued symbol in seconds
    pub fn freshness_seconds(&self) -> Option<u64> {
        self.oldest_timestamp().map(|ts| {
            Utc::now()
                .signed_duration_since(ts)
                .num_seconds()
                .max(0) as u64
        })
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.clone()
    }
}
