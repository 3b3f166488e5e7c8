//! Symbols and their fixed-width bit encoding

use serde::{Deserialize, Serialize};
use std::fmt;

/// A bucket index emitted for one classified interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(u16);

impl Symbol {
    /// Largest supported bucket count (16-bit symbols)
    pub const MAX_BUCKETS: usize = 1 << 16;

    pub fn new(index: u16) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl From<Symbol> for u16 {
    fn from(s: Symbol) -> Self {
        s.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MSB-first bit packer with carry-over between calls
///
/// Bits of a symbol that do not fit the requested output stay in the carry
/// and lead the next output; nothing is padded or dropped.
#[derive(Debug, Clone, Default)]
pub struct SymbolPacker {
    carry: u32,
    carry_len: u8,
}

impl SymbolPacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits currently held over from earlier calls
    pub fn carry_bits(&self) -> usize {
        self.carry_len as usize
    }

    /// Number of symbols needed on top of the carry to produce `bytes` bytes
    pub fn symbols_needed(&self, bytes: usize, width: u8) -> usize {
        let wanted = bytes * 8;
        let have = self.carry_bits();
        if wanted <= have || width == 0 {
            return 0;
        }
        (wanted - have).div_ceil(width as usize)
    }

    /// Produce exactly `bytes` bytes, pulling symbols from `source`
    ///
    /// Returns `None` if `source` runs dry first; callers check
    /// [`symbols_needed`](Self::symbols_needed) beforehand so this does not
    /// happen in practice.
    pub fn pack<I>(&mut self, bytes: usize, width: u8, source: &mut I) -> Option<Vec<u8>>
    where
        I: Iterator<Item = Symbol>,
    {
        let mask = |len: u8| -> u64 { (1u64 << len) - 1 };

        let mut out = Vec::with_capacity(bytes);
        let mut acc = self.carry as u64;
        let mut acc_len = self.carry_len;

        while out.len() < bytes {
            while acc_len < 8 {
                let symbol = source.next()?;
                acc = (acc << width) | (symbol.value() as u64 & mask(width));
                acc_len += width;
            }
            out.push((acc >> (acc_len - 8)) as u8);
            acc_len -= 8;
            acc &= mask(acc_len);
        }

        self.carry = acc as u32;
        self.carry_len = acc_len;
        Some(out)
    }
}
