//! Abstract bit patterns and stream-ordered buffer access.
//!
//! A [RawBits] is the on-the-wire value of a single item, independent of where it sits
//! in a packet. Index 0 is always the least significant bit, regardless of the bit order
//! the item uses on the wire; [extract] and [insert] take care of normalizing the order.
//!
//! Buffers are addressed in stream order: bit 0 is the most significant bit of byte 0,
//! bit 8 the most significant bit of byte 1, and so on.
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::model::BitOrder;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawBits {
    bits: Vec<bool>,
}

impl RawBits {
    /// All-zero pattern of `len` bits.
    #[must_use]
    pub fn zeros(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    /// The low `len` bits of `value`. Bits above 128 are zero.
    #[must_use]
    pub fn from_u128(value: u128, len: usize) -> Self {
        let bits = (0..len)
            .map(|idx| idx < 128 && (value >> idx) & 1 == 1)
            .collect();
        Self { bits }
    }

    /// Interpret the pattern as an unsigned integer, or `None` if a bit above 127 is set.
    #[must_use]
    pub fn to_u128(&self) -> Option<u128> {
        if self.bits.iter().skip(128).any(|b| *b) {
            return None;
        }
        Some(
            self.bits
                .iter()
                .take(128)
                .enumerate()
                .filter(|(_, b)| **b)
                .fold(0u128, |acc, (idx, _)| acc | (1u128 << idx)),
        )
    }

    /// Big-endian bytes, `bytes[0]` holding the most significant bits.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len() * 8;
        let mut bits = vec![false; len];
        for (pos, bit) in bits.iter_mut().enumerate() {
            let stream = len - 1 - pos;
            *bit = (bytes[stream / 8] >> (7 - stream % 8)) & 1 == 1;
        }
        Self { bits }
    }

    /// Big-endian bytes. Patterns that are not a multiple of 8 bits are zero padded on
    /// the most significant side.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let num = self.bits.len().div_ceil(8);
        let mut bytes = vec![0u8; num];
        for (idx, bit) in self.bits.iter().enumerate() {
            if *bit {
                bytes[num - 1 - idx / 8] |= 1 << (idx % 8);
            }
        }
        bytes
    }

    /// Parse hex digits, with or without a `0x` prefix, into a pattern of `len` bits.
    ///
    /// Returns `None` for non-hex input or if a set bit does not fit in `len` bits.
    #[must_use]
    pub fn from_hex(s: &str, len: usize) -> Option<Self> {
        let digits = strip_hex_prefix(s).unwrap_or(s);
        if digits.is_empty() {
            return None;
        }
        let mut bits = vec![false; len];
        for (nibble_idx, c) in digits.chars().rev().enumerate() {
            let nibble = c.to_digit(16)?;
            for shift in 0..4 {
                if (nibble >> shift) & 1 == 1 {
                    let idx = nibble_idx * 4 + shift;
                    if idx >= len {
                        return None;
                    }
                    bits[idx] = true;
                }
            }
        }
        Some(Self { bits })
    }

    /// Lowercase hex with a `0x` prefix, one pair of digits per byte of [Self::to_bytes].
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut s = String::from("0x");
        for b in self.to_bytes() {
            s.push_str(&format!("{b:02x}"));
        }
        s
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        self.bits.get(idx).copied().unwrap_or(false)
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        if let Some(bit) = self.bits.get_mut(idx) {
            *bit = value;
        }
    }

    /// The most significant bit, i.e., the sign bit for signed encodings.
    #[must_use]
    pub fn msb(&self) -> bool {
        self.bits.last().copied().unwrap_or(false)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }
}

impl Display for RawBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub(crate) fn strip_hex_prefix(s: &str) -> Option<&str> {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))
}

fn stream_bit(buf: &[u8], pos: u64) -> bool {
    let byte = buf[(pos / 8) as usize];
    (byte >> (7 - pos % 8)) & 1 == 1
}

/// Read `size` bits starting at stream bit `start` out of `buf`.
///
/// Returns `None` if the range is not fully contained in `buf`.
#[must_use]
pub fn extract(buf: &[u8], start: u64, size: u64, order: BitOrder) -> Option<RawBits> {
    let available = buf.len() as u64 * 8;
    if start + size > available {
        return None;
    }
    let size = size as usize;
    let mut bits = RawBits::zeros(size);
    for i in 0..size {
        let wire = stream_bit(buf, start + i as u64);
        match order {
            BitOrder::MostSignificantBitFirst => bits.set(size - 1 - i, wire),
            BitOrder::LeastSignificantBitFirst => bits.set(i, wire),
        }
    }
    Some(bits)
}

/// Write `bits` into `buf` starting at stream bit `start`.
///
/// Returns false, leaving `buf` untouched, if the bits do not fit.
pub fn insert(buf: &mut [u8], start: u64, bits: &RawBits, order: BitOrder) -> bool {
    let size = bits.len();
    if start + size as u64 > buf.len() as u64 * 8 {
        return false;
    }
    for i in 0..size {
        let value = match order {
            BitOrder::MostSignificantBitFirst => bits.get(size - 1 - i),
            BitOrder::LeastSignificantBitFirst => bits.get(i),
        };
        let pos = start + i as u64;
        let byte = &mut buf[(pos / 8) as usize];
        let mask = 1u8 << (7 - pos % 8);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
    true
}
