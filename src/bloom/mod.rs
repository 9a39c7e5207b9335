//! Space-efficient probabilistic set membership for SSTable point lookups.
//!
//! Each SSTable is paired with a sidecar `.bloom` file built from its point
//! keys (range-tombstone bounds are not included — see the grounded decision
//! in the crate's design notes). Before a point [`crate::sstable::SSTable::get`]
//! touches the sparse index or mmap, the bloom filter is consulted; a `false`
//! answer means the key is definitely absent and the table is skipped
//! entirely.
//!
//! Uses double hashing: `h(i) = h1 + i * h2`, with `h1`/`h2` derived from
//! FNV-1a over two different seeds. No false negatives; false positives occur
//! at approximately the configured rate.

use std::io::{self, Read, Write};

/// A bloom filter backed by a bit vector with `k` independent hash functions.
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u32,
    num_hashes: u32,
}

impl BloomFilter {
    /// Sizes a filter for `expected_items` keys at the given target false
    /// positive rate, using the standard formulas
    /// `m = ceil(-n * ln(p) / ln(2)^2)` and `k = max(1, ceil((m/n) * ln(2)))`.
    ///
    /// # Panics
    ///
    /// Panics if `expected_items` is 0 or `false_positive_rate` is not in
    /// `(0, 1)`.
    #[must_use]
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        assert!(expected_items > 0, "expected_items must be > 0");
        assert!(
            false_positive_rate > 0.0 && false_positive_rate < 1.0,
            "false_positive_rate must be in (0, 1)"
        );

        let n = expected_items as f64;
        let m = (-n * false_positive_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil();
        let m = (m as u64).clamp(8, u32::MAX as u64) as u32;

        let k = ((f64::from(m) / n) * std::f64::consts::LN_2).ceil();
        let k = (k as u32).max(1);

        let byte_len = ((m as usize) + 7) / 8;

        Self {
            bits: vec![0u8; byte_len],
            num_bits: m,
            num_hashes: k,
        }
    }

    fn from_raw(bits: Vec<u8>, num_bits: u32, num_hashes: u32) -> Self {
        Self {
            bits,
            num_bits,
            num_hashes,
        }
    }

    /// Inserts a key into the filter.
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..self.num_hashes {
            let bit = self.bit_index(h1, h2, i);
            self.set_bit(bit);
        }
    }

    /// Returns `true` if `key` might be in the set, `false` if it is
    /// definitely absent.
    #[must_use]
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        (0..self.num_hashes).all(|i| self.get_bit(self.bit_index(h1, h2, i)))
    }

    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    #[must_use]
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Serializes to the sidecar wire format: `[m: u32 LE][k: u32 LE][bits]`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.num_bits.to_le_bytes())?;
        w.write_all(&self.num_hashes.to_le_bytes())?;
        w.write_all(&self.bits)?;
        Ok(())
    }

    /// Deserializes from the sidecar wire format.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf4 = [0u8; 4];

        r.read_exact(&mut buf4)?;
        let num_bits = u32::from_le_bytes(buf4);

        r.read_exact(&mut buf4)?;
        let num_hashes = u32::from_le_bytes(buf4);

        let byte_len = ((num_bits as usize) + 7) / 8;
        let mut bits = vec![0u8; byte_len];
        r.read_exact(&mut bits)?;

        Ok(Self::from_raw(bits, num_bits, num_hashes))
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> u32 {
        let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (combined % u64::from(self.num_bits.max(1))) as u32
    }

    fn set_bit(&mut self, idx: u32) {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        self.bits[byte] |= 1 << bit;
    }

    fn get_bit(&self, idx: u32) -> bool {
        let byte = (idx / 8) as usize;
        let bit = idx % 8;
        self.bits[byte] & (1 << bit) != 0
    }

    fn hash_pair(key: &[u8]) -> (u64, u64) {
        (fnv1a(key, FNV_SEED_1), fnv1a(key, FNV_SEED_2))
    }
}

const FNV_SEED_1: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_SEED_2: u64 = 0x1000_0000_01b3;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
