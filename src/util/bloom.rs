use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Bloom filter over record ids. Sized from `(expected_items,
/// false_positive_rate)` with the standard formulas; probes use double
/// hashing over two lanes of one SHA-256 digest, which keeps membership
/// tests stable across processes and releases.
#[derive(Clone, Debug)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
    expected_items: usize,
    false_positive_rate: f64,
}

/// Wire form of the `.bloom` blob.
#[derive(Serialize, Deserialize)]
pub struct BloomBlob {
    pub expected_items: usize,
    pub false_positive_rate: f64,
    pub bits: String,
}

const LN2: f64 = std::f64::consts::LN_2;

impl BloomFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let num_bits = ((-n * p.ln()) / (LN2 * LN2)).ceil().max(8.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * LN2).round().max(1.0) as u32;
        Self {
            bits: vec![0; num_bits.div_ceil(8) as usize],
            num_bits,
            num_hashes,
            expected_items,
            false_positive_rate,
        }
    }

    pub fn insert(&mut self, id: &str) {
        let (h1, h2) = hash_pair(id);
        for i in 0..self.num_hashes {
            let bit = probe(h1, h2, i, self.num_bits);
            self.bits[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    pub fn might_contain(&self, id: &str) -> bool {
        let (h1, h2) = hash_pair(id);
        (0..self.num_hashes).all(|i| {
            let bit = probe(h1, h2, i, self.num_bits);
            self.bits[(bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    pub fn to_blob(&self) -> BloomBlob {
        BloomBlob {
            expected_items: self.expected_items,
            false_positive_rate: self.false_positive_rate,
            bits: BASE64.encode(&self.bits),
        }
    }

    pub fn from_blob(blob: &BloomBlob) -> Result<Self, Error> {
        let mut filter = Self::new(blob.expected_items, blob.false_positive_rate);
        let bits = BASE64
            .decode(&blob.bits)
            .map_err(|e| Error::InvalidRecord(format!("bloom bit array: {e}")))?;
        if bits.len() != filter.bits.len() {
            return Err(Error::InvalidRecord(format!(
                "bloom bit array length {} does not match parameters (expected {})",
                bits.len(),
                filter.bits.len()
            )));
        }
        filter.bits = bits;
        Ok(filter)
    }
}

fn hash_pair(id: &str) -> (u64, u64) {
    let digest = Sha256::digest(id.as_bytes());
    let h1 = u64::from_le_bytes(digest[0..8].try_into().unwrap());
    let h2 = u64::from_le_bytes(digest[8..16].try_into().unwrap());
    (h1, h2 | 1)
}

fn probe(h1: u64, h2: u64, i: u32, num_bits: u64) -> u64 {
    h1.wrapping_add(h2.wrapping_mul(i as u64)) % num_bits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for i in 0..1_000 {
            filter.insert(&format!("id-{i}"));
        }
        for i in 0..1_000 {
            assert!(filter.might_contain(&format!("id-{i}")));
        }
    }

    #[test]
    fn false_positive_rate_near_target() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for i in 0..1_000 {
            filter.insert(&format!("id-{i}"));
        }
        let hits = (0..10_000)
            .filter(|i| filter.might_contain(&format!("other-{i}")))
            .count();
        // 1% target; allow generous slack over 10k probes.
        assert!(hits < 300, "false positive count {hits}");
    }

    #[test]
    fn blob_round_trip_preserves_membership() {
        let mut filter = BloomFilter::new(100, 0.05);
        filter.insert("alpha");
        filter.insert("beta");

        let encoded = serde_json::to_vec(&filter.to_blob()).unwrap();
        let decoded: BloomBlob = serde_json::from_slice(&encoded).unwrap();
        let restored = BloomFilter::from_blob(&decoded).unwrap();
        assert!(restored.might_contain("alpha"));
        assert!(restored.might_contain("beta"));
        assert_eq!(restored.num_bits, filter.num_bits);
        assert_eq!(restored.num_hashes, filter.num_hashes);
    }

    #[test]
    fn rejects_mismatched_bit_array() {
        let blob = BloomBlob {
            expected_items: 100,
            false_positive_rate: 0.05,
            bits: BASE64.encode([0u8; 3]),
        };
        assert!(BloomFilter::from_blob(&blob).is_err());
    }
}
