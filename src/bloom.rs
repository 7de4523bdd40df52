// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A fixed-shape bloom filter over precomputed key hashes.
//!
//! Upper layers keep one of these per sealed segment to cheaply reject
//! absent keys before touching the segment's hash table. The filter is
//! built once from the complete hash list; its shape steps with the key
//! count so small segments pay 16 bytes, not 128.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

const BITS_PER_HALF: u32 = 32;

/// A fixed-shape bloom filter keyed by precomputed 32-bit hashes.
///
/// Three shapes, selected by key count: 2, 4 or 16 lanes of one 64-bit
/// word each. Every hash claims three bits within one half of one lane;
/// which lane and which half is carved out of the hash's low five bits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JournalBloom {
    lanes: Vec<u64>,
}

fn lane_count(n: usize) -> usize {
    match n {
        0 => 0,
        1..=16 => 2,
        17..=32 => 4,
        _ => 16,
    }
}

/// Splits a hash into its lane and the three-bit mask within that lane.
fn split_hash(hash: u32, lanes: usize) -> (usize, u64) {
    debug_assert!(lanes.is_power_of_two());

    let selector = hash & 31;
    let h0 = (hash >> 5) & 31;
    let h1 = (hash >> 10) & 31;
    let h2 = (hash >> 15) & 31;

    let lane = (selector as usize) & (lanes - 1);

    // Selector bit 4 switches between the word halves
    let base = if selector >> 4 == 0 { BITS_PER_HALF } else { 0 };

    let mask = (1u64 << (base + h0)) | (1u64 << (base + h1)) | (1u64 << (base + h2));

    (lane, mask)
}

impl JournalBloom {
    /// Builds a filter from a list of precomputed key hashes.
    #[must_use]
    pub fn from_hashes(hashes: &[u32]) -> Self {
        let lanes = lane_count(hashes.len());
        let mut words = vec![0u64; lanes];

        if lanes > 0 {
            for &hash in hashes {
                let (lane, mask) = split_hash(hash, lanes);

                // Lane index is masked to the lane count
                #[allow(clippy::indexing_slicing)]
                {
                    words[lane] |= mask;
                }
            }
        }

        Self { lanes: words }
    }

    /// Returns `true` if the hash may have been added.
    ///
    /// Will never have a false negative.
    #[must_use]
    pub fn check_hash(&self, hash: u32) -> bool {
        if self.lanes.is_empty() {
            return false;
        }

        let (lane, mask) = split_hash(hash, self.lanes.len());

        self.lanes.get(lane).is_some_and(|word| word & mask == mask)
    }

    /// Size of the serialized filter in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len() * std::mem::size_of::<u64>()
    }

    /// Whether the filter holds no keys at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Serializes the filter to its raw lane bytes.
    ///
    /// The shape is recoverable from the byte length, so no header is
    /// needed.
    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.len());

        for word in &self.lanes {
            #[allow(clippy::expect_used)]
            v.write_u64::<LittleEndian>(*word).expect("vec write");
        }

        v
    }

    /// Deserializes a filter from its raw lane bytes.
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let lanes = bytes.len() / std::mem::size_of::<u64>();

        if bytes.len() % std::mem::size_of::<u64>() != 0 || !matches!(lanes, 0 | 2 | 4 | 16) {
            return Err(crate::Error::Decode("bloom shape"));
        }

        let mut cursor = Cursor::new(bytes);
        let mut words = Vec::with_capacity(lanes);

        for _ in 0..lanes {
            words.push(cursor.read_u64::<LittleEndian>()?);
        }

        Ok(Self { lanes: words })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::HashSet;
    use test_log::test;

    fn distinct_hashes(rng: &mut StdRng, n: usize, taken: &mut HashSet<u32>) -> Vec<u32> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let h: u32 = rng.random();
            if taken.insert(h) {
                out.push(h);
            }
        }
        out
    }

    #[test]
    fn bloom_shapes() {
        assert_eq!(0, JournalBloom::from_hashes(&[]).len());
        assert_eq!(16, JournalBloom::from_hashes(&[1]).len());
        assert_eq!(16, JournalBloom::from_hashes(&(0..16).collect::<Vec<_>>()).len());
        assert_eq!(32, JournalBloom::from_hashes(&(0..17).collect::<Vec<_>>()).len());
        assert_eq!(32, JournalBloom::from_hashes(&(0..32).collect::<Vec<_>>()).len());
        assert_eq!(128, JournalBloom::from_hashes(&(0..33).collect::<Vec<_>>()).len());
        assert_eq!(128, JournalBloom::from_hashes(&(0..500).collect::<Vec<_>>()).len());
    }

    #[test]
    fn bloom_empty_rejects_everything() {
        let bloom = JournalBloom::from_hashes(&[]);
        assert!(bloom.is_empty());

        for hash in [0u32, 1, 5381, u32::MAX] {
            assert!(!bloom.check_hash(hash));
        }
    }

    #[test]
    fn bloom_soundness_all_shapes() {
        let mut rng = StdRng::seed_from_u64(0xB100);
        let mut taken = HashSet::new();

        for n in [1, 16, 17, 32, 33, 128, 1000] {
            let hashes = distinct_hashes(&mut rng, n, &mut taken);
            let bloom = JournalBloom::from_hashes(&hashes);

            for hash in hashes {
                assert!(bloom.check_hash(hash), "false negative at n={n}");
            }
        }
    }

    #[test]
    fn bloom_full_shape_false_positive_rate() {
        // At 128 keys the 16-lane shape holds 1024 bits with three probe
        // bits per key, which floors the false positive rate near 3-4%.
        // Aggregate over trials so the bound has the power to catch a
        // broken bit layout rather than just an implausible blowup.
        let mut rng = StdRng::seed_from_u64(0xB101);
        let mut taken = HashSet::new();

        let mut false_positives = 0usize;
        let mut probe_count = 0usize;

        for _ in 0..10 {
            let inserted = distinct_hashes(&mut rng, 128, &mut taken);
            let bloom = JournalBloom::from_hashes(&inserted);

            for &hash in &inserted {
                assert!(bloom.check_hash(hash));
            }

            // Disjoint from everything inserted in any trial
            let probes = distinct_hashes(&mut rng, 128, &mut taken);

            false_positives += probes.iter().filter(|&&h| bloom.check_hash(h)).count();
            probe_count += probes.len();
        }

        #[allow(clippy::cast_precision_loss)]
        let fpr = false_positives as f64 / probe_count as f64;

        assert!(
            fpr <= 0.06,
            "false positive rate {fpr:.3} exceeds the shape's ceiling",
        );
    }

    #[test]
    fn bloom_codec_round_trip() -> crate::Result<()> {
        let mut rng = StdRng::seed_from_u64(0xB102);
        let mut taken = HashSet::new();

        for n in [0, 10, 20, 100] {
            let hashes = distinct_hashes(&mut rng, n, &mut taken);
            let bloom = JournalBloom::from_hashes(&hashes);

            let bytes = bloom.encode_to_vec();
            assert_eq!(bloom.len(), bytes.len());

            let copy = JournalBloom::decode(&bytes)?;
            assert_eq!(bloom, copy);

            for hash in hashes {
                assert!(copy.check_hash(hash));
            }
        }

        Ok(())
    }

    #[test]
    fn bloom_codec_rejects_bad_shape() {
        assert!(JournalBloom::decode(&[0u8; 7]).is_err());
        assert!(JournalBloom::decode(&[0u8; 8]).is_err());
        assert!(JournalBloom::decode(&[0u8; 64]).is_err());
    }
}
