// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Hashes a serialized journal key.
///
/// This is the classic DJB hash with xor mixing, truncated to 32 bits:
/// `h = 5381; h = (h * 33) ^ byte`. Both the on-disk hash index and the
/// writer's in-memory index key off this value, so it must never change
/// for a given format version.
#[must_use]
pub fn journal_hash(bytes: &[u8]) -> u32 {
    let mut h: u32 = 5381;

    for &b in bytes {
        h = h.wrapping_mul(33) ^ u32::from(b);
    }

    h
}

/// Selects the hash subtable responsible for a hash value.
///
/// The low 8 bits address one of the 256 subtables; the remaining bits
/// position the entry within it (see `segment::index`).
#[must_use]
pub fn hash_to_index(hash: u32) -> usize {
    (hash & 0xFF) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_pinned_vectors() {
        assert_eq!(5381, journal_hash(b""));
        assert_eq!(177_604, journal_hash(b"a"));
        assert_eq!(2_088_047_427, journal_hash(b"key1"));
    }

    #[test]
    fn hash_index_bits() {
        assert_eq!(0x43, hash_to_index(2_088_047_427));
        assert_eq!(5381 & 0xFF, hash_to_index(5381));

        for h in [0u32, 1, 255, 256, 0xFFFF_FFFF] {
            assert!(hash_to_index(h) < 256);
        }
    }

    #[test]
    fn hash_is_stable_across_chunks() {
        // Hashing is defined over the full serialized key, byte by byte
        let whole = journal_hash(b"abcdef");
        let mut h = 5381u32;
        for &b in b"abcdef" {
            h = h.wrapping_mul(33) ^ u32::from(b);
        }
        assert_eq!(whole, h);
    }
}
