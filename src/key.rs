// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{hash::journal_hash, SeqNo};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

/// Journal record kind
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    /// A standard value: the full object plus its key deltas
    Standard,

    /// A deletion marker; carries no payload
    Tombstone,

    /// Key deltas only, the object itself has been compacted away
    KeyDelta,
}

impl Kind {
    fn to_tag(self) -> u8 {
        match self {
            Self::Standard => 0,
            Self::Tombstone => 1,
            Self::KeyDelta => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Standard),
            1 => Some(Self::Tombstone),
            2 => Some(Self::KeyDelta),
            _ => None,
        }
    }
}

/// The key of one journal record.
///
/// A journal key is the `(sequence number, kind, ledger key)` triple. The
/// sequence number is assigned by the producer and strictly increases
/// across the whole journal; the ledger key is opaque bytes identifying
/// the logical object.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct JournalKey {
    /// Sequence number of the record
    pub sqn: SeqNo,

    /// Record kind
    pub kind: Kind,

    /// Opaque ledger key
    pub ledger_key: Vec<u8>,
}

impl JournalKey {
    /// Creates a journal key.
    #[must_use]
    pub fn new(sqn: SeqNo, kind: Kind, ledger_key: Vec<u8>) -> Self {
        Self {
            sqn,
            kind,
            ledger_key,
        }
    }

    /// Serialized length in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        std::mem::size_of::<u64>() + 1 + self.ledger_key.len()
    }

    /// Serializes the key.
    ///
    /// Layout: sequence number (u64 LE), kind tag (u8), ledger key bytes.
    /// The total length is carried by the record header, so the ledger key
    /// needs no length prefix of its own.
    pub fn encode_into<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u64::<LittleEndian>(self.sqn)?;
        writer.write_u8(self.kind.to_tag())?;
        writer.write_all(&self.ledger_key)?;
        Ok(())
    }

    /// Serializes the key into a fresh buffer.
    #[must_use]
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.encoded_len());

        // Writing into a Vec cannot fail
        #[allow(clippy::expect_used)]
        self.encode_into(&mut v).expect("vec write");

        v
    }

    /// Deserializes a key from `bytes` (the exact serialized length).
    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let mut reader = Cursor::new(bytes);

        let sqn = reader.read_u64::<LittleEndian>()?;
        let tag = reader.read_u8()?;

        let kind = Kind::from_tag(tag).ok_or(crate::Error::Decode("journal key kind"))?;

        let mut ledger_key = Vec::with_capacity(bytes.len().saturating_sub(9));
        reader.read_to_end(&mut ledger_key)?;

        Ok(Self {
            sqn,
            kind,
            ledger_key,
        })
    }

    /// Hash of the serialized key, as used by the segment hash index.
    #[must_use]
    pub fn hash(&self) -> u32 {
        journal_hash(&self.encode_to_vec())
    }
}

/// Splits a standard value payload into `(object, key deltas)`.
///
/// Standard payloads are laid out as object length (u32 LE), object bytes,
/// delta bytes. Key-delta payloads are the deltas verbatim; tombstones are
/// empty.
pub fn split_object(value: &[u8]) -> crate::Result<(&[u8], &[u8])> {
    let mut reader = Cursor::new(value);
    let object_len = reader.read_u32::<LittleEndian>()? as usize;

    let rest = value.get(4..).ok_or(crate::Error::Decode("value payload"))?;

    if object_len > rest.len() {
        return Err(crate::Error::Decode("value payload"));
    }

    Ok(rest.split_at(object_len))
}

/// Builds a standard value payload from an object and its key deltas.
///
/// # Panics
///
/// Panics if the object is larger than 2^32 bytes.
#[must_use]
pub fn join_object(object: &[u8], deltas: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(4 + object.len() + deltas.len());

    #[allow(clippy::expect_used)]
    v.write_u32::<LittleEndian>(u32::try_from(object.len()).expect("object fits u32"))
        .expect("vec write");

    v.extend_from_slice(object);
    v.extend_from_slice(deltas);
    v
}

/// Reload strategy of a ledger-key namespace.
///
/// Governs what the compactor may do with a superseded record of that
/// namespace; the semantics of each strategy live with the wider engine,
/// the compactor only dispatches on them.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReloadStrategy {
    /// Superseded objects are reduced to their key deltas
    Retain,

    /// Superseded records may be dropped; the ledger can recalculate
    Recalc,

    /// Superseded records may be dropped; recovery reloads from elsewhere
    Recover,
}

/// Maps ledger keys to their reload strategy.
///
/// Keyed by the first byte of the ledger key (the namespace tag). Keys
/// with no entry fall back to [`ReloadStrategy::Retain`], the conservative
/// choice.
#[derive(Clone, Debug, Default)]
pub struct TagStrategyTable {
    entries: Vec<(u8, ReloadStrategy)>,
}

impl TagStrategyTable {
    /// Creates a table from `(namespace tag, strategy)` pairs.
    #[must_use]
    pub fn new(entries: Vec<(u8, ReloadStrategy)>) -> Self {
        Self { entries }
    }

    /// Creates a table mapping every namespace to one strategy.
    #[must_use]
    pub fn uniform(strategy: ReloadStrategy) -> Self {
        Self {
            entries: (0..=u8::MAX).map(|tag| (tag, strategy)).collect(),
        }
    }

    /// Looks up the strategy for a ledger key.
    #[must_use]
    pub fn strategy_for(&self, ledger_key: &[u8]) -> ReloadStrategy {
        let tag = ledger_key.first().copied().unwrap_or_default();

        self.entries
            .iter()
            .find(|(t, _)| *t == tag)
            .map_or(ReloadStrategy::Retain, |(_, s)| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_codec_round_trip() -> crate::Result<()> {
        let key = JournalKey::new(42, Kind::Standard, b"bucket1|key1".to_vec());

        let bytes = key.encode_to_vec();
        assert_eq!(key.encoded_len(), bytes.len());

        let decoded = JournalKey::decode(&bytes)?;
        assert_eq!(key, decoded);

        Ok(())
    }

    #[test]
    fn key_codec_all_kinds() -> crate::Result<()> {
        for kind in [Kind::Standard, Kind::Tombstone, Kind::KeyDelta] {
            let key = JournalKey::new(7, kind, b"k".to_vec());
            assert_eq!(key, JournalKey::decode(&key.encode_to_vec())?);
        }
        Ok(())
    }

    #[test]
    fn key_codec_rejects_bad_kind() {
        let mut bytes = JournalKey::new(1, Kind::Standard, b"k".to_vec()).encode_to_vec();
        bytes[8] = 99;

        assert!(matches!(
            JournalKey::decode(&bytes),
            Err(crate::Error::Decode(_)),
        ));
    }

    #[test]
    fn key_hash_orders_by_serialization() {
        let a = JournalKey::new(1, Kind::Standard, b"key1".to_vec());
        let b = JournalKey::new(2, Kind::Standard, b"key1".to_vec());

        // Different SQNs serialize differently, so they hash independently
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.hash());
    }

    #[test]
    fn value_payload_split() -> crate::Result<()> {
        let payload = join_object(b"object-bytes", b"deltas");

        let (object, deltas) = split_object(&payload)?;
        assert_eq!(b"object-bytes", object);
        assert_eq!(b"deltas", deltas);

        let empty = join_object(b"", b"");
        assert_eq!((&[][..], &[][..]), split_object(&empty)?);

        Ok(())
    }

    #[test]
    fn value_payload_split_rejects_short_buffer() {
        assert!(split_object(&[1, 0, 0]).is_err());

        // Claims a 100-byte object but carries 3 bytes
        let mut bad = vec![100, 0, 0, 0];
        bad.extend_from_slice(b"abc");
        assert!(split_object(&bad).is_err());
    }

    #[test]
    fn tag_strategy_lookup() {
        let table = TagStrategyTable::new(vec![
            (b'o', ReloadStrategy::Retain),
            (b'i', ReloadStrategy::Recalc),
        ]);

        assert_eq!(
            ReloadStrategy::Retain,
            table.strategy_for(b"o|bucket|key"),
        );
        assert_eq!(ReloadStrategy::Recalc, table.strategy_for(b"i|bucket"));

        // Unknown namespaces stay conservative
        assert_eq!(ReloadStrategy::Retain, table.strategy_for(b"x|bucket"));
        assert_eq!(ReloadStrategy::Retain, table.strategy_for(b""));
    }
}
