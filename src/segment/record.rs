// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{file::read_exact, JournalKey};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{fs::File, io::Cursor};

/// Record header: key length (u32 LE) + value length (u32 LE)
pub const RECORD_HEADER_LEN: u64 = 8;

/// Width of the CRC stored in front of the value
pub const CRC_LEN: u64 = 4;

/// A record fetched from a segment, shaped by the fetch mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchedRecord {
    /// Key only
    Key(JournalKey),

    /// Key plus the on-disk value length (CRC included)
    KeySize {
        /// The record's journal key
        key: JournalKey,
        /// Stored value length in bytes, CRC included
        disk_size: u32,
    },

    /// Key, value and the CRC verdict
    KeyValue {
        /// The record's journal key
        key: JournalKey,
        /// The record's value payload
        value: Vec<u8>,
        /// Whether the stored CRC matched the value bytes
        crc_ok: bool,
    },
}

impl FetchedRecord {
    /// The journal key, whatever the fetch mode was.
    #[must_use]
    pub fn key(&self) -> &JournalKey {
        match self {
            Self::Key(key) | Self::KeySize { key, .. } | Self::KeyValue { key, .. } => key,
        }
    }
}

/// Outcome of trying to read one record at a position.
#[derive(Debug)]
pub enum RecordRead {
    /// A structurally complete record
    Record {
        /// Decoded journal key
        key: JournalKey,
        /// Value payload (CRC stripped)
        value: Vec<u8>,
        /// Whether the stored CRC matched
        crc_ok: bool,
        /// Position just past this record
        next: u64,
    },

    /// The position sits exactly on the region boundary, or on zero
    /// padding: there is no further record
    Boundary,

    /// A record starts here but does not fit before the limit; the tail
    /// was cut off mid-write
    Truncated,
}

/// Serialized length of a record for a given key and value.
#[must_use]
pub fn encoded_len(key: &JournalKey, value: &[u8]) -> u64 {
    RECORD_HEADER_LEN + key.encoded_len() as u64 + CRC_LEN + value.len() as u64
}

/// Serializes one record.
///
/// Layout: key length (u32 LE), value length incl. CRC (u32 LE), key
/// bytes, CRC32 over the value (u32 BE), value bytes.
///
/// # Panics
///
/// Panics if the key or value exceed 2^32 bytes.
#[must_use]
#[allow(clippy::expect_used)]
pub fn encode(key: &JournalKey, value: &[u8]) -> Vec<u8> {
    let key_bytes = key.encode_to_vec();

    let key_len = u32::try_from(key_bytes.len()).expect("key fits u32");
    let val_len = u32::try_from(value.len() as u64 + CRC_LEN).expect("value fits u32");

    let mut out = Vec::with_capacity((RECORD_HEADER_LEN + CRC_LEN) as usize + key_bytes.len() + value.len());

    out.write_u32::<LittleEndian>(key_len).expect("vec write");
    out.write_u32::<LittleEndian>(val_len).expect("vec write");
    out.extend_from_slice(&key_bytes);
    out.write_u32::<BigEndian>(crc32fast::hash(value)).expect("vec write");
    out.extend_from_slice(value);

    out
}

/// Reads the record starting at `pos`, bounded by `limit` (the end of the
/// record region).
///
/// Structural damage (header past the limit, body past the limit, key
/// that does not decode) is reported as [`RecordRead::Truncated`], not as
/// an error: the caller decides whether that means "stop scanning" or
/// "truncate the file here". A CRC mismatch is NOT structural damage; the
/// record is returned with `crc_ok == false`.
pub fn read_at(file: &File, pos: u64, limit: u64) -> crate::Result<RecordRead> {
    if pos + RECORD_HEADER_LEN > limit {
        return Ok(RecordRead::Boundary);
    }

    let header = read_exact(file, pos, RECORD_HEADER_LEN as usize)?;
    let mut header = Cursor::new(header);

    let key_len = u64::from(header.read_u32::<LittleEndian>()?);
    let val_len = u64::from(header.read_u32::<LittleEndian>()?);

    if key_len == 0 && val_len == 0 {
        // Zero padding, e.g. the reserved top-index region of a file that
        // never got its first record
        return Ok(RecordRead::Boundary);
    }

    if key_len == 0 || val_len < CRC_LEN {
        return Ok(RecordRead::Truncated);
    }

    let body_len = key_len + val_len;

    if pos + RECORD_HEADER_LEN + body_len > limit {
        return Ok(RecordRead::Truncated);
    }

    let body = read_exact(file, pos + RECORD_HEADER_LEN, body_len as usize)?;

    let Some(key_bytes) = body.get(..key_len as usize) else {
        return Ok(RecordRead::Truncated);
    };

    let Ok(key) = JournalKey::decode(key_bytes) else {
        return Ok(RecordRead::Truncated);
    };

    let mut crc_reader = Cursor::new(body.get(key_len as usize..).unwrap_or_default());
    let expected_crc = crc_reader.read_u32::<BigEndian>()?;

    let value = body
        .get((key_len + CRC_LEN) as usize..)
        .unwrap_or_default()
        .to_vec();

    let crc_ok = crc32fast::hash(&value) == expected_crc;

    Ok(RecordRead::Record {
        key,
        value,
        crc_ok,
        next: pos + RECORD_HEADER_LEN + body_len,
    })
}
