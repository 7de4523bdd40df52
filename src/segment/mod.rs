// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Journal segment files.
//!
//! A segment is one file of the journal. It is written append-only as a
//! `.pnd` file, then sealed: the two-level hash index is written behind
//! the records, the file is renamed to `.cdb` and from then on it is
//! immutable until deletion.
//!
//! File layout:
//!
//! ```text
//! [0, 2048)               top index: 256 x (subtable position u32 LE, slot count u32 LE)
//! [2048, hash region)     records, packed back to back in insertion order
//! [hash region, EOF)      256 hash subtables, open-addressed (hash u32 LE, position u32 LE) slots
//! ```
//!
//! [`SegmentFile`] is the synchronous owner of one such file;
//! [`SegmentActor`]/[`SegmentHandle`] wrap it in a per-file thread so all
//! external access is serialized, and add the `rolling` and
//! `delete_pending` phases of the lifecycle.

pub mod actor;
mod file;
mod index;
mod record;

pub use {
    actor::{SegmentActor, SegmentHandle, SegmentStatus},
    file::{KeyPresence, ScanControl, SegmentFile},
    index::MemIndex,
    record::FetchedRecord,
};

/// Offset of a record within a segment file.
///
/// The hash index stores 32-bit positions, which bounds segment files to
/// 4 GiB; the default size cap stays below that.
pub type Position = u32;

/// Byte offset where the record region starts (top index ends).
pub const RECORD_REGION_START: u64 = 2_048;

/// Lifecycle state of a segment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SegmentState {
    /// Spawned, not yet opened
    Starting,

    /// Writable `.pnd` file accepting appends
    Writer,

    /// Seal requested, hash index being computed externally
    Rolling,

    /// Sealed `.cdb` file serving reads
    Reader,

    /// Retired, polling for permission to delete the file
    DeletePending,
}

impl std::fmt::Display for SegmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Reply to an append.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SegmentWriteOutcome {
    /// Record written; carries the new append cursor
    Ok(u64),

    /// The record would push the file past its size cap; the caller must
    /// seal this segment and open a new one
    Roll,
}

/// What [`SegmentFile::direct_fetch`] should materialize per position.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FetchMode {
    /// Key only
    Key,

    /// Key plus the on-disk value length (CRC included)
    KeySize,

    /// Key, value and the CRC verdict
    KeyValueCheck,
}
