// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An append-only, hash-indexed value journal with background compaction.
//!
//! ##### NOTE
//!
//! > This crate only provides the journal layer of a log-structured
//! > key/value engine: the segment files, their lifecycle, and the
//! > compaction machinery. It does not ship the ordered key index
//! > ("ledger") or a client-facing API.
//!
//! ##### About
//!
//! The journal is a sequence of segment files. A segment starts out as a
//! writable `.pnd` file that records are appended to; when it fills up (or
//! is explicitly sealed) a two-level hash index is written behind the
//! records, the file is renamed to `.cdb` and becomes immutable. Lookups
//! against a sealed segment go through the on-disk index; lookups against
//! the writable segment go through an in-memory copy of the same index.
//!
//! Every record is keyed by a [`JournalKey`]: a strictly increasing
//! sequence number, a record kind (standard value, tombstone or key-delta)
//! and the opaque ledger key it belongs to. Old segments accumulate
//! records that later sequence numbers have superseded; the
//! [`compaction`] module scores segments by sampling them, selects a
//! contiguous run worth rewriting, copies the surviving records into
//! fresh segments and retires the originals through a two-phase delete
//! handshake with the manifest owner.
//!
//! # Example
//!
//! ```
//! use journal_log::{
//!     segment::{SegmentFile, SegmentWriteOutcome},
//!     Config, JournalKey, Kind,
//! };
//! # use std::sync::Arc;
//!
//! # fn main() -> journal_log::Result<()> {
//! let folder = tempfile::tempdir()?;
//! let config = Arc::new(Config::new(folder.path()));
//!
//! let mut segment = SegmentFile::create(folder.path().join("journal_1.pnd"), &config)?;
//!
//! let key = JournalKey::new(1, Kind::Standard, b"my_key".to_vec());
//! let outcome = segment.put(&key, b"my_value")?;
//! assert!(matches!(outcome, SegmentWriteOutcome::Ok(_)));
//!
//! // Reads work against the in-memory index while the segment is writable
//! let value = segment.get(&key)?;
//! assert_eq!(Some(b"my_value".to_vec()), value.map(|(_, v)| v));
//!
//! // Sealing writes the hash index and renames .pnd -> .cdb
//! let segment = segment.complete()?;
//!
//! // ...and the same key reads back through the on-disk index
//! let value = segment.get(&key)?;
//! assert_eq!(Some(b"my_value".to_vec()), value.map(|(_, v)| v));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

#[doc(hidden)]
pub mod bloom;

pub mod compaction;
mod config;
mod error;

#[doc(hidden)]
pub mod file;

mod hash;
mod key;

pub mod ledger;

mod manifest;

pub mod segment;

mod seqno;

pub use {
    bloom::JournalBloom,
    config::Config,
    error::{Error, Result},
    hash::{hash_to_index, journal_hash},
    key::{join_object, split_object, JournalKey, Kind, ReloadStrategy, TagStrategyTable},
    manifest::{InkerClient, ManifestEntry},
    seqno::{SeqNo, SequenceCounter},
};
