// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The ledger-side merge coordinator.
//!
//! The ledger (the engine's ordered key index) is not implemented in this
//! crate; what lives here is its compaction peer: a long-lived actor that
//! polls the ledger for merge work, pushes one file from an upper level
//! into the overlapping set of the level below, persists the manifest
//! change and walks the deferred-deletion handshake.
//!
//! The ledger and its file format stay behind the [`LedgerControl`] and
//! [`SortedFile`] traits.

mod coordinator;
mod merge;

pub use {
    coordinator::{CoordinatorHandle, MergeCoordinator},
    merge::{merge_streams, output_file_path, MAX_MERGE_FILE_ENTRIES},
};

use std::path::{Path, PathBuf};

/// One `(key, value)` pair of a sorted ledger file.
pub type LedgerEntry = (Vec<u8>, Vec<u8>);

/// One sorted, immutable file of the ledger.
///
/// The coordinator never looks inside beyond ordered iteration; the real
/// on-disk format is the backend's business.
pub trait SortedFile {
    /// Smallest key in the file.
    fn smallest_key(&self) -> Vec<u8>;

    /// Largest key in the file.
    fn largest_key(&self) -> Vec<u8>;

    /// All entries, in key order.
    fn entries(&self) -> crate::Result<Vec<LedgerEntry>>;

    /// Marks the file for deletion once no reader can reach it anymore.
    fn set_for_delete(&self);
}

/// A unit of merge work handed out by the ledger.
#[derive(Clone, Debug)]
pub struct MergeWork {
    /// Level the source file is picked from
    pub src_level: u32,

    /// Whether the target level is the basement (the lowest level); the
    /// backend uses this to elide tombstones in the files it writes
    pub target_is_basement: bool,

    /// Root path merged output files are named under
    pub root_path: PathBuf,

    /// First free output file counter at the target level
    pub next_counter: u64,

    /// Path of the ledger manifest to rewrite
    pub manifest_path: PathBuf,
}

/// The outcome of one merge, as reported to the ledger.
#[derive(Clone, Debug)]
pub struct MergeChange<F> {
    /// Level the merge pulled from
    pub src_level: u32,

    /// Files added to `src_level + 1`
    pub new_files: Vec<F>,

    /// Files no longer referenced once the change commits; deleted after
    /// the ledger's callback
    pub displaced: Vec<F>,
}

/// The ledger surface the coordinator drives.
///
/// Owned by the coordinator's thread; implementations share state with
/// the ledger through their own interior mechanisms.
pub trait LedgerControl: Send + 'static {
    /// The backend's file representation.
    type File: SortedFile + Clone + Send + 'static;

    /// Asks the ledger for merge work. `None` means stay idle.
    fn poll_work(&self) -> Option<MergeWork>;

    /// All files at a level.
    fn files_at_level(&self, level: u32) -> Vec<Self::File>;

    /// Files at `level` whose key range overlaps `[start, end]`.
    fn overlapping_files(&self, level: u32, start: &[u8], end: &[u8]) -> Vec<Self::File>;

    /// Writes a new sorted file at `path` holding `entries`.
    ///
    /// `is_basement` is true when the file lands on the basement level;
    /// backends elide their tombstones from basement output, since
    /// nothing below can shadow them.
    fn create_file(
        &self,
        path: &Path,
        level: u32,
        is_basement: bool,
        entries: Vec<LedgerEntry>,
    ) -> crate::Result<Self::File>;

    /// Re-tags an existing file into another level without rewriting it.
    fn retag_file(&self, file: &Self::File, level: u32) -> crate::Result<Self::File>;

    /// Serializes the post-change manifest. The bytes are opaque to the
    /// coordinator; it only promises an atomic truncate-rewrite.
    fn manifest_bytes(&self, change: &MergeChange<Self::File>) -> Vec<u8>;

    /// Tells the ledger a change is staged. The ledger answers later by
    /// calling [`CoordinatorHandle::confirm_change`].
    fn change_ready(&self, change: MergeChange<Self::File>);
}
