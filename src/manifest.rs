// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{segment::SegmentHandle, SeqNo};
use std::path::PathBuf;

/// One live segment in the journal manifest.
///
/// The manifest is a list of these, owned by the inker and totally ordered
/// by `low_sqn`; the highest entry is the active (writable) segment.
#[derive(Clone, Debug)]
pub struct ManifestEntry {
    /// Sequence number of the segment's first record
    pub low_sqn: SeqNo,

    /// Path of the segment file
    pub path: PathBuf,

    /// Handle of the actor serving the file
    pub owner: SegmentHandle,
}

impl ManifestEntry {
    /// Creates a manifest entry.
    #[must_use]
    pub fn new(low_sqn: SeqNo, path: PathBuf, owner: SegmentHandle) -> Self {
        Self {
            low_sqn,
            path,
            owner,
        }
    }
}

/// Sorts manifest entries into manifest order (ascending `low_sqn`).
pub fn sort_entries(entries: &mut [ManifestEntry]) {
    entries.sort_by_key(|e| e.low_sqn);
}

/// The inker surface consumed by the compactor and by delete-pending
/// segments.
///
/// The inker process itself lives outside this crate; it owns the manifest
/// and schedules compaction runs. Both sides of the delete handshake go
/// through this trait, so a test (or an embedding) can stand in for the
/// real thing.
///
/// Liveness is part of the contract: implementations return `None` once
/// the inker is gone, and callers give up silently rather than retry.
pub trait InkerClient: Send + Sync {
    /// Returns a snapshot of the manifest, excluding the active head.
    ///
    /// The head is never a compaction candidate, so the compactor must not
    /// see it.
    fn get_manifest(&self) -> Vec<ManifestEntry>;

    /// Applies a manifest patch: `adds` replace `removes`.
    ///
    /// Returns the manifest sequence number of the change, or `None` if
    /// the inker is gone and the patch was discarded.
    fn update_manifest(
        &self,
        adds: Vec<ManifestEntry>,
        removes: Vec<ManifestEntry>,
    ) -> Option<SeqNo>;

    /// Tells the inker the compaction run has finished.
    fn compaction_complete(&self);

    /// Asks whether it is safe to delete files displaced at `man_sqn`.
    ///
    /// `Some(true)` means no snapshot can still reach the old files;
    /// `None` means the inker is gone.
    fn confirm_delete(&self, man_sqn: SeqNo) -> Option<bool>;
}
