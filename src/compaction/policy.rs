// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    key::{split_object, ReloadStrategy, TagStrategyTable},
    JournalKey, Kind, SeqNo,
};

/// What the rewrite does with one record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Disposition {
    /// Copy the record into the new segment verbatim
    Keep,

    /// Write this record instead (the key-delta reduction of the
    /// original)
    Transform(JournalKey, Vec<u8>),

    /// Leave the record behind
    Drop,
}

/// Per-record compaction policy.
///
/// The rewrite consults this for every fetched record. The trait is the
/// seam for engines with their own reload semantics; [`TagReloadPolicy`]
/// is the stock dispatch over the tag strategy table.
pub trait ReloadPolicy: Send + Sync {
    /// Decides the fate of one record.
    ///
    /// `is_live` is the snapshot's verdict on `(ledger key, sqn)`;
    /// `max_sqn` is the snapshot's horizon.
    fn assess(
        &self,
        key: &JournalKey,
        value: &[u8],
        crc_ok: bool,
        is_live: bool,
        max_sqn: SeqNo,
    ) -> Disposition;
}

/// The stock policy: dispatch on the ledger key's tag strategy.
///
/// Tombstones are never reaped by value compaction. A superseded standard
/// record is reduced to its key deltas under `Retain`, dropped under
/// `Recalc`/`Recover`, and only ever touched when its CRC held up and it
/// is within the snapshot's horizon.
#[derive(Clone, Debug, Default)]
pub struct TagReloadPolicy {
    table: TagStrategyTable,
}

impl TagReloadPolicy {
    /// Creates the policy from a tag strategy table.
    #[must_use]
    pub fn new(table: TagStrategyTable) -> Self {
        Self { table }
    }
}

impl ReloadPolicy for TagReloadPolicy {
    fn assess(
        &self,
        key: &JournalKey,
        value: &[u8],
        crc_ok: bool,
        is_live: bool,
        max_sqn: SeqNo,
    ) -> Disposition {
        if key.kind != Kind::Standard {
            // Tombstones wait for their own reaper; key-delta records are
            // already as small as they get
            return Disposition::Keep;
        }

        let superseded = !is_live && crc_ok && key.sqn <= max_sqn;

        if !superseded {
            return Disposition::Keep;
        }

        match self.table.strategy_for(&key.ledger_key) {
            ReloadStrategy::Retain => match split_object(value) {
                Ok((_object, deltas)) => Disposition::Transform(
                    JournalKey::new(key.sqn, Kind::KeyDelta, key.ledger_key.clone()),
                    deltas.to_vec(),
                ),

                // A payload that does not split is kept whole rather than
                // mangled
                Err(_) => Disposition::Keep,
            },

            ReloadStrategy::Recalc | ReloadStrategy::Recover => Disposition::Drop,
        }
    }
}
