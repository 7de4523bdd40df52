// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Position;
use crate::hash::hash_to_index;
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::BTreeMap;

/// Number of hash subtables per segment
pub const SUBTABLE_COUNT: usize = 256;

/// Serialized size of one hash slot: (hash u32 LE, position u32 LE)
pub const SLOT_LEN: u64 = 8;

/// Serialized size of the top index: 256 x (position u32 LE, count u32 LE)
pub const TOP_INDEX_LEN: u64 = 2_048;

/// The writable segment's in-memory hash index.
///
/// One ordered map per subtable, from full 32-bit hash to the positions
/// of the records carrying that hash, in insertion order. The maps hold
/// exactly the set of positions persisted to disk; they are dropped when
/// the segment seals.
///
/// Order matters twice over: the ordered map fixes the expansion order of
/// the slot-placement pass, and the per-hash position lists keep appends
/// in arrival order, so the serialized subtable is deterministic for a
/// given record sequence.
#[derive(Clone, Debug, Default)]
pub struct MemIndex {
    tables: Vec<BTreeMap<u32, Vec<Position>>>,
}

impl MemIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: vec![BTreeMap::new(); SUBTABLE_COUNT],
        }
    }

    /// Records that the record hashing to `hash` lives at `pos`.
    pub fn insert(&mut self, hash: u32, pos: Position) {
        if let Some(table) = self.tables.get_mut(hash_to_index(hash)) {
            table.entry(hash).or_default().push(pos);
        }
    }

    /// Positions of all records carrying `hash`, in insertion order.
    #[must_use]
    pub fn positions_for(&self, hash: u32) -> &[Position] {
        self.tables
            .get(hash_to_index(hash))
            .and_then(|table| table.get(&hash))
            .map_or(&[], Vec::as_slice)
    }

    /// Total number of indexed records.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.tables
            .iter()
            .flat_map(|table| table.values())
            .map(Vec::len)
            .sum()
    }

    /// All record positions, in subtable-then-hash order.
    #[must_use]
    pub fn all_positions(&self) -> Vec<Position> {
        self.tables
            .iter()
            .flat_map(|table| table.values())
            .flatten()
            .copied()
            .collect()
    }

    /// All record hashes, with one entry per record.
    #[must_use]
    pub fn all_hashes(&self) -> Vec<u32> {
        self.tables
            .iter()
            .flat_map(BTreeMap::iter)
            .flat_map(|(hash, positions)| std::iter::repeat(*hash).take(positions.len()))
            .collect()
    }

    fn subtable_entries(&self, i: usize) -> Vec<(u32, Position)> {
        self.tables.get(i).map_or_else(Vec::new, |table| {
            table
                .iter()
                .flat_map(|(hash, positions)| positions.iter().map(|pos| (*hash, *pos)))
                .collect()
        })
    }
}

/// Serializes one subtable as an open-addressed slot array.
///
/// `2 x entries` slots (load factor 0.5). Every entry starts probing at
/// `(hash >> 8) % slots` and lands in the first free slot at or after it,
/// wrapping around. A free slot serializes as eight zero bytes.
fn build_subtable(entries: &[(u32, Position)]) -> Vec<u8> {
    if entries.is_empty() {
        return Vec::new();
    }

    let slot_count = entries.len() * 2;
    let mut slots: Vec<(u32, Position)> = vec![(0, 0); slot_count];

    for &(hash, pos) in entries {
        let mut slot = (hash >> 8) as usize % slot_count;

        // Position 0 marks a free slot; records start at byte 2048
        #[allow(clippy::indexing_slicing)]
        while slots[slot].1 != 0 {
            slot = (slot + 1) % slot_count;
        }

        #[allow(clippy::indexing_slicing)]
        {
            slots[slot] = (hash, pos);
        }
    }

    let mut bytes = Vec::with_capacity(slot_count * SLOT_LEN as usize);

    for (hash, pos) in slots {
        #[allow(clippy::expect_used)]
        {
            bytes.write_u32::<LittleEndian>(hash).expect("vec write");
            bytes.write_u32::<LittleEndian>(pos).expect("vec write");
        }
    }

    bytes
}

/// Serializes the whole hash region and its top index.
///
/// `base` is the file position the hash region will be written at (the
/// append cursor at seal time). Returns `(hash region bytes, top index
/// bytes)`; the top index is exactly [`TOP_INDEX_LEN`] bytes and belongs
/// at file position 0.
///
/// Empty subtables get a `(current base, 0)` placeholder entry, so the
/// first top-index entry always points at the start of the hash region.
#[must_use]
pub fn build_hash_region(index: &MemIndex, base: u64) -> (Vec<u8>, Vec<u8>) {
    let mut region = Vec::new();
    let mut top = Vec::with_capacity(TOP_INDEX_LEN as usize);

    let mut cursor = base;

    for i in 0..SUBTABLE_COUNT {
        let entries = index.subtable_entries(i);
        let subtable = build_subtable(&entries);

        let slot_count = subtable.len() as u64 / SLOT_LEN;

        #[allow(clippy::expect_used, clippy::cast_possible_truncation)]
        {
            top.write_u32::<LittleEndian>(cursor as u32).expect("vec write");
            top.write_u32::<LittleEndian>(slot_count as u32).expect("vec write");
        }

        cursor += subtable.len() as u64;
        region.extend_from_slice(&subtable);
    }

    debug_assert_eq!(TOP_INDEX_LEN as usize, top.len());

    (region, top)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;
    use test_log::test;

    fn parse_slots(bytes: &[u8]) -> Vec<(u32, u32)> {
        let mut cursor = Cursor::new(bytes);
        let mut slots = vec![];
        while (cursor.position() as usize) < bytes.len() {
            let hash = cursor.read_u32::<LittleEndian>().unwrap();
            let pos = cursor.read_u32::<LittleEndian>().unwrap();
            slots.push((hash, pos));
        }
        slots
    }

    #[test]
    fn mem_index_insertion_order() {
        let mut index = MemIndex::new();

        index.insert(0x0101, 2_048);
        index.insert(0x0101, 4_096);
        index.insert(0x0201, 8_192);

        assert_eq!(&[2_048, 4_096], index.positions_for(0x0101));
        assert_eq!(&[8_192], index.positions_for(0x0201));
        assert!(index.positions_for(0x0301).is_empty());

        assert_eq!(3, index.entry_count());
        assert_eq!(3, index.all_hashes().len());
    }

    #[test]
    fn subtable_load_factor() {
        let entries: Vec<(u32, Position)> =
            (0..10u32).map(|i| (i << 8, 2_048 + i * 100)).collect();

        let bytes = build_subtable(&entries);
        let slots = parse_slots(&bytes);

        assert_eq!(20, slots.len());
        assert_eq!(10, slots.iter().filter(|(_, pos)| *pos != 0).count());
    }

    #[test]
    fn subtable_slot_placement_law() {
        // All entries share the subtable; force probe collisions by
        // giving several records identical hashes
        let entries: Vec<(u32, Position)> = vec![
            (0x0000_1000, 2_048),
            (0x0000_1000, 2_148),
            (0x0000_1000, 2_248),
            (0x0000_2000, 2_348),
        ];

        let bytes = build_subtable(&entries);
        let slots = parse_slots(&bytes);
        let slot_count = slots.len();

        for &(hash, pos) in &entries {
            let mut slot = (hash >> 8) as usize % slot_count;
            let mut found = false;

            for _ in 0..slot_count {
                if slots[slot] == (hash, pos) {
                    found = true;
                    break;
                }
                slot = (slot + 1) % slot_count;
            }

            assert!(found, "entry ({hash:#x}, {pos}) not reachable by probing");
        }
    }

    #[test]
    fn subtable_wraparound() {
        // Start slot near the end so placement has to wrap
        let slot_count = 4u32; // 2 entries
        let hash = (slot_count - 1) << 8; // start slot = 3

        let entries: Vec<(u32, Position)> = vec![(hash, 2_048), (hash, 2_148)];
        let slots = parse_slots(&build_subtable(&entries));

        assert_eq!((hash, 2_048), slots[3]);
        assert_eq!((hash, 2_148), slots[0]);
    }

    #[test]
    fn hash_region_top_index() {
        let mut index = MemIndex::new();

        // Subtable 1 gets two records, subtable 3 gets one
        index.insert(0x0000_0101, 2_048);
        index.insert(0x0000_0201, 2_148);
        index.insert(0x0000_0103, 2_248);

        let base = 4_096u64;
        let (region, top) = build_hash_region(&index, base);

        assert_eq!(TOP_INDEX_LEN as usize, top.len());
        // 3 entries -> 6 slots across two subtables
        assert_eq!(6 * SLOT_LEN as usize, region.len());

        let top_entries = parse_slots(&top);

        // Empty subtable 0 points at the region start with zero count
        assert_eq!((base as u32, 0), top_entries[0]);
        // Subtable 1: 2 entries -> 4 slots at the region start
        assert_eq!((base as u32, 4), top_entries[1]);
        // Subtable 2 is an empty placeholder after subtable 1
        assert_eq!((base as u32 + 32, 0), top_entries[2]);
        // Subtable 3: 1 entry -> 2 slots
        assert_eq!((base as u32 + 32, 2), top_entries[3]);
        // Everything after subtable 3 points past the region
        assert_eq!((base as u32 + 48, 0), top_entries[4]);
        assert_eq!((base as u32 + 48, 0), top_entries[255]);
    }
}
