// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{
    index::{build_hash_region, MemIndex, SLOT_LEN, SUBTABLE_COUNT, TOP_INDEX_LEN},
    record::{self, RecordRead},
    FetchMode, FetchedRecord, Position, SegmentState, SegmentWriteOutcome, RECORD_REGION_START,
};
use crate::{
    file::{fsync_directory, read_exact, sealed_twin},
    hash::hash_to_index,
    Config, Error, JournalKey, SeqNo,
};
use byteorder::{LittleEndian, ReadBytesExt};
use rand::{seq::SliceRandom, Rng};
use std::{
    fs::{File, OpenOptions},
    io::{Cursor, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

/// Result of a key presence probe.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyPresence {
    /// The exact key is present (strict check)
    Present,

    /// A record with a matching hash is present (loose check)
    Probably,

    /// No record can match the key
    Missing,
}

/// Scan continuation decision, returned by the fold closure.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScanControl {
    /// Keep scanning
    Continue,

    /// Stop at the current record
    Stop,
}

enum FileState {
    Writer { index: MemIndex, cursor: u64 },
    Reader { top: Vec<(u32, u32)> },
}

/// One journal segment file.
///
/// Writable (`.pnd`, backed by the in-memory [`MemIndex`]) or sealed
/// (`.cdb`, backed by the on-disk hash index). All reads go through
/// `pread`, so shared references suffice for lookups; appends and
/// sealing take the value.
pub struct SegmentFile {
    path: PathBuf,
    file: File,
    state: FileState,
    last_key: Option<JournalKey>,
    low_sqn: Option<SeqNo>,
    max_file_size: u64,
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SegmentFile({}, {})", self.path.display(), self.state())
    }
}

impl SegmentFile {
    /// Creates a fresh writable segment at `path`.
    ///
    /// The first 2048 bytes are reserved for the top index, which is only
    /// written at seal time; the append cursor starts right after them.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the file already exists or cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, config: &Config) -> crate::Result<Self> {
        let path = path.as_ref();
        log::debug!("Creating writable segment at {}", path.display());

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(&vec![0u8; RECORD_REGION_START as usize])?;

        Ok(Self {
            path: path.into(),
            file,
            state: FileState::Writer {
                index: MemIndex::new(),
                cursor: RECORD_REGION_START,
            },
            last_key: None,
            low_sqn: None,
            max_file_size: effective_size_cap(config),
        })
    }

    /// Opens an existing `.pnd` file for appending, creating it if absent.
    ///
    /// Scans the record region forward from byte 2048, rebuilding the
    /// in-memory index and `last_key`. The scan stops at the first record
    /// that cannot be read back intact (short header, short body,
    /// undecodable key or CRC mismatch); the file is truncated there and
    /// the append cursor takes over.
    pub fn open_writer<P: AsRef<Path>>(path: P, config: &Config) -> crate::Result<Self> {
        let path = path.as_ref();

        if !path.try_exists()? {
            return Self::create(path, config);
        }

        log::debug!("Re-opening writable segment at {}", path.display());

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let file_len = file.metadata()?.len();

        if file_len < RECORD_REGION_START {
            // Never reached its first record; re-reserve the top index
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&vec![0u8; RECORD_REGION_START as usize])?;
        }

        let mut index = MemIndex::new();
        let mut last_key = None;
        let mut low_sqn = None;

        let mut pos = RECORD_REGION_START;

        loop {
            match record::read_at(&file, pos, file_len.max(RECORD_REGION_START))? {
                RecordRead::Record {
                    key,
                    crc_ok: true,
                    next,
                    ..
                } => {
                    #[allow(clippy::cast_possible_truncation)]
                    index.insert(key.hash(), pos as Position);

                    low_sqn.get_or_insert(key.sqn);
                    last_key = Some(key);
                    pos = next;
                }

                // A CRC failure mid-value is indistinguishable from a torn
                // write; recovery truncates to the last good record
                RecordRead::Record { crc_ok: false, .. }
                | RecordRead::Boundary
                | RecordRead::Truncated => break,
            }
        }

        if pos < file_len {
            log::warn!(
                "Truncating segment {} from {file_len} to {pos} after partial write",
                path.display(),
            );
            file.set_len(pos)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.into(),
            file,
            state: FileState::Writer { index, cursor: pos },
            last_key,
            low_sqn,
            max_file_size: effective_size_cap(config),
        })
    }

    /// Opens a sealed `.cdb` file for reading.
    ///
    /// Loads the 2048-byte top index and derives `last_key` from the last
    /// physical record the index reaches.
    pub fn open_reader<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        log::debug!("Opening sealed segment at {}", path.display());

        let file = File::open(path)?;

        let top_bytes = read_exact(&file, 0, TOP_INDEX_LEN as usize)?;
        let top = parse_top_index(&top_bytes)?;

        let mut segment = Self {
            path: path.into(),
            file,
            state: FileState::Reader { top },
            last_key: None,
            low_sqn: None,
            max_file_size: u64::MAX,
        };

        segment.low_sqn = segment.read_low_sqn()?;
        segment.last_key = segment.read_last_key()?;

        Ok(segment)
    }

    /// The segment's lifecycle state, as far as the file itself knows.
    #[must_use]
    pub fn state(&self) -> SegmentState {
        match self.state {
            FileState::Writer { .. } => SegmentState::Writer,
            FileState::Reader { .. } => SegmentState::Reader,
        }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Key of the most recently appended (or last indexed) record.
    #[must_use]
    pub fn last_key(&self) -> Option<&JournalKey> {
        self.last_key.as_ref()
    }

    /// Sequence number of the segment's first record.
    #[must_use]
    pub fn low_sqn(&self) -> Option<SeqNo> {
        self.low_sqn
    }

    /// The current append cursor of a writable segment.
    pub fn cursor(&self) -> crate::Result<u64> {
        match &self.state {
            FileState::Writer { cursor, .. } => Ok(*cursor),
            FileState::Reader { .. } => Err(self.wrong_state("cursor")),
        }
    }

    /// Appends one record.
    ///
    /// Returns [`SegmentWriteOutcome::Roll`] without writing anything if
    /// the record would push the file past its size cap.
    pub fn put(&mut self, key: &JournalKey, value: &[u8]) -> crate::Result<SegmentWriteOutcome> {
        self.mput(std::slice::from_ref(&(key.clone(), value.to_vec())))
    }

    /// Appends a batch of records in one physical write.
    ///
    /// The size check covers the whole batch: either every record fits or
    /// the caller is told to roll.
    pub fn mput(&mut self, batch: &[(JournalKey, Vec<u8>)]) -> crate::Result<SegmentWriteOutcome> {
        let FileState::Writer { index, cursor } = &mut self.state else {
            return Err(self.wrong_state("put"));
        };

        let total: u64 = batch
            .iter()
            .map(|(key, value)| record::encoded_len(key, value))
            .sum();

        if *cursor + total > self.max_file_size {
            return Ok(SegmentWriteOutcome::Roll);
        }

        let mut buf = Vec::with_capacity(total as usize);
        let mut pos = *cursor;

        let mut placements = Vec::with_capacity(batch.len());

        for (key, value) in batch {
            let bytes = record::encode(key, value);

            #[allow(clippy::cast_possible_truncation)]
            placements.push((key.hash(), pos as Position, key));

            pos += bytes.len() as u64;
            buf.extend_from_slice(&bytes);
        }

        self.file.seek(SeekFrom::Start(*cursor))?;
        self.file.write_all(&buf)?;

        // The write is durable enough for the in-memory index invariant:
        // everything indexed has been handed to the file
        for (hash, position, key) in placements {
            index.insert(hash, position);
            self.low_sqn.get_or_insert(key.sqn);
            self.last_key = Some(key.clone());
        }

        *cursor = pos;

        Ok(SegmentWriteOutcome::Ok(pos))
    }

    /// Looks up a key, returning `(key, value)` if present.
    ///
    /// Writable segments consult the in-memory index; sealed segments
    /// probe the on-disk hash subtable. Records failing their CRC are
    /// skipped, probing continues.
    pub fn get(&self, key: &JournalKey) -> crate::Result<Option<(JournalKey, Vec<u8>)>> {
        let hash = key.hash();
        let limit = self.record_region_end();

        match &self.state {
            FileState::Writer { index, .. } => {
                for &pos in index.positions_for(hash) {
                    if let RecordRead::Record {
                        key: found,
                        value,
                        crc_ok: true,
                        ..
                    } = record::read_at(&self.file, u64::from(pos), limit)?
                    {
                        if &found == key {
                            return Ok(Some((found, value)));
                        }
                    }
                }

                Ok(None)
            }

            FileState::Reader { top } => {
                let mut probe = SlotProbe::start(top, hash)?;

                while let Some(slot) = probe.next_match(&self.file)? {
                    if let RecordRead::Record {
                        key: found,
                        value,
                        crc_ok: true,
                        ..
                    } = record::read_at(&self.file, u64::from(slot), limit)?
                    {
                        if &found == key {
                            return Ok(Some((found, value)));
                        }
                    }
                }

                Ok(None)
            }
        }
    }

    /// Probes for a key without necessarily reading it back.
    ///
    /// With `loose == true`, a hash match short-circuits to
    /// [`KeyPresence::Probably`] without touching the record; otherwise
    /// the key bytes are verified and the answer is exact.
    pub fn key_check(&self, key: &JournalKey, loose: bool) -> crate::Result<KeyPresence> {
        if !loose {
            return Ok(if self.get(key)?.is_some() {
                KeyPresence::Present
            } else {
                KeyPresence::Missing
            });
        }

        let hash = key.hash();

        match &self.state {
            FileState::Writer { index, .. } => Ok(if index.positions_for(hash).is_empty() {
                KeyPresence::Missing
            } else {
                KeyPresence::Probably
            }),

            FileState::Reader { top } => {
                let mut probe = SlotProbe::start(top, hash)?;

                Ok(if probe.next_match(&self.file)?.is_some() {
                    KeyPresence::Probably
                } else {
                    KeyPresence::Missing
                })
            }
        }
    }

    /// Returns record positions from a sealed segment.
    ///
    /// `None` returns every record position, walking the subtables in
    /// file order. `Some(n)` visits the subtables in an order shuffled by
    /// `rng` and accumulates until `n` positions are gathered or the
    /// subtables are exhausted.
    pub fn get_positions<R: Rng>(
        &self,
        sample: Option<usize>,
        rng: &mut R,
    ) -> crate::Result<Vec<Position>> {
        let FileState::Reader { top } = &self.state else {
            return Err(self.wrong_state("get_positions"));
        };

        let mut order: Vec<usize> = (0..SUBTABLE_COUNT).collect();

        if sample.is_some() {
            order.shuffle(rng);
        }

        let mut positions = vec![];

        for i in order {
            let Some(&(base, count)) = top.get(i) else {
                continue;
            };

            positions.extend(self.subtable_positions(base, count)?);

            if let Some(n) = sample {
                if positions.len() >= n {
                    positions.truncate(n);
                    break;
                }
            }
        }

        Ok(positions)
    }

    /// Reads the records at `positions`, shaping each per `mode`.
    pub fn direct_fetch(
        &self,
        positions: &[Position],
        mode: FetchMode,
    ) -> crate::Result<Vec<FetchedRecord>> {
        let limit = self.record_region_end();

        let mut out = Vec::with_capacity(positions.len());

        for &pos in positions {
            let RecordRead::Record {
                key,
                value,
                crc_ok,
                ..
            } = record::read_at(&self.file, u64::from(pos), limit)?
            else {
                return Err(Error::Decode("record position"));
            };

            #[allow(clippy::cast_possible_truncation)]
            let disk_size = (value.len() as u64 + record::CRC_LEN) as u32;

            out.push(match mode {
                FetchMode::Key => FetchedRecord::Key(key),
                FetchMode::KeySize => FetchedRecord::KeySize { key, disk_size },
                FetchMode::KeyValueCheck => FetchedRecord::KeyValue { key, value, crc_ok },
            });
        }

        Ok(out)
    }

    /// Folds over the record region from `start` (default 2048).
    ///
    /// The closure sees `(key, value bytes, position, acc)` for every
    /// record that decodes, and steers with [`ScanControl`]. The scan
    /// ends at the closure's `Stop`, at the end of the record region, or
    /// at the first record that fails to decode (CRC included); the
    /// position where it ended comes back with the accumulator.
    pub fn scan<A>(
        &self,
        start: Option<u64>,
        mut filter: impl FnMut(JournalKey, Vec<u8>, u64, A) -> (ScanControl, A),
        mut acc: A,
    ) -> crate::Result<(u64, A)> {
        let limit = self.record_region_end();
        let mut pos = start.unwrap_or(RECORD_REGION_START);

        loop {
            match record::read_at(&self.file, pos, limit)? {
                RecordRead::Record {
                    key,
                    value,
                    crc_ok: true,
                    next,
                } => {
                    let (control, next_acc) = filter(key, value, pos, acc);
                    acc = next_acc;

                    if control == ScanControl::Stop {
                        return Ok((pos, acc));
                    }

                    pos = next;
                }

                RecordRead::Record { crc_ok: false, .. } | RecordRead::Truncated => {
                    return Ok((pos, acc));
                }

                RecordRead::Boundary => return Ok((limit, acc)),
            }
        }
    }

    /// All record hashes of this segment, one per record, e.g. to build a
    /// bloom filter at seal time.
    pub fn record_hashes(&self) -> crate::Result<Vec<u32>> {
        match &self.state {
            FileState::Writer { index, .. } => Ok(index.all_hashes()),

            FileState::Reader { top } => {
                let mut hashes = vec![];

                for &(base, count) in top.iter() {
                    for (hash, pos) in self.subtable_slots(base, count)? {
                        if pos != 0 {
                            hashes.push(hash);
                        }
                    }
                }

                Ok(hashes)
            }
        }
    }

    /// Snapshot of the writer's in-memory index and append cursor, for
    /// computing the hash region off-thread.
    pub fn index_snapshot(&self) -> crate::Result<(MemIndex, u64)> {
        match &self.state {
            FileState::Writer { index, cursor } => Ok((index.clone(), *cursor)),
            FileState::Reader { .. } => Err(self.wrong_state("index_snapshot")),
        }
    }

    /// Seals the segment inline: computes the hash region, writes it and
    /// the top index, renames `.pnd` to `.cdb` and re-opens as a reader.
    pub fn complete(self) -> crate::Result<Self> {
        let (index, cursor) = self.index_snapshot()?;
        let (region, top) = build_hash_region(&index, cursor);
        self.apply_hash_region(&region, &top)
    }

    /// Seals the segment with an externally computed hash region.
    ///
    /// This is the back half of `roll`: the index serialization happened
    /// elsewhere (from an [`Self::index_snapshot`]), this writes the
    /// bytes, renames and re-opens.
    pub fn apply_hash_region(mut self, region: &[u8], top: &[u8]) -> crate::Result<Self> {
        let FileState::Writer { cursor, .. } = &self.state else {
            return Err(self.wrong_state("seal"));
        };
        let cursor = *cursor;

        log::debug!(
            "Sealing segment {} ({} region bytes at {cursor})",
            self.path.display(),
            region.len(),
        );

        self.file.seek(SeekFrom::Start(cursor))?;
        self.file.write_all(region)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(top)?;
        self.file.sync_all()?;

        let sealed_path = sealed_twin(&self.path);

        drop(self.file);
        std::fs::rename(&self.path, &sealed_path)?;

        if let Some(folder) = sealed_path.parent() {
            fsync_directory(folder)?;
        }

        let mut sealed = Self::open_reader(&sealed_path)?;

        // Carry over what the writer tracked; re-deriving is redundant
        sealed.last_key = self.last_key;
        sealed.low_sqn = self.low_sqn;

        Ok(sealed)
    }

    /// Closes the segment and removes its file, either by parking it in
    /// the waste folder or by unlinking it outright.
    pub fn delete(self, waste_folder: Option<&Path>) -> crate::Result<()> {
        drop(self.file);

        match waste_folder {
            Some(waste) => {
                std::fs::create_dir_all(waste)?;

                #[allow(clippy::expect_used)]
                let name = self.path.file_name().expect("segment has a file name");

                log::debug!("Parking {} in {}", self.path.display(), waste.display());
                std::fs::rename(&self.path, waste.join(name))?;
            }
            None => {
                log::debug!("Unlinking {}", self.path.display());
                std::fs::remove_file(&self.path)?;
            }
        }

        Ok(())
    }

    fn wrong_state(&self, op: &'static str) -> Error {
        Error::WrongState {
            op,
            state: self.state(),
        }
    }

    /// End of the record region: the hash region start for readers, the
    /// append cursor for writers.
    fn record_region_end(&self) -> u64 {
        match &self.state {
            FileState::Writer { cursor, .. } => *cursor,
            FileState::Reader { top } => top.first().map_or(RECORD_REGION_START, |&(base, _)| {
                u64::from(base)
            }),
        }
    }

    fn subtable_slots(&self, base: u32, count: u32) -> crate::Result<Vec<(u32, u32)>> {
        if count == 0 {
            return Ok(vec![]);
        }

        let bytes = read_exact(
            &self.file,
            u64::from(base),
            (u64::from(count) * SLOT_LEN) as usize,
        )?;

        let mut cursor = Cursor::new(bytes);
        let mut slots = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let hash = cursor.read_u32::<LittleEndian>()?;
            let pos = cursor.read_u32::<LittleEndian>()?;
            slots.push((hash, pos));
        }

        Ok(slots)
    }

    fn subtable_positions(&self, base: u32, count: u32) -> crate::Result<Vec<Position>> {
        Ok(self
            .subtable_slots(base, count)?
            .into_iter()
            .filter_map(|(_, pos)| (pos != 0).then_some(pos))
            .collect())
    }

    fn read_low_sqn(&self) -> crate::Result<Option<SeqNo>> {
        if self.record_region_end() == RECORD_REGION_START {
            return Ok(None);
        }

        match record::read_at(&self.file, RECORD_REGION_START, self.record_region_end())? {
            RecordRead::Record { key, .. } => Ok(Some(key.sqn)),
            _ => Ok(None),
        }
    }

    fn read_last_key(&self) -> crate::Result<Option<JournalKey>> {
        let FileState::Reader { top } = &self.state else {
            return Ok(None);
        };

        let mut max_pos = 0u32;

        for &(base, count) in top.iter() {
            for (_, pos) in self.subtable_slots(base, count)? {
                max_pos = max_pos.max(pos);
            }
        }

        if max_pos == 0 {
            return Ok(None);
        }

        match record::read_at(&self.file, u64::from(max_pos), self.record_region_end())? {
            RecordRead::Record { key, .. } => Ok(Some(key)),
            _ => Err(Error::Decode("last record")),
        }
    }
}

fn effective_size_cap(config: &Config) -> u64 {
    // Slot positions are 32-bit, so a segment can never outgrow 4 GiB
    config.max_file_size.min(u64::from(u32::MAX))
}

fn parse_top_index(bytes: &[u8]) -> crate::Result<Vec<(u32, u32)>> {
    if bytes.len() != TOP_INDEX_LEN as usize {
        return Err(Error::Decode("top index"));
    }

    let mut cursor = Cursor::new(bytes);
    let mut top = Vec::with_capacity(SUBTABLE_COUNT);

    for _ in 0..SUBTABLE_COUNT {
        let base = cursor.read_u32::<LittleEndian>()?;
        let count = cursor.read_u32::<LittleEndian>()?;
        top.push((base, count));
    }

    Ok(top)
}

/// Linear probe over one on-disk hash subtable.
///
/// Yields the positions of slots whose full 32-bit hash matches, stopping
/// at the first free slot or after one full lap.
struct SlotProbe<'a> {
    top: &'a [(u32, u32)],
    hash: u32,
    slot: u64,
    remaining: u64,
}

impl<'a> SlotProbe<'a> {
    fn start(top: &'a [(u32, u32)], hash: u32) -> crate::Result<Self> {
        let &(_, count) = top
            .get(hash_to_index(hash))
            .ok_or(Error::Decode("top index"))?;

        let count = u64::from(count);

        let slot = if count == 0 {
            0
        } else {
            u64::from(hash >> 8) % count
        };

        Ok(Self {
            top,
            hash,
            slot,
            remaining: count,
        })
    }

    fn next_match(&mut self, file: &File) -> crate::Result<Option<Position>> {
        let &(base, count) = self
            .top
            .get(hash_to_index(self.hash))
            .ok_or(Error::Decode("top index"))?;

        while self.remaining > 0 {
            let offset = u64::from(base) + self.slot * SLOT_LEN;

            let bytes = read_exact(file, offset, SLOT_LEN as usize)?;
            let mut cursor = Cursor::new(bytes);

            let slot_hash = cursor.read_u32::<LittleEndian>()?;
            let slot_pos = cursor.read_u32::<LittleEndian>()?;

            self.slot = (self.slot + 1) % u64::from(count);
            self.remaining -= 1;

            if slot_pos == 0 {
                // Free slot ends the probe chain
                return Ok(None);
            }

            if slot_hash == self.hash {
                return Ok(Some(slot_pos));
            }
        }

        Ok(None)
    }
}
