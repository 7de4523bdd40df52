// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::LedgerEntry;
use std::path::{Path, PathBuf};

/// Entries per merged output file before the merge rolls to the next one
pub const MAX_MERGE_FILE_ENTRIES: usize = 16_384;

/// Path of a merged output file: `<root>_<level>_<counter>.sst`
#[must_use]
pub fn output_file_path(root: &Path, level: u32, counter: u64) -> PathBuf {
    let mut name = root.as_os_str().to_os_string();
    name.push(format!("_{level}_{counter}.sst"));
    PathBuf::from(name)
}

/// Merges a source file's entries into the concatenated entries of the
/// overlapping files one level down.
///
/// Both inputs are in key order; the overlap set is disjoint, so its
/// concatenation is too. On equal keys the source entry wins: it comes
/// from the upper level and is therefore the newer write.
#[must_use]
pub fn merge_streams(src: Vec<LedgerEntry>, overlap: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    let mut out = Vec::with_capacity(src.len() + overlap.len());

    let mut src = src.into_iter().peekable();
    let mut overlap = overlap.into_iter().peekable();

    loop {
        match (src.peek(), overlap.peek()) {
            (Some((src_key, _)), Some((overlap_key, _))) => {
                match src_key.cmp(overlap_key) {
                    std::cmp::Ordering::Less => {
                        if let Some(entry) = src.next() {
                            out.push(entry);
                        }
                    }
                    std::cmp::Ordering::Greater => {
                        if let Some(entry) = overlap.next() {
                            out.push(entry);
                        }
                    }
                    std::cmp::Ordering::Equal => {
                        // Upper level shadows lower
                        overlap.next();
                        if let Some(entry) = src.next() {
                            out.push(entry);
                        }
                    }
                }
            }

            (Some(_), None) => {
                out.extend(src.by_ref());
            }

            (None, Some(_)) => {
                out.extend(overlap.by_ref());
            }

            (None, None) => return out,
        }
    }
}
