// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::SeqNo;
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};

/// Extension of a writable journal segment
pub const PENDING_EXT: &str = "pnd";

/// Extension of a sealed journal segment
pub const SEALED_EXT: &str = "cdb";

/// File name prefix of segments written by the journal head
pub const JOURNAL_PREFIX: &str = "journal";

/// File name prefix of segments written by the compactor
pub const COMPACT_PREFIX: &str = "compact";

/// Folder retired segment files are parked in before final removal
pub const WASTE_FOLDER: &str = "waste";

/// Reads bytes from a file using `pread`.
pub fn read_exact(file: &File, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];

    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(&mut buf, offset)?;
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::FileExt;

        let mut read = 0;
        while read < size {
            let n = file.seek_read(&mut buf[read..], offset + read as u64)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "pread did not read enough bytes",
                ));
            }
            read += n;
        }
    }

    Ok(buf)
}

/// Atomically rewrites a file.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[allow(clippy::expect_used)]
    let folder = path.parent().expect("should have a parent directory");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    // TODO: not sure why it fails on Windows...
    #[cfg(not(target_os = "windows"))]
    {
        let file = File::open(path)?;
        file.sync_all()?;
        fsync_directory(folder)?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}

/// Path of a writable segment: `<folder>/<prefix>_<sqn>.pnd`
#[must_use]
pub fn writable_segment_path(folder: &Path, prefix: &str, sqn: SeqNo) -> PathBuf {
    folder.join(format!("{prefix}_{sqn}.{PENDING_EXT}"))
}

/// Path of a sealed segment: `<folder>/<prefix>_<sqn>.cdb`
#[must_use]
pub fn sealed_segment_path(folder: &Path, prefix: &str, sqn: SeqNo) -> PathBuf {
    folder.join(format!("{prefix}_{sqn}.{SEALED_EXT}"))
}

/// Swaps a `.pnd` path for its sealed `.cdb` twin.
#[must_use]
pub fn sealed_twin(path: &Path) -> PathBuf {
    path.with_extension(SEALED_EXT)
}

/// Parses `<prefix>_<sqn>.<ext>` segment file names.
///
/// Returns `(prefix, sqn, is_sealed)`, or `None` for foreign files.
#[must_use]
pub fn parse_segment_file_name(name: &str) -> Option<(&str, SeqNo, bool)> {
    let (stem, ext) = name.rsplit_once('.')?;

    let is_sealed = match ext {
        SEALED_EXT => true,
        PENDING_EXT => false,
        _ => return None,
    };

    let (prefix, sqn) = stem.rsplit_once('_')?;
    let sqn = sqn.parse::<SeqNo>().ok()?;

    Some((prefix, sqn, is_sealed))
}
