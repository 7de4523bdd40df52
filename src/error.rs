// Copyright (c) 2026-present, journal-log
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::segment::SegmentState;

/// Represents errors that can occur in the journal
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// A record or file header could not be decoded
    Decode(&'static str),

    /// Invalid checksum value (got, expected)
    ChecksumMismatch {
        /// The checksum computed from the bytes read back
        got: u32,
        /// The checksum stored alongside the record
        expected: u32,
    },

    /// An operation was issued to a segment in the wrong lifecycle state
    WrongState {
        /// The operation that was attempted
        op: &'static str,
        /// The state the segment was in
        state: SegmentState,
    },

    /// The owning actor thread has stopped
    ActorGone,

    /// Some required journal files could not be recovered from disk
    Unrecoverable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JournalError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Journal result
pub type Result<T> = std::result::Result<T, Error>;
