//! # entry
//!
//! why: track how far a reader or committer has consumed a stream
//! relations: produced by ledger-commit on every read/append, carried inside LedgerFailure
//! what: SegmentId/EntryId aliases, EntryRef cursor with an explicit "nothing consumed" variant

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a segment assigned by the log storage service
pub type SegmentId = u64;

/// Position of an entry inside a single segment (0-indexed, dense)
pub type EntryId = u64;

/// A position in a stream, optionally carrying the payload found there.
///
/// `NoEntry` means nothing has been consumed yet; every other position
/// names the segment and entry that was last read or appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryRef<T> {
    /// Nothing consumed yet
    NoEntry,
    /// The last consumed entry
    At {
        segment: SegmentId,
        entry: EntryId,
        payload: T,
    },
}

impl<T> Default for EntryRef<T> {
    fn default() -> Self {
        Self::NoEntry
    }
}

impl<T> EntryRef<T> {
    /// Create a cursor pointing at a consumed entry
    pub fn at(segment: SegmentId, entry: EntryId, payload: T) -> Self {
        Self::At {
            segment,
            entry,
            payload,
        }
    }

    /// True once at least one entry has been consumed
    pub fn exists(&self) -> bool {
        matches!(self, Self::At { .. })
    }

    pub fn segment(&self) -> Option<SegmentId> {
        match self {
            Self::NoEntry => None,
            Self::At { segment, .. } => Some(*segment),
        }
    }

    pub fn entry(&self) -> Option<EntryId> {
        match self {
            Self::NoEntry => None,
            Self::At { entry, .. } => Some(*entry),
        }
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            Self::NoEntry => None,
            Self::At { payload, .. } => Some(payload),
        }
    }

    /// First entry to read from `segment` given this cursor.
    ///
    /// Reading resumes right after the cursor when it sits in `segment`,
    /// otherwise from the start of the segment.
    pub fn starting_offset(&self, segment: SegmentId) -> EntryId {
        match self {
            Self::At {
                segment: current,
                entry,
                ..
            } if *current == segment => entry + 1,
            _ => 0,
        }
    }
}

impl<T> fmt::Display for EntryRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEntry => write!(f, "<none>"),
            Self::At { segment, entry, .. } => write!(f, "{segment}:{entry}"),
        }
    }
}
