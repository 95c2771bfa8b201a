//! # error
//!
//! why: callers must tell transient outages from lost races, caller mistakes and cancellation
//! relations: raised by ledger-storage backends, classified by ledger-commit's run loop
//! what: StorageError, CoordinationError, LedgerError, ConfigError, LedgerFailure (error + resume point)

use crate::entry::{EntryRef, SegmentId};
use std::fmt;
use thiserror::Error;

/// Failures reported by the log storage service
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("log storage unavailable: {0}")]
    Unavailable(String),

    #[error("segment {0} does not exist")]
    NoSuchSegment(SegmentId),

    #[error("secret rejected for segment {0}")]
    Unauthorized(SegmentId),

    /// A recovering open sealed the segment under this writer
    #[error("segment {0} was fenced by another writer")]
    Fenced(SegmentId),

    #[error("segment {0} is closed")]
    Closed(SegmentId),

    #[error("segment {segment} has no entries in {first}..={last}")]
    OutOfRange {
        segment: SegmentId,
        first: u64,
        last: u64,
    },

    /// The payload cannot be framed by this backend
    #[error("entry of {len} bytes is too large for segment {segment}")]
    TooLarge { segment: SegmentId, len: usize },

    #[error("segment metadata corrupted: {0}")]
    Corrupted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by the coordination service
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("path {path} does not exist")]
    NotFound { path: String },

    #[error("path {path} already exists")]
    AlreadyExists { path: String },

    #[error("version conflict on {path}: expected {expected}, found {actual}")]
    VersionConflict {
        path: String,
        expected: i32,
        actual: i32,
    },

    #[error("coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("corrupted data at {path}: {reason}")]
    Corrupted { path: String, reason: String },
}

/// Any failure of the reader/committer engine
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    #[error("payload codec failed: {0}")]
    Codec(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("interrupted")]
    Interrupted,
}

impl LedgerError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Another participant extended the chain first
    pub fn is_lost_race(&self) -> bool {
        matches!(
            self,
            Self::Coordination(CoordinationError::VersionConflict { .. })
                | Self::Coordination(CoordinationError::AlreadyExists { .. })
        )
    }
}

/// A ledger failure paired with the last entry that was successfully consumed.
///
/// The run loop resumes from `resume_point` so no entry is lost or replayed twice.
#[derive(Debug)]
pub struct LedgerFailure<T> {
    pub resume_point: EntryRef<T>,
    pub error: LedgerError,
}

impl<T> LedgerFailure<T> {
    pub fn new(resume_point: EntryRef<T>, error: impl Into<LedgerError>) -> Self {
        Self {
            resume_point,
            error: error.into(),
        }
    }

    pub fn interrupted(resume_point: EntryRef<T>) -> Self {
        Self::new(resume_point, LedgerError::Interrupted)
    }

    pub fn is_interrupted(&self) -> bool {
        self.error.is_interrupted()
    }
}

impl<T> fmt::Display for LedgerFailure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (resume from {})", self.error, self.resume_point)
    }
}

impl<T: fmt::Debug> std::error::Error for LedgerFailure<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Invalid or unreadable configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}
