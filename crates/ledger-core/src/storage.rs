//! # storage
//!
//! why: segments live in a replicated append-only storage service we only consume
//! relations: implemented by ledger-storage, wrapped by ledger-commit's SegmentAccessor
//! what: SegmentOptions, LogStorage trait (create/open/open-no-recovery), SegmentHandle trait

use crate::config::{DigestType, ReplicationConfig};
use crate::entry::{EntryId, SegmentId};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;

/// Parameters for creating a new writable segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentOptions {
    pub ensemble_size: u32,
    pub write_quorum_size: u32,
    pub ack_quorum_size: u32,
    pub digest: DigestType,
    pub secret: Vec<u8>,
}

impl SegmentOptions {
    pub fn new(replication: &ReplicationConfig, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            ensemble_size: replication.ensemble_size,
            write_quorum_size: replication.write_quorum_size,
            ack_quorum_size: replication.ack_quorum_size,
            digest: replication.digest,
            secret: secret.into(),
        }
    }
}

/// Client of the log storage service
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Create a new, empty, writable segment
    async fn create_segment(
        &self,
        options: &SegmentOptions,
    ) -> Result<Box<dyn SegmentHandle>, StorageError>;

    /// Open an existing segment with recovery.
    ///
    /// Recovery fences the segment: any previous writer's further appends
    /// fail, and the segment is closed at its last confirmed entry.
    async fn open_segment(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<Box<dyn SegmentHandle>, StorageError>;

    /// Open an existing segment read-only without disturbing its writer
    async fn open_segment_no_recovery(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<Box<dyn SegmentHandle>, StorageError>;
}

/// Handle on one segment
#[async_trait]
pub trait SegmentHandle: Send + Sync {
    fn id(&self) -> SegmentId;

    /// Append an entry, returning its id once confirmed
    async fn append(&self, data: Bytes) -> Result<EntryId, StorageError>;

    /// Last entry confirmed by the ack quorum, `None` while the segment is empty
    fn last_confirmed(&self) -> Option<EntryId>;

    /// Read entries `first..=last`
    async fn read(&self, first: EntryId, last: EntryId) -> Result<Vec<Bytes>, StorageError>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), StorageError>;
}
