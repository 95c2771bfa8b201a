//! # accessor
//!
//! why: every segment of a stream shares one replication policy and one secret
//! relations: wraps ledger_core::LogStorage, used by reader.rs and committer.rs
//! what: SegmentAccessor (create / open as leader / open for read), Segment with typed append and replay

use crate::codec::PayloadCodec;
use crate::reader::EntryConsumer;
use ledger_core::{
    EntryId, EntryRef, LedgerError, LedgerFailure, LogStorage, ReplicationConfig, SegmentHandle,
    SegmentId, SegmentOptions, StorageError,
};
use std::sync::Arc;
use tracing::debug;

/// Opens and creates the segments of one stream
#[derive(Clone)]
pub struct SegmentAccessor {
    storage: Arc<dyn LogStorage>,
    options: SegmentOptions,
}

impl SegmentAccessor {
    pub fn new(
        storage: Arc<dyn LogStorage>,
        replication: &ReplicationConfig,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            storage,
            options: SegmentOptions::new(replication, secret),
        }
    }

    /// Create a new writable segment
    pub async fn create(&self) -> Result<Segment, StorageError> {
        let handle = self.storage.create_segment(&self.options).await?;
        Ok(Segment::new(handle))
    }

    /// Open with recovery. Fences any writer still appending to the segment.
    pub async fn open_as_leader(&self, segment: SegmentId) -> Result<Segment, StorageError> {
        let handle = self
            .storage
            .open_segment(segment, self.options.digest, &self.options.secret)
            .await?;
        Ok(Segment::new(handle))
    }

    /// Open read-only without recovery, safe while a leader is still writing
    pub async fn open_for_read(&self, segment: SegmentId) -> Result<Segment, StorageError> {
        let handle = self
            .storage
            .open_segment_no_recovery(segment, self.options.digest, &self.options.secret)
            .await?;
        Ok(Segment::new(handle))
    }
}

/// One opened segment
pub struct Segment {
    handle: Box<dyn SegmentHandle>,
}

impl Segment {
    fn new(handle: Box<dyn SegmentHandle>) -> Self {
        Self { handle }
    }

    pub fn id(&self) -> SegmentId {
        self.handle.id()
    }

    pub fn last_recorded(&self) -> Option<EntryId> {
        self.handle.last_confirmed()
    }

    /// True when entries from `first` onwards are available
    pub fn has_entries_from(&self, first: EntryId) -> bool {
        self.last_recorded().is_some_and(|last| first <= last)
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub async fn close(&self) -> Result<(), StorageError> {
        self.handle.close().await
    }

    /// Append a payload and return the cursor of the new entry
    pub async fn add_entry<T>(
        &self,
        payload: T,
        codec: &dyn PayloadCodec<T>,
    ) -> Result<EntryRef<T>, LedgerError> {
        let bytes = codec.encode(&payload)?;
        let entry = self.handle.append(bytes).await?;
        Ok(EntryRef::at(self.id(), entry, payload))
    }

    /// Replay entries `first..=last recorded` through `consumer`.
    ///
    /// Returns the cursor of the last replayed entry, or `resume` unchanged
    /// when nothing was replayed. A failure part-way carries the cursor of
    /// the last entry handed to the consumer.
    pub async fn consume_entries<T>(
        &self,
        first: EntryId,
        resume: EntryRef<T>,
        consumer: &EntryConsumer<T>,
        codec: &dyn PayloadCodec<T>,
    ) -> Result<EntryRef<T>, LedgerFailure<T>> {
        let last = match self.last_recorded() {
            Some(last) if first <= last => last,
            _ => return Ok(resume),
        };

        debug!(segment = self.id(), first, last, "replaying entries");
        let entries = match self.handle.read(first, last).await {
            Ok(entries) => entries,
            Err(e) => return Err(LedgerFailure::new(resume, e)),
        };

        let mut resume = resume;
        for (entry_id, bytes) in (first..).zip(entries) {
            let payload = match codec.decode(&bytes) {
                Ok(payload) => payload,
                Err(e) => return Err(LedgerFailure::new(resume, e)),
            };
            consumer(self.id(), entry_id, &payload);
            resume = EntryRef::at(self.id(), entry_id, payload);
        }
        Ok(resume)
    }
}
