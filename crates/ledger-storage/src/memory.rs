//! # memory
//!
//! why: exercise segment semantics (append, fencing, read-only snapshots) without a storage cluster
//! relations: implements ledger_core::LogStorage, used by the commit and transaction test suites
//! what: InMemoryLogStorage with fault injection, segment handles in writer/recovered/read-only modes

use async_trait::async_trait;
use bytes::Bytes;
use ledger_core::{
    DigestType, EntryId, LogStorage, SegmentHandle, SegmentId, SegmentOptions, StorageError,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// in-memory log storage service
///
/// cloning shares the same segments, so several "processes" can use one instance
#[derive(Clone, Default)]
pub struct InMemoryLogStorage {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    segments: Mutex<BTreeMap<SegmentId, Arc<Segment>>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

struct Segment {
    id: SegmentId,
    options: SegmentOptions,
    state: Mutex<SegmentState>,
}

#[derive(Default)]
struct SegmentState {
    entries: Vec<Bytes>,
    closed: bool,
    fenced: bool,
}

impl SegmentState {
    fn last_confirmed(&self) -> Option<EntryId> {
        (self.entries.len() as u64).checked_sub(1)
    }
}

impl InMemoryLogStorage {
    /// create an empty storage service
    pub fn new() -> Self {
        Self::default()
    }

    /// simulate the service becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// ids of every segment ever created, in creation order
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.inner.segments.lock().keys().copied().collect()
    }

    /// options a segment was created with
    pub fn segment_options(&self, segment: SegmentId) -> Option<SegmentOptions> {
        self.inner
            .segments
            .lock()
            .get(&segment)
            .map(|s| s.options.clone())
    }

    /// raw entries of a segment
    pub fn entries(&self, segment: SegmentId) -> Vec<Bytes> {
        self.inner
            .segments
            .lock()
            .get(&segment)
            .map(|s| s.state.lock().entries.clone())
            .unwrap_or_default()
    }

    pub fn is_closed(&self, segment: SegmentId) -> Option<bool> {
        self.inner
            .segments
            .lock()
            .get(&segment)
            .map(|s| s.state.lock().closed)
    }

    fn check_available(&self) -> Result<(), StorageError> {
        check_available(&self.inner)
    }

    fn find(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<Arc<Segment>, StorageError> {
        self.check_available()?;
        let found = self
            .inner
            .segments
            .lock()
            .get(&segment)
            .cloned()
            .ok_or(StorageError::NoSuchSegment(segment))?;

        if found.options.digest != digest || found.options.secret != secret {
            return Err(StorageError::Unauthorized(segment));
        }
        Ok(found)
    }
}

fn check_available(inner: &Inner) -> Result<(), StorageError> {
    if inner.unavailable.load(Ordering::SeqCst) {
        return Err(StorageError::Unavailable(
            "in-memory storage marked unavailable".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl LogStorage for InMemoryLogStorage {
    async fn create_segment(
        &self,
        options: &SegmentOptions,
    ) -> Result<Box<dyn SegmentHandle>, StorageError> {
        self.check_available()?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let segment = Arc::new(Segment {
            id,
            options: options.clone(),
            state: Mutex::new(SegmentState::default()),
        });
        self.inner.segments.lock().insert(id, segment.clone());

        Ok(Box::new(MemorySegmentHandle {
            storage: self.inner.clone(),
            segment,
            mode: Mode::Writer,
        }))
    }

    async fn open_segment(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<Box<dyn SegmentHandle>, StorageError> {
        let found = self.find(segment, digest, secret)?;
        {
            let mut state = found.state.lock();
            state.fenced = true;
            state.closed = true;
        }

        Ok(Box::new(MemorySegmentHandle {
            storage: self.inner.clone(),
            segment: found,
            mode: Mode::Recovered,
        }))
    }

    async fn open_segment_no_recovery(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<Box<dyn SegmentHandle>, StorageError> {
        let found = self.find(segment, digest, secret)?;
        let (last_confirmed, closed) = {
            let state = found.state.lock();
            (state.last_confirmed(), state.closed)
        };

        Ok(Box::new(MemorySegmentHandle {
            storage: self.inner.clone(),
            segment: found,
            mode: Mode::ReadOnly {
                last_confirmed,
                closed,
            },
        }))
    }
}

// -- segment handles --

enum Mode {
    /// created by this handle, appends allowed until fenced or closed
    Writer,
    /// opened with recovery, sealed
    Recovered,
    /// snapshot of the segment as it was when opened
    ReadOnly {
        last_confirmed: Option<EntryId>,
        closed: bool,
    },
}

struct MemorySegmentHandle {
    storage: Arc<Inner>,
    segment: Arc<Segment>,
    mode: Mode,
}

#[async_trait]
impl SegmentHandle for MemorySegmentHandle {
    fn id(&self) -> SegmentId {
        self.segment.id
    }

    async fn append(&self, data: Bytes) -> Result<EntryId, StorageError> {
        check_available(&self.storage)?;
        if !matches!(self.mode, Mode::Writer) {
            return Err(StorageError::Closed(self.segment.id));
        }

        let mut state = self.segment.state.lock();
        if state.fenced {
            return Err(StorageError::Fenced(self.segment.id));
        }
        if state.closed {
            return Err(StorageError::Closed(self.segment.id));
        }
        state.entries.push(data);
        Ok(state.entries.len() as u64 - 1)
    }

    fn last_confirmed(&self) -> Option<EntryId> {
        match self.mode {
            Mode::ReadOnly { last_confirmed, .. } => last_confirmed,
            _ => self.segment.state.lock().last_confirmed(),
        }
    }

    async fn read(&self, first: EntryId, last: EntryId) -> Result<Vec<Bytes>, StorageError> {
        check_available(&self.storage)?;
        let state = self.segment.state.lock();
        let out_of_range = StorageError::OutOfRange {
            segment: self.segment.id,
            first,
            last,
        };
        if first > last || last as usize >= state.entries.len() {
            return Err(out_of_range);
        }
        Ok(state.entries[first as usize..=last as usize].to_vec())
    }

    fn is_closed(&self) -> bool {
        match self.mode {
            Mode::ReadOnly { closed, .. } => closed,
            _ => self.segment.state.lock().closed,
        }
    }

    async fn close(&self) -> Result<(), StorageError> {
        if let Mode::Writer = self.mode {
            self.segment.state.lock().closed = true;
        }
        Ok(())
    }
}
