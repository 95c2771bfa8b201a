//! # file
//!
//! why: keep segments durable across restarts on a single node using the local filesystem
//! relations: implements ledger_core::LogStorage, an alternative to InMemoryLogStorage
//! what: FileLogStorage, one length-prefixed entry file plus one json metadata file per segment

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ledger_core::{
    DigestType, EntryId, LogStorage, SegmentHandle, SegmentId, SegmentOptions, StorageError,
};
use serde::{Deserialize, Serialize};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

const FRAME_HEADER_LEN: usize = std::mem::size_of::<u32>();

/// file-based log storage
///
/// stores each segment in the directory as:
/// - `{id}.log`: entries, each prefixed with a 4-byte big-endian length
/// - `{id}.meta.json`: replication options, secret, closed/fenced flags
#[derive(Clone)]
pub struct FileLogStorage {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    next_id: AtomicU64,
    /// serializes metadata and entry-file mutations across handles
    write_lock: Mutex<()>,
}

/// whole frames of an entry file
struct Frames {
    entries: Vec<Bytes>,
    /// bytes covered by `entries`
    valid_len: u64,
    file_len: u64,
}

/// metadata structure for one segment
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentMeta {
    ensemble_size: u32,
    write_quorum_size: u32,
    ack_quorum_size: u32,
    digest: DigestType,
    secret: Vec<u8>,
    closed: bool,
    fenced: bool,
}

impl FileLogStorage {
    /// open (or create) storage rooted at `dir`
    ///
    /// new segment ids continue after the highest id already present
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        let mut next_id = 0;
        let mut listing = fs::read_dir(&dir).await?;
        while let Some(entry) = listing.next_entry().await? {
            let name = entry.file_name();
            let id = name
                .to_str()
                .and_then(|n| n.strip_suffix(".meta.json"))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(id) = id {
                next_id = next_id.max(id + 1);
            }
        }

        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                next_id: AtomicU64::new(next_id),
                write_lock: Mutex::new(()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    async fn open_existing(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<(SegmentMeta, u64), StorageError> {
        let meta = self.inner.load_meta(segment).await?;
        if meta.digest != digest || meta.secret != secret {
            return Err(StorageError::Unauthorized(segment));
        }
        let count = self.inner.scan_frames(segment).await?.entries.len() as u64;
        Ok((meta, count))
    }
}

impl Inner {
    fn meta_path(&self, segment: SegmentId) -> PathBuf {
        self.dir.join(format!("{segment:020}.meta.json"))
    }

    fn log_path(&self, segment: SegmentId) -> PathBuf {
        self.dir.join(format!("{segment:020}.log"))
    }

    async fn load_meta(&self, segment: SegmentId) -> Result<SegmentMeta, StorageError> {
        let contents = match fs::read(self.meta_path(segment)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::NoSuchSegment(segment))
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&contents).map_err(|e| StorageError::Corrupted(e.to_string()))
    }

    async fn save_meta(&self, segment: SegmentId, meta: &SegmentMeta) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        // atomic write: write to temp file then rename
        let temp_path = self.dir.join(format!("{segment:020}.meta.tmp"));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, self.meta_path(segment)).await?;

        Ok(())
    }

    async fn scan_frames(&self, segment: SegmentId) -> Result<Frames, StorageError> {
        let contents = match fs::read(self.log_path(segment)).await {
            Ok(contents) => Bytes::from(contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Frames {
                    entries: Vec::new(),
                    valid_len: 0,
                    file_len: 0,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = contents.len() as u64;
        let mut buf = contents;
        let mut entries = Vec::new();
        let mut valid_len = 0;
        while buf.remaining() >= FRAME_HEADER_LEN {
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                // torn tail from an interrupted append, never confirmed
                break;
            }
            entries.push(buf.split_to(len));
            valid_len += (FRAME_HEADER_LEN + len) as u64;
        }
        Ok(Frames {
            entries,
            valid_len,
            file_len,
        })
    }

    /// Cut the entry file back to its last whole frame
    async fn truncate_torn_tail(&self, segment: SegmentId) -> Result<(), StorageError> {
        let frames = self.scan_frames(segment).await?;
        if frames.file_len > frames.valid_len {
            warn!(
                segment,
                torn = frames.file_len - frames.valid_len,
                "dropping torn tail of entry file"
            );
            let file = OpenOptions::new()
                .write(true)
                .open(self.log_path(segment))
                .await?;
            file.set_len(frames.valid_len).await?;
            file.sync_all().await?;
        }
        Ok(())
    }
}

/// Length header for a payload of `len` bytes
fn frame_header(segment: SegmentId, len: usize) -> Result<u32, StorageError> {
    u32::try_from(len).map_err(|_| StorageError::TooLarge { segment, len })
}

#[async_trait]
impl LogStorage for FileLogStorage {
    async fn create_segment(
        &self,
        options: &SegmentOptions,
    ) -> Result<Box<dyn SegmentHandle>, StorageError> {
        let _guard = self.inner.write_lock.lock().await;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        let meta = SegmentMeta {
            ensemble_size: options.ensemble_size,
            write_quorum_size: options.write_quorum_size,
            ack_quorum_size: options.ack_quorum_size,
            digest: options.digest,
            secret: options.secret.clone(),
            closed: false,
            fenced: false,
        };
        self.inner.save_meta(id, &meta).await?;
        fs::File::create(self.inner.log_path(id)).await?;

        Ok(Box::new(FileSegmentHandle::new(
            self.inner.clone(),
            id,
            Access::Writer,
            0,
            false,
        )))
    }

    async fn open_segment(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<Box<dyn SegmentHandle>, StorageError> {
        let _guard = self.inner.write_lock.lock().await;
        let (mut meta, count) = self.open_existing(segment, digest, secret).await?;
        self.inner.truncate_torn_tail(segment).await?;
        meta.fenced = true;
        meta.closed = true;
        self.inner.save_meta(segment, &meta).await?;

        Ok(Box::new(FileSegmentHandle::new(
            self.inner.clone(),
            segment,
            Access::Recovered,
            count,
            true,
        )))
    }

    async fn open_segment_no_recovery(
        &self,
        segment: SegmentId,
        digest: DigestType,
        secret: &[u8],
    ) -> Result<Box<dyn SegmentHandle>, StorageError> {
        let (meta, count) = self.open_existing(segment, digest, secret).await?;

        Ok(Box::new(FileSegmentHandle::new(
            self.inner.clone(),
            segment,
            Access::ReadOnly,
            count,
            meta.closed,
        )))
    }
}

// -- segment handle --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Writer,
    Recovered,
    ReadOnly,
}

struct FileSegmentHandle {
    storage: Arc<Inner>,
    id: SegmentId,
    access: Access,
    /// entries known to this handle
    count: AtomicU64,
    /// bytes of whole frames written through this handle
    written: AtomicU64,
    closed: AtomicBool,
}

impl FileSegmentHandle {
    fn new(storage: Arc<Inner>, id: SegmentId, access: Access, count: u64, closed: bool) -> Self {
        Self {
            storage,
            id,
            access,
            count: AtomicU64::new(count),
            written: AtomicU64::new(0),
            closed: AtomicBool::new(closed),
        }
    }
}

#[async_trait]
impl SegmentHandle for FileSegmentHandle {
    fn id(&self) -> SegmentId {
        self.id
    }

    async fn append(&self, data: Bytes) -> Result<EntryId, StorageError> {
        if self.access != Access::Writer || self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed(self.id));
        }
        let header = frame_header(self.id, data.len())?;

        let _guard = self.storage.write_lock.lock().await;
        let meta = self.storage.load_meta(self.id).await?;
        if meta.fenced {
            return Err(StorageError::Fenced(self.id));
        }

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + data.len());
        frame.put_u32(header);
        frame.put_slice(&data);

        let written = self.written.load(Ordering::SeqCst);
        let mut file = OpenOptions::new()
            .write(true)
            .open(self.storage.log_path(self.id))
            .await?;
        if file.metadata().await?.len() != written {
            // an earlier append failed part-way
            file.set_len(written).await?;
        }
        file.seek(SeekFrom::Start(written)).await?;
        file.write_all(&frame).await?;
        file.sync_data().await?;

        self.written.fetch_add(frame.len() as u64, Ordering::SeqCst);
        Ok(self.count.fetch_add(1, Ordering::SeqCst))
    }

    fn last_confirmed(&self) -> Option<EntryId> {
        self.count.load(Ordering::SeqCst).checked_sub(1)
    }

    async fn read(&self, first: EntryId, last: EntryId) -> Result<Vec<Bytes>, StorageError> {
        let frames = self.storage.scan_frames(self.id).await?.entries;
        if first > last || last as usize >= frames.len() {
            return Err(StorageError::OutOfRange {
                segment: self.id,
                first,
                last,
            });
        }
        Ok(frames[first as usize..=last as usize].to_vec())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.access != Access::Writer || self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.storage.write_lock.lock().await;
        let mut meta = self.storage.load_meta(self.id).await?;
        meta.closed = true;
        self.storage.save_meta(self.id, &meta).await
    }
}
