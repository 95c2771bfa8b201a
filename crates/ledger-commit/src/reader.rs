//! # reader
//!
//! why: followers must replay every committed entry in chain order and stay warm for promotion
//! relations: uses accessor.rs and chain_store.rs, embedded by committer.rs
//! what: LogReader with read_from (single pass or follow until leader) and read_all (retrying)

use crate::accessor::SegmentAccessor;
use crate::chain_store::ChainStore;
use crate::codec::PayloadCodec;
use ledger_core::{EntryId, EntryRef, LedgerFailure, LedgerTimings, SegmentChain, SegmentId};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Callback receiving every replayed entry
pub type EntryConsumer<T> = Arc<dyn Fn(SegmentId, EntryId, &T) + Send + Sync>;

/// Build an [`EntryConsumer`] from a closure
pub fn entry_consumer<T, F>(f: F) -> EntryConsumer<T>
where
    F: Fn(SegmentId, EntryId, &T) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Replays the entries of one stream
pub struct LogReader<T> {
    participant: Uuid,
    accessor: SegmentAccessor,
    store: ChainStore,
    consumer: EntryConsumer<T>,
    codec: Arc<dyn PayloadCodec<T>>,
    timings: LedgerTimings,
    cancel: CancellationToken,
    leadership: Option<watch::Receiver<bool>>,
}

impl<T> LogReader<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(
        participant: Uuid,
        accessor: SegmentAccessor,
        store: ChainStore,
        consumer: EntryConsumer<T>,
        codec: Arc<dyn PayloadCodec<T>>,
        timings: LedgerTimings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            participant,
            accessor,
            store,
            consumer,
            codec,
            timings,
            cancel,
            leadership: None,
        }
    }

    /// Stop following as soon as `leadership` reports true
    pub fn with_leadership(mut self, leadership: watch::Receiver<bool>) -> Self {
        self.leadership = Some(leadership);
        self
    }

    pub fn participant(&self) -> Uuid {
        self.participant
    }

    pub fn accessor(&self) -> &SegmentAccessor {
        &self.accessor
    }

    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    pub fn consumer(&self) -> &EntryConsumer<T> {
        &self.consumer
    }

    pub fn codec(&self) -> &dyn PayloadCodec<T> {
        self.codec.as_ref()
    }

    pub fn timings(&self) -> &LedgerTimings {
        &self.timings
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Replay from the beginning until caught up, retrying after failures.
    ///
    /// With `follow` the reader keeps tailing until it becomes leader or is
    /// cancelled. Only cancellation is reported as an error.
    pub async fn read_all(&self, follow: bool) -> Result<EntryRef<T>, LedgerFailure<T>> {
        let mut last = EntryRef::NoEntry;
        info!(follow, "reading all entries");

        loop {
            match self.read_from(last, follow).await {
                Ok(entry) => return Ok(entry),
                Err(failure) if failure.is_interrupted() => return Err(failure),
                Err(failure) => {
                    warn!(error = %failure.error, resume = %failure.resume_point, "read failed, retrying");
                    last = failure.resume_point;
                    self.pause(&last).await?;
                }
            }
        }
    }

    /// Replay every unread entry after `entry`.
    ///
    /// Without `follow` a single pass over the chain as loaded now is made.
    /// With `follow` open segments are polled and the chain reloaded until
    /// the caller becomes leader or is cancelled.
    pub async fn read_from(
        &self,
        entry: EntryRef<T>,
        follow: bool,
    ) -> Result<EntryRef<T>, LedgerFailure<T>> {
        let mut last = entry;

        loop {
            if self.is_leader() {
                return Ok(last);
            }
            if self.cancel.is_cancelled() {
                return Err(LedgerFailure::interrupted(last));
            }

            let chain = match self.store.load().await {
                Ok(chain) => chain,
                Err(e) => return Err(LedgerFailure::new(last, e)),
            };
            let unread = unread_segments(&chain, &last);

            if unread.is_empty() && !follow {
                return Ok(last);
            }

            let before = position(&last);
            last = self.consume_segments(last, &unread, follow).await?;

            if !follow {
                return Ok(last);
            }
            if position(&last) == before && !self.is_leader() {
                debug!("no new entries, awaiting chain changes");
                self.pause(&last).await?;
            }
        }
    }

    async fn consume_segments(
        &self,
        mut last: EntryRef<T>,
        segments: &SegmentChain,
        follow: bool,
    ) -> Result<EntryRef<T>, LedgerFailure<T>> {
        for segment_id in segments {
            loop {
                if self.is_leader() {
                    return Ok(last);
                }
                if self.cancel.is_cancelled() {
                    return Err(LedgerFailure::interrupted(last));
                }

                let starting = last.starting_offset(segment_id);
                debug!(segment = segment_id, from = starting, "reading segment");
                let segment = match self.accessor.open_for_read(segment_id).await {
                    Ok(segment) => segment,
                    Err(e) => return Err(LedgerFailure::new(last, e)),
                };

                if segment.has_entries_from(starting) {
                    last = segment
                        .consume_entries(starting, last, &self.consumer, self.codec.as_ref())
                        .await?;
                }

                if segment.is_closed() {
                    debug!(segment = segment_id, "finished reading closed segment");
                    break;
                }
                if !follow {
                    break;
                }

                debug!(segment = segment_id, "awaiting new commits to open segment");
                self.pause(&last).await?;
            }
        }
        Ok(last)
    }

    /// Sleep one poll interval unless cancelled first
    pub(crate) async fn pause(&self, last: &EntryRef<T>) -> Result<(), LedgerFailure<T>> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(LedgerFailure::interrupted(last.clone())),
            _ = tokio::time::sleep(self.timings.poll_interval()) => Ok(()),
        }
    }
}

/// Segments that may still hold unread entries: the cursor's own segment onwards
pub(crate) fn unread_segments<T>(chain: &SegmentChain, last: &EntryRef<T>) -> SegmentChain {
    match last.segment() {
        Some(segment) => chain.starting_at(segment),
        None => chain.clone(),
    }
}

fn position<T>(entry: &EntryRef<T>) -> Option<(SegmentId, EntryId)> {
    entry.segment().zip(entry.entry())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use ledger_core::ReplicationConfig;
    use ledger_storage::{InMemoryCoordination, InMemoryLogStorage};
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Fixture {
        storage: InMemoryLogStorage,
        accessor: SegmentAccessor,
        store: ChainStore,
    }

    fn fixture() -> Fixture {
        let storage = InMemoryLogStorage::new();
        let accessor = SegmentAccessor::new(
            Arc::new(storage.clone()),
            &ReplicationConfig::default(),
            b"s".to_vec(),
        );
        let store = ChainStore::at_path(Arc::new(InMemoryCoordination::new()), "chain");
        Fixture {
            storage,
            accessor,
            store,
        }
    }

    fn reader(fixture: &Fixture, seen: Arc<Mutex<Vec<String>>>) -> LogReader<String> {
        LogReader::new(
            Uuid::new_v4(),
            fixture.accessor.clone(),
            fixture.store.clone(),
            entry_consumer(move |_, _, payload: &String| seen.lock().push(payload.clone())),
            Arc::new(JsonCodec::<String>::new()),
            LedgerTimings::default(),
            CancellationToken::new(),
        )
    }

    async fn write_segment(fixture: &Fixture, words: &[&str], close: bool) -> SegmentId {
        let codec = JsonCodec::<String>::new();
        let segment = fixture.accessor.create().await.unwrap();
        for word in words {
            segment.add_entry(word.to_string(), &codec).await.unwrap();
        }
        if close {
            segment.close().await.unwrap();
        }
        let loaded = fixture.store.load_versioned().await.unwrap();
        let mut chain = loaded.chain;
        chain.append(segment.id());
        fixture.store.persist(loaded.stat, &chain).await.unwrap();
        segment.id()
    }

    #[tokio::test]
    async fn empty_stream_returns_cursor_unchanged() {
        let fixture = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let last = reader(&fixture, seen.clone())
            .read_from(EntryRef::NoEntry, false)
            .await
            .unwrap();

        assert_eq!(last, EntryRef::NoEntry);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn single_pass_reads_every_segment_in_order() {
        let fixture = fixture();
        write_segment(&fixture, &["a", "b"], true).await;
        let open = write_segment(&fixture, &["c"], false).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let last = reader(&fixture, seen.clone())
            .read_from(EntryRef::NoEntry, false)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
        assert_eq!(last, EntryRef::at(open, 0, "c".to_string()));
    }

    #[tokio::test]
    async fn resumes_inside_the_cursor_segment() {
        let fixture = fixture();
        let first = write_segment(&fixture, &["a", "b", "c"], true).await;
        write_segment(&fixture, &["d"], true).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        reader(&fixture, seen.clone())
            .read_from(EntryRef::at(first, 1, "b".to_string()), false)
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn follow_tails_open_segment_until_cancelled() {
        let fixture = fixture();
        let codec = JsonCodec::<String>::new();
        let segment = fixture.accessor.create().await.unwrap();
        fixture
            .store
            .create(&[segment.id()].into_iter().collect())
            .await
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let reader = Arc::new(reader(&fixture, seen.clone()));
        let following = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.read_from(EntryRef::NoEntry, true).await })
        };

        segment.add_entry("late".to_string(), &codec).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(*seen.lock(), vec!["late"]);

        reader.cancel_token().cancel();
        let failure = following.await.unwrap().unwrap_err();
        assert!(failure.is_interrupted());
        assert_eq!(failure.resume_point.entry(), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn read_all_retries_through_outage() {
        let fixture = fixture();
        write_segment(&fixture, &["a"], true).await;
        fixture.storage.set_available(false);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let reader = Arc::new(reader(&fixture, seen.clone()));
        let reading = {
            let reader = reader.clone();
            tokio::spawn(async move { reader.read_all(false).await })
        };

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(seen.lock().is_empty());
        fixture.storage.set_available(true);

        let last = reading.await.unwrap().unwrap();
        assert_eq!(last.payload(), Some(&"a".to_string()));
        assert_eq!(*seen.lock(), vec!["a"]);
    }
}
