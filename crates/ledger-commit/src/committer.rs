//! # committer
//!
//! why: a new leader must replay everything its predecessor left unseen before it writes
//! relations: embeds reader.rs, campaigns through leadership.rs, specialised by ledger-transaction
//! what: CommitAttempt hook, LogCommitter run loop (follow / reconcile / extend chain / commit)

use crate::accessor::Segment;
use crate::context::ledger_span;
use crate::leadership::LeadershipFlag;
use crate::reader::{unread_segments, LogReader};
use async_trait::async_trait;
use ledger_core::{Coordination, EntryRef, LedgerFailure};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Performs at most one commit into the leader's open segment.
///
/// Called repeatedly while leadership holds. Returns the new last recorded
/// entry, or `last` unchanged when there was nothing to commit.
#[async_trait]
pub trait CommitAttempt<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn attempt_commit(
        &self,
        segment: &Segment,
        last: EntryRef<T>,
        cancel: &CancellationToken,
    ) -> Result<EntryRef<T>, LedgerFailure<T>>;
}

/// A participant that follows the stream and commits into it while leader
pub struct LogCommitter<T> {
    reader: LogReader<T>,
    flag: LeadershipFlag,
    attempt: Arc<dyn CommitAttempt<T>>,
}

impl<T> LogCommitter<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Join the election `group` and wire the reader to stop following on promotion
    pub fn new(
        reader: LogReader<T>,
        coordination: Arc<dyn Coordination>,
        group: impl Into<String>,
        attempt: Arc<dyn CommitAttempt<T>>,
    ) -> Self {
        let flag = LeadershipFlag::start(coordination, group.into(), reader.participant());
        let reader = reader.with_leadership(flag.watch());
        Self {
            reader,
            flag,
            attempt,
        }
    }

    pub fn participant(&self) -> Uuid {
        self.reader.participant()
    }

    pub fn is_leader(&self) -> bool {
        self.flag.is_leader()
    }

    pub fn leadership(&self) -> &LeadershipFlag {
        &self.flag
    }

    pub fn reader(&self) -> &LogReader<T> {
        &self.reader
    }

    /// Give up leadership but keep running; the flag re-joins the election
    pub fn step_down(&self) {
        self.flag.relinquish();
    }

    /// Cancel the run loop, relinquish leadership and leave the election
    pub fn stop(&self) {
        self.reader.cancel_token().cancel();
        self.flag.close();
    }

    /// Follow or lead until stopped. Returns the final resume point.
    pub async fn run(&self) -> EntryRef<T> {
        let participant = self.participant();
        let mut last = EntryRef::NoEntry;
        info!(%participant, "committer started");

        while !self.reader.cancel_token().is_cancelled() {
            let leader = self.flag.is_leader();
            let resume = std::mem::take(&mut last);
            let pass = async {
                if leader {
                    self.lead(resume).await
                } else {
                    self.reader.read_from(resume, true).await
                }
            };

            match pass.instrument(ledger_span(leader, participant)).await {
                Ok(entry) => last = entry,
                Err(failure) => {
                    let interrupted = failure.is_interrupted();
                    if interrupted {
                        debug!(%participant, resume = %failure.resume_point, "committer interrupted");
                    } else if failure.error.is_lost_race() {
                        warn!(%participant, resume = %failure.resume_point, "lost chain race to another leader");
                    } else {
                        warn!(%participant, error = %failure.error, resume = %failure.resume_point, "ledger pass failed");
                    }
                    last = failure.resume_point;
                    if interrupted {
                        break;
                    }
                }
            }

            if self.reader.pause(&last).await.is_err() {
                break;
            }
        }

        self.flag.shutdown().await;
        info!(%participant, resume = %last, "committer stopped");
        last
    }

    /// One leadership term: reconcile, extend the chain, commit until leadership ends
    async fn lead(&self, entry: EntryRef<T>) -> Result<EntryRef<T>, LedgerFailure<T>> {
        let store = self.reader.store();
        let accessor = self.reader.accessor();
        let cancel = self.reader.cancel_token();

        let loaded = match store.load_versioned().await {
            Ok(loaded) => loaded,
            Err(e) => return Err(LedgerFailure::new(entry, e)),
        };

        let mut last = entry;
        for segment_id in &unread_segments(&loaded.chain, &last) {
            if cancel.is_cancelled() {
                return Err(LedgerFailure::interrupted(last));
            }

            debug!(segment = segment_id, "reconciling segment");
            let segment = match accessor.open_as_leader(segment_id).await {
                Ok(segment) => segment,
                Err(e) => return Err(LedgerFailure::new(last, e)),
            };
            let starting = last.starting_offset(segment_id);
            last = segment
                .consume_entries(starting, last, self.reader.consumer(), self.reader.codec())
                .await?;
        }

        let segment = match accessor.create().await {
            Ok(segment) => segment,
            Err(e) => return Err(LedgerFailure::new(last, e)),
        };
        let mut chain = loaded.chain;
        chain.append(segment.id());

        if let Err(e) = store.persist(loaded.stat, &chain).await {
            close_quietly(&segment).await;
            return Err(LedgerFailure::new(last, e));
        }
        info!(segment = segment.id(), chain = %chain, "extended chain, accepting commits");

        while self.flag.is_leader() && !cancel.is_cancelled() {
            match self.attempt.attempt_commit(&segment, last, cancel).await {
                Ok(entry) => last = entry,
                Err(failure) => {
                    close_quietly(&segment).await;
                    return Err(failure);
                }
            }
        }

        close_quietly(&segment).await;
        info!(segment = segment.id(), resume = %last, "leadership term ended");
        Ok(last)
    }
}

async fn close_quietly(segment: &Segment) {
    if let Err(e) = segment.close().await {
        debug!(segment = segment.id(), error = %e, "closing segment failed");
    }
}
