//! # committer
//!
//! why: bind the generic engine to transactions, their codec and the account-day stream
//! relations: built by factory.rs, pooled by coordinator.rs, drains log.rs
//! what: TransactionCommitter (commits from the rendezvous), TransactionReader (one-shot replay)

use crate::context::account_span;
use crate::log::TransactionLog;
use crate::model::Transaction;
use async_trait::async_trait;
use ledger_commit::context::reader_span;
use ledger_commit::{CommitAttempt, JsonCodec, LogCommitter, LogReader, PayloadCodec, Segment};
use ledger_core::{Coordination, EntryRef, LedgerFailure};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};
use uuid::Uuid;

/// Commits whatever the rendezvous hands over, one transaction per attempt
struct CommitFromLog {
    log: Arc<TransactionLog>,
    codec: JsonCodec<Transaction>,
}

#[async_trait]
impl CommitAttempt<Transaction> for CommitFromLog {
    async fn attempt_commit(
        &self,
        segment: &Segment,
        last: EntryRef<Transaction>,
        cancel: &CancellationToken,
    ) -> Result<EntryRef<Transaction>, LedgerFailure<Transaction>> {
        let codec: &dyn PayloadCodec<Transaction> = &self.codec;
        let committed = self
            .log
            .await_commit(cancel, |transaction| segment.add_entry(transaction, codec))
            .await;

        match committed {
            Ok(Some(entry)) => {
                info!(segment = segment.id(), entry = %entry, "committed transaction");
                Ok(entry)
            }
            Ok(None) => Ok(last),
            Err(e) => Err(LedgerFailure::new(last, e)),
        }
    }
}

/// One member of an account's committer pool
pub struct TransactionCommitter {
    account_id: Uuid,
    inner: LogCommitter<Transaction>,
}

impl TransactionCommitter {
    pub(crate) fn new(
        account_id: Uuid,
        reader: LogReader<Transaction>,
        coordination: Arc<dyn Coordination>,
        group: String,
        log: Arc<TransactionLog>,
    ) -> Self {
        let attempt = Arc::new(CommitFromLog {
            log,
            codec: JsonCodec::new(),
        });
        Self {
            account_id,
            inner: LogCommitter::new(reader, coordination, group, attempt),
        }
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn participant(&self) -> Uuid {
        self.inner.participant()
    }

    pub fn is_leader(&self) -> bool {
        self.inner.is_leader()
    }

    pub fn step_down(&self) {
        self.inner.step_down();
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Follow or lead until stopped
    pub async fn run(&self) -> EntryRef<Transaction> {
        self.inner.run().instrument(account_span(self.account_id)).await
    }
}

/// Replays an account-day stream once, without competing for leadership
pub struct TransactionReader {
    account_id: Uuid,
    inner: LogReader<Transaction>,
}

impl TransactionReader {
    pub(crate) fn new(account_id: Uuid, inner: LogReader<Transaction>) -> Self {
        Self { account_id, inner }
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn stop(&self) {
        self.inner.cancel_token().cancel();
    }

    /// Read every committed transaction, retrying through outages until done or stopped
    pub async fn run(&self) -> Result<EntryRef<Transaction>, LedgerFailure<Transaction>> {
        self.inner
            .read_all(false)
            .instrument(reader_span(self.inner.participant()))
            .instrument(account_span(self.account_id))
            .await
    }
}
