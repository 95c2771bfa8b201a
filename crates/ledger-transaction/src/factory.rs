//! # factory
//!
//! why: committers and readers of one service share storage, coordination and policy
//! relations: used by coordinator.rs, builds committer.rs types on ledger-commit parts
//! what: CommitterFactory (create committer for a log, create reader with a consumer)

use crate::committer::{TransactionCommitter, TransactionReader};
use crate::log::TransactionLog;
use crate::model::Transaction;
use chrono::NaiveDate;
use ledger_commit::reader::entry_consumer;
use ledger_commit::{ChainStore, EntryConsumer, JsonCodec, LogReader, SegmentAccessor};
use ledger_core::{Coordination, LedgerTimings, LogStorage, ReplicationConfig, StreamPath};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct CommitterFactory {
    storage: Arc<dyn LogStorage>,
    coordination: Arc<dyn Coordination>,
    replication: ReplicationConfig,
    timings: LedgerTimings,
}

impl CommitterFactory {
    pub fn new(
        storage: Arc<dyn LogStorage>,
        coordination: Arc<dyn Coordination>,
        replication: ReplicationConfig,
        timings: LedgerTimings,
    ) -> Self {
        Self {
            storage,
            coordination,
            replication,
            timings,
        }
    }

    pub fn coordination(&self) -> &Arc<dyn Coordination> {
        &self.coordination
    }

    /// A committer for the account-day stream, recording commits and replays into `log`.
    ///
    /// Must be called from within a tokio runtime: the committer joins the
    /// election immediately.
    pub fn create(
        &self,
        log: Arc<TransactionLog>,
        account_id: Uuid,
        date: NaiveDate,
    ) -> TransactionCommitter {
        let stream = StreamPath::new(account_id, date);
        let replayed = {
            let log = log.clone();
            entry_consumer(move |_, entry_id, transaction: &Transaction| {
                log.record_replayed(entry_id, transaction)
            })
        };
        let reader = self.log_reader(&stream, replayed);
        TransactionCommitter::new(
            account_id,
            reader,
            self.coordination.clone(),
            stream.election_group(),
            log,
        )
    }

    /// A one-shot reader of the account-day stream feeding `consumer`
    pub fn create_reader(
        &self,
        account_id: Uuid,
        date: NaiveDate,
        consumer: EntryConsumer<Transaction>,
    ) -> TransactionReader {
        let stream = StreamPath::new(account_id, date);
        TransactionReader::new(account_id, self.log_reader(&stream, consumer))
    }

    fn log_reader(
        &self,
        stream: &StreamPath,
        consumer: EntryConsumer<Transaction>,
    ) -> LogReader<Transaction> {
        LogReader::new(
            Uuid::new_v4(),
            SegmentAccessor::new(self.storage.clone(), &self.replication, stream.secret()),
            ChainStore::new(self.coordination.clone(), stream),
            consumer,
            Arc::new(JsonCodec::<Transaction>::new()),
            self.timings.clone(),
            CancellationToken::new(),
        )
    }
}
