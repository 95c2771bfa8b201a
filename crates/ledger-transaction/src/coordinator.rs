//! # coordinator
//!
//! why: each account needs a warm, redundant committer pool, created on demand and torn down when idle
//! relations: entry point for request handling, owns handlers built from factory.rs and log.rs
//! what: TransactionCoordinator (route, list, evict, sweep, shutdown), AccountLogHandler

use crate::clock::Clock;
use crate::committer::TransactionCommitter;
use crate::config::{CoordinatorConfig, LedgerServiceConfig, TransactionLogConfig};
use crate::context::account_span;
use crate::error::{CoordinatorError, TransactionLogError};
use crate::factory::CommitterFactory;
use crate::log::{CommitIndex, TransactionLog};
use crate::model::{LedgerCommitResponse, Transaction};
use chrono::NaiveDate;
use dashmap::DashMap;
use ledger_commit::reader::entry_consumer;
use ledger_core::{ConfigError, Coordination, EntryRef, LogStorage};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

// -- account handler --

/// The committer pool and rendezvous of one account-day stream
pub struct AccountLogHandler {
    account_id: Uuid,
    date: NaiveDate,
    log: Arc<TransactionLog>,
    committers: Vec<Arc<TransactionCommitter>>,
    tasks: Mutex<Vec<JoinHandle<EntryRef<Transaction>>>>,
    interrupt: CancellationToken,
    last_used: Mutex<Instant>,
}

impl AccountLogHandler {
    fn start(
        factory: &CommitterFactory,
        account_id: Uuid,
        date: NaiveDate,
        resilience_factor: usize,
        log_config: TransactionLogConfig,
    ) -> Self {
        let log = Arc::new(TransactionLog::new(account_id, log_config));
        let committers: Vec<Arc<TransactionCommitter>> = (0..resilience_factor)
            .map(|_| Arc::new(factory.create(log.clone(), account_id, date)))
            .collect();
        let tasks = committers
            .iter()
            .map(|committer| {
                let committer = committer.clone();
                tokio::spawn(async move { committer.run().await })
            })
            .collect();

        info!(account = %account_id, %date, resilience_factor, "started committer pool");
        Self {
            account_id,
            date,
            log,
            committers,
            tasks: Mutex::new(tasks),
            interrupt: CancellationToken::new(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn log(&self) -> &Arc<TransactionLog> {
        &self.log
    }

    pub fn committers(&self) -> &[Arc<TransactionCommitter>] {
        &self.committers
    }

    /// The pool member currently holding leadership, if any
    pub fn leader(&self) -> Option<&Arc<TransactionCommitter>> {
        self.committers.iter().find(|committer| committer.is_leader())
    }

    pub fn commits(&self) -> Vec<Transaction> {
        self.log.commits()
    }

    /// Submit through the rendezvous; closing the handler interrupts the wait
    pub async fn handle(
        &self,
        transaction: Transaction,
    ) -> Result<LedgerCommitResponse, TransactionLogError> {
        self.touch();
        self.log.submit(transaction, &self.interrupt).await
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Interrupt submitters, stop every committer and wait for them to finish
    pub async fn close(&self) {
        self.interrupt.cancel();
        for committer in &self.committers {
            committer.stop();
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(account = %self.account_id, error = %e, "committer task failed");
            }
        }
        info!(account = %self.account_id, date = %self.date, "closed committer pool");
    }
}

impl Drop for AccountLogHandler {
    fn drop(&mut self) {
        self.interrupt.cancel();
        for committer in &self.committers {
            committer.stop();
        }
    }
}

// -- coordinator --

/// Routes transactions to per-account committer pools
pub struct TransactionCoordinator {
    factory: CommitterFactory,
    config: CoordinatorConfig,
    log_config: TransactionLogConfig,
    clock: Arc<dyn Clock>,
    handlers: DashMap<Uuid, Arc<AccountLogHandler>>,
    shutdown: CancellationToken,
}

impl TransactionCoordinator {
    /// Validate configuration and start the background sweeper
    pub fn start(
        factory: CommitterFactory,
        config: CoordinatorConfig,
        log_config: TransactionLogConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        log_config.validate()?;

        let sweep_interval = config.sweep_interval();
        let coordinator = Arc::new(Self {
            factory,
            config,
            log_config,
            clock,
            handlers: DashMap::new(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(
            sweep(
                Arc::downgrade(&coordinator),
                sweep_interval,
                coordinator.shutdown.clone(),
            )
            .instrument(tracing::info_span!("sweeper")),
        );
        Ok(coordinator)
    }

    pub fn from_config(
        storage: Arc<dyn LogStorage>,
        coordination: Arc<dyn Coordination>,
        config: &LedgerServiceConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let factory = CommitterFactory::new(
            storage,
            coordination,
            config.replication.clone(),
            config.timings.clone(),
        );
        Self::start(
            factory,
            config.coordinator.clone(),
            config.transaction_log.clone(),
            clock,
        )
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn handler(&self, account_id: Uuid) -> Option<Arc<AccountLogHandler>> {
        self.handlers.get(&account_id).map(|h| h.value().clone())
    }

    pub fn accounts(&self) -> Vec<Uuid> {
        self.handlers.iter().map(|h| *h.key()).collect()
    }

    /// Submit `transaction` to the account's pool, starting the pool if needed
    pub async fn route_transaction(
        &self,
        account_id: Uuid,
        transaction: Transaction,
    ) -> Result<LedgerCommitResponse, CoordinatorError> {
        let handler = self.handler_for(account_id)?;
        let response = handler
            .handle(transaction)
            .instrument(account_span(account_id))
            .await?;
        Ok(response)
    }

    /// Today's committed transactions in commit order.
    ///
    /// Served from the pool's index when the account has one for today,
    /// otherwise reconstructed by replaying today's stream, bounded by the
    /// list timeout.
    pub async fn list_transactions(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<Transaction>, CoordinatorError> {
        if self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShutDown);
        }
        let today = self.clock.today();
        if let Some(handler) = self.handler(account_id).filter(|h| h.date() == today) {
            handler.touch();
            return Ok(handler.commits());
        }

        let index = Arc::new(CommitIndex::new());
        let consumer = {
            let index = index.clone();
            entry_consumer(move |_, entry_id, transaction: &Transaction| {
                index.record(Some(entry_id), transaction.clone());
            })
        };
        let reader = self.factory.create_reader(account_id, today, consumer);

        match tokio::time::timeout(self.config.list_timeout(), reader.run()).await {
            Ok(Ok(last)) => debug!(account = %account_id, %last, "history replayed"),
            Ok(Err(failure)) => warn!(account = %account_id, %failure, "history replay stopped"),
            Err(_) => {
                reader.stop();
                warn!(account = %account_id, replayed = index.len(), "history replay timed out, returning partial history");
            }
        }
        Ok(index.snapshot())
    }

    /// Close and forget the account's pool. Returns false if there was none.
    pub async fn evict(&self, account_id: Uuid) -> bool {
        let Some((_, handler)) = self.handlers.remove(&account_id) else {
            return false;
        };
        info!(account = %account_id, "evicting committer pool");
        handler.close().await;
        true
    }

    /// Close pools that are idle or belong to a previous day. Returns how many were closed.
    pub async fn evict_stale(&self) -> usize {
        let today = self.clock.today();
        let idle_timeout = self.config.idle_timeout();
        let stale: Vec<(Uuid, Arc<AccountLogHandler>)> = self
            .handlers
            .iter()
            .filter(|h| h.date() != today || idle_timeout.is_some_and(|idle| h.idle_for() >= idle))
            .map(|h| (*h.key(), h.value().clone()))
            .collect();

        let mut evicted = 0;
        for (account_id, handler) in stale {
            let removed = self
                .handlers
                .remove_if(&account_id, |_, current| Arc::ptr_eq(current, &handler));
            if removed.is_some() {
                info!(account = %account_id, date = %handler.date(), idle = ?handler.idle_for(), "evicting stale committer pool");
                handler.close().await;
                evicted += 1;
            }
        }
        evicted
    }

    /// Close every pool and refuse further work
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let accounts = self.accounts();
        for account_id in accounts {
            self.evict(account_id).await;
        }
        info!("coordinator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn handler_for(&self, account_id: Uuid) -> Result<Arc<AccountLogHandler>, CoordinatorError> {
        if self.shutdown.is_cancelled() {
            return Err(CoordinatorError::ShutDown);
        }

        let today = self.clock.today();
        if let Some(handler) = self.handler(account_id) {
            if handler.date() == today {
                return Ok(handler);
            }
            self.retire(account_id, handler);
        }

        let handler = self
            .handlers
            .entry(account_id)
            .or_insert_with(|| {
                Arc::new(AccountLogHandler::start(
                    &self.factory,
                    account_id,
                    today,
                    self.config.resilience_factor,
                    self.log_config.clone(),
                ))
            })
            .value()
            .clone();
        Ok(handler)
    }

    /// Replace a pool whose stream belongs to a previous day
    fn retire(&self, account_id: Uuid, handler: Arc<AccountLogHandler>) {
        let removed = self
            .handlers
            .remove_if(&account_id, |_, current| Arc::ptr_eq(current, &handler));
        if removed.is_some() {
            info!(account = %account_id, date = %handler.date(), "day rolled over, retiring committer pool");
            tokio::spawn(async move { handler.close().await });
        }
    }
}

impl Drop for TransactionCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn sweep(coordinator: Weak<TransactionCoordinator>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        let evicted = coordinator.evict_stale().await;
        if evicted > 0 {
            debug!(evicted, "swept stale committer pools");
        }
    }
}
