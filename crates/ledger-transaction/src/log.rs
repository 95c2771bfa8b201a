//! # log
//!
//! why: many concurrent submitters must be funnelled into the single active committer of an account
//! relations: submitted to by coordinator.rs, drained by committer.rs, queried for history
//! what: TransactionLog (single-slot rendezvous with bounded waits), CommitIndex
//!
//! a submitter hands its transaction directly to a committer waiting in
//! `await_commit`; there is no buffer, so a transaction is only ever held by
//! one committer and submissions are committed in the order they are taken.

use crate::config::TransactionLogConfig;
use crate::context::transaction_span;
use crate::error::{InvalidSubmission, TransactionLogError};
use crate::model::{CommitState, LedgerCommitResponse, Transaction};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ledger_core::{EntryId, EntryRef, LedgerError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, Notify};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

// -- commit index --

/// Transactions observed as committed, in commit order
#[derive(Default)]
pub struct CommitIndex {
    commits: DashMap<Uuid, IndexedCommit>,
    sequence: AtomicU64,
}

struct IndexedCommit {
    order: u64,
    entry_id: Option<EntryId>,
    transaction: Transaction,
}

impl CommitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a commit unless the transaction is already known. Returns true if recorded.
    pub fn record(&self, entry_id: Option<EntryId>, transaction: Transaction) -> bool {
        match self.commits.entry(transaction.transaction_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                let order = self.sequence.fetch_add(1, Ordering::SeqCst);
                vacant.insert(IndexedCommit {
                    order,
                    entry_id,
                    transaction,
                });
                true
            }
        }
    }

    pub fn contains(&self, transaction_id: Uuid) -> bool {
        self.commits.contains_key(&transaction_id)
    }

    pub fn entry_id(&self, transaction_id: Uuid) -> Option<EntryId> {
        self.commits
            .get(&transaction_id)
            .and_then(|commit| commit.entry_id)
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Every recorded transaction, ordered by commit order
    pub fn snapshot(&self) -> Vec<Transaction> {
        let mut ordered: Vec<(u64, Transaction)> = self
            .commits
            .iter()
            .map(|commit| (commit.order, commit.transaction.clone()))
            .collect();
        ordered.sort_by_key(|(order, _)| *order);
        ordered.into_iter().map(|(_, transaction)| transaction).collect()
    }
}

// -- rendezvous --

/// A transaction held by exactly one committer until it reports back
struct PendingSubmission {
    transaction: Transaction,
    completion: oneshot::Sender<CommitOutcome>,
}

#[derive(Debug)]
enum CommitOutcome {
    Committed(Option<EntryId>),
    Rejected(InvalidSubmission),
    Errored(String),
    /// The committer stopped before appending; the submitter offers it again
    Returned(Transaction),
}

/// The rendezvous between submitters and the committers of one account
pub struct TransactionLog {
    account_id: Uuid,
    config: TransactionLogConfig,
    takers: Mutex<VecDeque<oneshot::Sender<PendingSubmission>>>,
    taker_arrived: Notify,
    index: CommitIndex,
}

impl TransactionLog {
    pub fn new(account_id: Uuid, config: TransactionLogConfig) -> Self {
        Self {
            account_id,
            config,
            takers: Mutex::new(VecDeque::new()),
            taker_arrived: Notify::new(),
            index: CommitIndex::new(),
        }
    }

    pub fn account_id(&self) -> Uuid {
        self.account_id
    }

    pub fn config(&self) -> &TransactionLogConfig {
        &self.config
    }

    pub fn index(&self) -> &CommitIndex {
        &self.index
    }

    /// Committed transactions in commit order
    pub fn commits(&self) -> Vec<Transaction> {
        self.index.snapshot()
    }

    /// Record an entry replayed from the log, e.g. one committed by another process
    pub fn record_replayed(&self, entry_id: EntryId, transaction: &Transaction) {
        if self.index.record(Some(entry_id), transaction.clone()) {
            debug!(account = %self.account_id, transaction = %transaction.transaction_id, entry_id, "recorded replayed transaction");
        }
    }

    pub fn validate(&self, transaction: &Transaction) -> Result<(), InvalidSubmission> {
        if transaction.transaction_id.is_nil() {
            return Err(InvalidSubmission::NilTransactionId);
        }
        if !transaction.involves(self.account_id) {
            return Err(InvalidSubmission::WrongAccount);
        }
        if self.index.contains(transaction.transaction_id) {
            return Err(InvalidSubmission::AlreadySubmitted);
        }
        Ok(())
    }

    /// Hand `transaction` to the active committer and wait for the outcome.
    ///
    /// Invalid transactions are rejected before reaching the rendezvous.
    /// Otherwise the outcome is always one of the coarse commit states:
    /// `FAILED` when no committer takes the transaction within the submit
    /// timeout, `UNKNOWN` when the commit did not finish within the commit
    /// timeout or errored, `COMPLETED` with the entry id otherwise. A
    /// committer that stops before appending hands the transaction back, and
    /// it is offered again until the submit timeout runs out.
    pub async fn submit(
        &self,
        transaction: Transaction,
        interrupt: &CancellationToken,
    ) -> Result<LedgerCommitResponse, TransactionLogError> {
        self.validate(&transaction)?;

        let span = transaction_span(self.account_id, transaction.transaction_id);
        self.rendezvous(transaction, interrupt).instrument(span).await
    }

    async fn rendezvous(
        &self,
        transaction: Transaction,
        interrupt: &CancellationToken,
    ) -> Result<LedgerCommitResponse, TransactionLogError> {
        info!("submitting transaction");
        let deadline = Instant::now() + self.config.submit_timeout();
        let mut transaction = transaction;

        loop {
            let (completion, outcome) = oneshot::channel();
            let pending = PendingSubmission {
                transaction,
                completion,
            };
            if !self.offer(pending, deadline, interrupt).await? {
                warn!("submit timeout, no committer took the transaction");
                return Ok(response(
                    None,
                    CommitState::failed("Failed to submit transaction - no committers available"),
                ));
            }

            info!("awaiting commit of submitted transaction");
            let waited = tokio::select! {
                _ = interrupt.cancelled() => {
                    warn!("commit wait interrupted");
                    return Err(TransactionLogError::Interrupted);
                }
                waited = timeout(self.config.commit_timeout(), outcome) => waited,
            };

            return match waited {
                Ok(Ok(CommitOutcome::Returned(returned))) => {
                    info!("committer stopped before committing, offering transaction again");
                    transaction = returned;
                    continue;
                }
                Ok(Ok(CommitOutcome::Committed(entry_id))) => {
                    info!(entry_id, "transaction committed");
                    Ok(response(
                        entry_id,
                        CommitState::completed("Transaction successfully committed"),
                    ))
                }
                Ok(Ok(CommitOutcome::Rejected(reason))) => {
                    warn!(%reason, "transaction rejected by committer");
                    Err(reason.into())
                }
                Ok(Ok(CommitOutcome::Errored(error))) => {
                    warn!(%error, "commit failed, outcome unknown");
                    Ok(response(
                        None,
                        CommitState::unknown(format!("Transaction commit failed: {error}")),
                    ))
                }
                Ok(Err(_)) => {
                    warn!("committer went away holding the transaction, outcome unknown");
                    Ok(response(
                        None,
                        CommitState::unknown("Transaction commit outcome unknown - committer went away"),
                    ))
                }
                Err(_) => {
                    info!("commit timeout for transaction");
                    Ok(response(
                        None,
                        CommitState::unknown("Transaction took too long to commit"),
                    ))
                }
            };
        }
    }

    /// Offer `pending` to committers until one takes it. Returns false at `deadline`.
    async fn offer(
        &self,
        mut pending: PendingSubmission,
        deadline: Instant,
        interrupt: &CancellationToken,
    ) -> Result<bool, TransactionLogError> {
        loop {
            let arrived = self.taker_arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            pending = match self.hand_off(pending) {
                Ok(()) => return Ok(true),
                Err(returned) => returned,
            };

            tokio::select! {
                _ = interrupt.cancelled() => {
                    warn!("submit interrupted");
                    return Err(TransactionLogError::Interrupted);
                }
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
                _ = &mut arrived => {}
            }
        }
    }

    /// Give `pending` to the longest-waiting committer still listening
    fn hand_off(&self, mut pending: PendingSubmission) -> Result<(), PendingSubmission> {
        loop {
            let taker = self.takers.lock().pop_front();
            let Some(taker) = taker else {
                return Err(pending);
            };
            match taker.send(pending) {
                Ok(()) => return Ok(()),
                // that committer gave up waiting
                Err(returned) => pending = returned,
            }
        }
    }

    /// Wait up to the await timeout for one submission
    async fn take(&self, cancel: &CancellationToken) -> Option<PendingSubmission> {
        let (taker, mut receiver) = oneshot::channel();
        self.takers.lock().push_back(taker);
        self.taker_arrived.notify_waiters();

        let received = tokio::select! {
            _ = cancel.cancelled() => None,
            received = timeout(self.config.await_timeout(), &mut receiver) => {
                received.ok().and_then(Result::ok)
            }
        };
        if received.is_some() {
            return received;
        }

        // a submitter may have handed off just as we stopped listening
        receiver.close();
        let late = receiver.try_recv().ok();
        self.takers.lock().retain(|taker| !taker.is_closed());
        late
    }

    /// Take one submission, if any arrives in time, and commit it with `commit`.
    ///
    /// Returns the recorded entry, `None` when nothing was submitted or the
    /// submission was rejected. A failing `commit` is reported to the
    /// submitter as an unknown outcome and returned as the error. A committer
    /// cancelled after the take hands the transaction back to its submitter.
    pub async fn await_commit<F, Fut>(
        &self,
        cancel: &CancellationToken,
        commit: F,
    ) -> Result<Option<EntryRef<Transaction>>, LedgerError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<EntryRef<Transaction>, LedgerError>>,
    {
        debug!(account = %self.account_id, "awaiting transaction");
        let Some(pending) = self.take(cancel).await else {
            return Ok(None);
        };
        let PendingSubmission {
            transaction,
            completion,
        } = pending;

        if cancel.is_cancelled() {
            debug!(transaction = %transaction.transaction_id, "stopping, handing transaction back");
            let _ = completion.send(CommitOutcome::Returned(transaction));
            return Err(LedgerError::Interrupted);
        }
        if let Err(reason) = self.validate(&transaction) {
            let _ = completion.send(CommitOutcome::Rejected(reason));
            return Ok(None);
        }

        let span = transaction_span(self.account_id, transaction.transaction_id);
        async {
            match commit(transaction.clone()).await {
                Ok(entry) => {
                    let entry_id = entry.entry();
                    self.index.record(entry_id, transaction);
                    let _ = completion.send(CommitOutcome::Committed(entry_id));
                    Ok(Some(entry))
                }
                Err(e) => {
                    let _ = completion.send(CommitOutcome::Errored(e.to_string()));
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }
}

fn response(entry_id: Option<EntryId>, state: CommitState) -> LedgerCommitResponse {
    LedgerCommitResponse { entry_id, state }
}
