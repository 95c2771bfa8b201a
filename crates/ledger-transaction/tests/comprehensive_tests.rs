//! # comprehensive transaction tests
//!
//! why: verify routed transactions are committed once, in order, with honest outcomes
//! relations: tests ledger-transaction end to end over the ledger-storage backends
//! what: outcome, validation, ordering, handover, cross-process and durable scenarios

use chrono::NaiveDate;
use ledger_core::LogStorage;
use ledger_storage::{FileLogStorage, InMemoryCoordination, InMemoryLogStorage};
use ledger_transaction::{
    CommitStatus, InvalidSubmission, LedgerServiceConfig, MockClock, Transaction,
    TransactionCoordinator, TransactionDetails,
};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

// -- harness --

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

fn service_with(
    storage: Arc<dyn LogStorage>,
    coordination: &InMemoryCoordination,
    config: &LedgerServiceConfig,
) -> Arc<TransactionCoordinator> {
    TransactionCoordinator::from_config(
        storage,
        Arc::new(coordination.clone()),
        config,
        Arc::new(MockClock::new(today())),
    )
    .unwrap()
}

fn service(storage: Arc<dyn LogStorage>, coordination: &InMemoryCoordination) -> Arc<TransactionCoordinator> {
    service_with(storage, coordination, &LedgerServiceConfig::default())
}

fn transfer(account: Uuid, amount: u32) -> Transaction {
    Transaction::new(TransactionDetails {
        description: format!("transfer {amount}"),
        currency: "GBP".to_string(),
        amount: format!("{amount}.00"),
        debit_account_id: account,
        credit_account_id: Uuid::new_v4(),
    })
}

/// Route each transaction in turn, asserting every one completes
async fn route_all(coordinator: &TransactionCoordinator, account: Uuid, transactions: &[Transaction]) {
    for transaction in transactions {
        let response = coordinator
            .route_transaction(account, transaction.clone())
            .await
            .unwrap();
        assert_eq!(
            response.status(),
            CommitStatus::Completed,
            "{}",
            response.state.context
        );
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ids(transactions: &[Transaction]) -> Vec<Uuid> {
    transactions.iter().map(|t| t.transaction_id).collect()
}

// =============================================================================
// SECTION 1: OUTCOME TESTS
// =============================================================================

mod outcomes {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn routed_transaction_completes_with_entry_id() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();

        let response = coordinator
            .route_transaction(account, transfer(account, 10))
            .await
            .unwrap();

        assert_eq!(response.status(), CommitStatus::Completed);
        assert_eq!(response.entry_id, Some(0));
        assert_eq!(response.state.context, "Transaction successfully committed");
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn storage_outage_fails_submission() {
        let storage = InMemoryLogStorage::new();
        storage.set_available(false);
        let coordinator = service(Arc::new(storage), &InMemoryCoordination::new());
        let account = Uuid::new_v4();

        let response = coordinator
            .route_transaction(account, transfer(account, 10))
            .await
            .unwrap();

        assert_eq!(response.status(), CommitStatus::Failed);
        assert_eq!(response.entry_id, None);
        assert!(coordinator.list_transactions(account).await.unwrap().is_empty());
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submission_recovers_after_outage() {
        let storage = InMemoryLogStorage::new();
        storage.set_available(false);
        let coordinator = service(Arc::new(storage.clone()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();

        let failed = coordinator
            .route_transaction(account, transfer(account, 1))
            .await
            .unwrap();
        assert_eq!(failed.status(), CommitStatus::Failed);

        storage.set_available(true);
        let retried = transfer(account, 1);
        route_all(&coordinator, account, std::slice::from_ref(&retried)).await;
        assert_eq!(coordinator.list_transactions(account).await.unwrap(), vec![retried]);
        coordinator.shutdown().await;
    }
}

// =============================================================================
// SECTION 2: VALIDATION TESTS
// =============================================================================

mod validation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn transaction_for_other_account_is_rejected() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();

        let error = coordinator
            .route_transaction(account, transfer(Uuid::new_v4(), 5))
            .await
            .unwrap_err();

        assert_eq!(error.invalid_submission(), Some(InvalidSubmission::WrongAccount));
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn credit_party_may_submit() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let mut incoming = transfer(Uuid::new_v4(), 5);
        incoming.details.credit_account_id = account;

        route_all(&coordinator, account, &[incoming]).await;
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_transaction_is_rejected() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let transaction = transfer(account, 5);
        route_all(&coordinator, account, std::slice::from_ref(&transaction)).await;

        let error = coordinator
            .route_transaction(account, transaction)
            .await
            .unwrap_err();

        assert_eq!(error.invalid_submission(), Some(InvalidSubmission::AlreadySubmitted));
        assert_eq!(coordinator.list_transactions(account).await.unwrap().len(), 1);
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn nil_transaction_id_is_rejected() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let mut transaction = transfer(account, 5);
        transaction.transaction_id = Uuid::nil();

        let error = coordinator
            .route_transaction(account, transaction)
            .await
            .unwrap_err();

        assert_eq!(error.invalid_submission(), Some(InvalidSubmission::NilTransactionId));
        coordinator.shutdown().await;
    }
}

// =============================================================================
// SECTION 3: ORDERING TESTS
// =============================================================================

mod ordering {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn commits_follow_submission_order() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let submitted: Vec<_> = (1..=10).map(|n| transfer(account, n)).collect();

        route_all(&coordinator, account, &submitted).await;

        let listed = coordinator.list_transactions(account).await.unwrap();
        assert_eq!(ids(&listed), ids(&submitted));
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reader_reproduces_commits_after_eviction() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let submitted: Vec<_> = (1..=5).map(|n| transfer(account, n)).collect();
        route_all(&coordinator, account, &submitted).await;

        assert!(coordinator.evict(account).await);
        assert!(coordinator.handler(account).is_none());

        // served by a one-shot replay of the stream
        let replayed = coordinator.list_transactions(account).await.unwrap();
        assert_eq!(replayed, submitted);
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_account_has_empty_history() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        assert!(coordinator
            .list_transactions(Uuid::new_v4())
            .await
            .unwrap()
            .is_empty());
    }
}

// =============================================================================
// SECTION 4: HANDOVER TESTS
// =============================================================================

mod handover {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn killed_leader_keeps_order_with_resilience_three() {
        init_tracing();
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let submitted: Vec<_> = (1..=10).map(|n| transfer(account, n)).collect();

        route_all(&coordinator, account, &submitted[..5]).await;

        let handler = coordinator.handler(account).unwrap();
        let killed = handler.leader().unwrap().clone();
        killed.stop();

        route_all(&coordinator, account, &submitted[5..]).await;

        let new_leader = handler.leader().unwrap();
        assert_ne!(new_leader.participant(), killed.participant());
        assert_eq!(ids(&coordinator.list_transactions(account).await.unwrap()), ids(&submitted));

        // and the durable stream agrees
        coordinator.evict(account).await;
        assert_eq!(ids(&coordinator.list_transactions(account).await.unwrap()), ids(&submitted));
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submissions_survive_leader_kill() {
        init_tracing();
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let submitted: Vec<_> = (1..=10).map(|n| transfer(account, n)).collect();

        route_all(&coordinator, account, &submitted[..5]).await;
        let handler = coordinator.handler(account).unwrap();

        let mut submissions = JoinSet::new();
        for transaction in submitted[5..].iter().cloned() {
            let coordinator = coordinator.clone();
            submissions.spawn(async move {
                coordinator
                    .route_transaction(account, transaction)
                    .await
                    .unwrap()
            });
        }
        // the leader takes one submission before it is killed
        tokio::task::yield_now().await;
        let killed = handler.leader().unwrap().clone();
        killed.stop();

        while let Some(joined) = submissions.join_next().await {
            let response = joined.unwrap();
            assert_eq!(
                response.status(),
                CommitStatus::Completed,
                "{}",
                response.state.context
            );
        }

        let indexed = ids(&handler.commits());
        assert_eq!(indexed.len(), 10);
        assert_eq!(&indexed[..5], &ids(&submitted[..5])[..]);
        assert!(ids(&submitted).iter().all(|id| indexed.contains(id)));
        assert_ne!(handler.leader().unwrap().participant(), killed.participant());

        coordinator.evict(account).await;
        assert_eq!(ids(&coordinator.list_transactions(account).await.unwrap()), indexed);
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stepped_down_leader_rejoins_pool() {
        let coordinator = service(Arc::new(InMemoryLogStorage::new()), &InMemoryCoordination::new());
        let account = Uuid::new_v4();
        let submitted: Vec<_> = (1..=4).map(|n| transfer(account, n)).collect();

        route_all(&coordinator, account, &submitted[..2]).await;
        let handler = coordinator.handler(account).unwrap();
        handler.leader().unwrap().step_down();

        route_all(&coordinator, account, &submitted[2..]).await;
        assert_eq!(ids(&coordinator.list_transactions(account).await.unwrap()), ids(&submitted));
        assert_eq!(handler.committers().len(), 3);
        coordinator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn second_process_takes_over_stream() {
        init_tracing();
        let storage: Arc<dyn LogStorage> = Arc::new(InMemoryLogStorage::new());
        let coordination = InMemoryCoordination::new();
        let account = Uuid::new_v4();
        let submitted: Vec<_> = (1..=4).map(|n| transfer(account, n)).collect();

        let first = service(storage.clone(), &coordination);
        route_all(&first, account, &submitted[..3]).await;
        first.shutdown().await;

        let second = service(storage, &coordination);
        route_all(&second, account, &submitted[3..]).await;

        // the new leader replayed its predecessor's commits into the index
        assert_eq!(ids(&second.list_transactions(account).await.unwrap()), ids(&submitted));
        second.shutdown().await;
    }
}

// =============================================================================
// SECTION 5: DURABLE STORAGE TESTS
// =============================================================================

mod durable {
    use super::*;

    #[tokio::test]
    async fn history_survives_storage_restart() {
        let dir = tempfile::tempdir().unwrap();
        let coordination = InMemoryCoordination::new();
        let config = LedgerServiceConfig::from_json(
            r#"{"timings": {"poll_interval_ms": 20}, "transaction_log": {"await_timeout_ms": 50}}"#,
        )
        .unwrap();
        let account = Uuid::new_v4();
        let submitted: Vec<_> = (1..=3).map(|n| transfer(account, n)).collect();

        {
            let storage = FileLogStorage::open(dir.path()).await.unwrap();
            let coordinator = service_with(Arc::new(storage), &coordination, &config);
            route_all(&coordinator, account, &submitted).await;
            coordinator.shutdown().await;
        }

        let storage = FileLogStorage::open(dir.path()).await.unwrap();
        let coordinator = service_with(Arc::new(storage), &coordination, &config);
        assert_eq!(coordinator.list_transactions(account).await.unwrap(), submitted);
        coordinator.shutdown().await;
    }
}
