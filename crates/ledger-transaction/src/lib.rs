//! # ledger-transaction
//!
//! why: durably and totally order each account's financial transactions with a redundant writer pool
//! relations: specialises ledger-commit for transactions, consumed by the request-facing layer
//! what: transaction model, rendezvous log, committer pool per account, coordinator, configuration

pub mod clock;
pub mod committer;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod log;
pub mod model;

pub use clock::{Clock, MockClock, SystemClock};
pub use committer::{TransactionCommitter, TransactionReader};
pub use config::{CoordinatorConfig, LedgerServiceConfig, TransactionLogConfig};
pub use coordinator::{AccountLogHandler, TransactionCoordinator};
pub use error::{CoordinatorError, InvalidSubmission, TransactionLogError};
pub use factory::CommitterFactory;
pub use log::{CommitIndex, TransactionLog};
pub use model::{CommitState, CommitStatus, LedgerCommitResponse, Transaction, TransactionDetails};
