//! # model
//!
//! why: the log stores opaque records, the service reasons about transactions and commit outcomes
//! relations: payload of ledger-commit's engine, returned by log.rs and coordinator.rs
//! what: Transaction, TransactionDetails, CommitState/CommitStatus, LedgerCommitResponse

use ledger_core::EntryId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A double-entry transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub details: TransactionDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_state: Option<CommitState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub description: String,
    pub currency: String,
    /// decimal amount as a string, never a float
    pub amount: String,
    pub debit_account_id: Uuid,
    pub credit_account_id: Uuid,
}

impl Transaction {
    /// New transaction with a random id and no commit state
    pub fn new(details: TransactionDetails) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            details,
            commit_state: None,
        }
    }

    /// True if `account` is the debit or the credit party
    pub fn involves(&self, account: Uuid) -> bool {
        self.details.debit_account_id == account || self.details.credit_account_id == account
    }
}

/// Outcome of a commit as seen by the submitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommitStatus {
    /// appended to the log
    Completed,
    /// definitely not appended
    Failed,
    /// may or may not have been appended; reconcile by reading the log
    Unknown,
}

impl fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitState {
    pub status: CommitStatus,
    pub context: String,
}

impl CommitState {
    pub fn new(status: CommitStatus, context: impl Into<String>) -> Self {
        Self {
            status,
            context: context.into(),
        }
    }

    pub fn completed(context: impl Into<String>) -> Self {
        Self::new(CommitStatus::Completed, context)
    }

    pub fn failed(context: impl Into<String>) -> Self {
        Self::new(CommitStatus::Failed, context)
    }

    pub fn unknown(context: impl Into<String>) -> Self {
        Self::new(CommitStatus::Unknown, context)
    }
}

/// Answer to a routed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCommitResponse {
    /// entry id within the leader's segment, known only once completed
    pub entry_id: Option<EntryId>,
    pub state: CommitState,
}

impl LedgerCommitResponse {
    pub fn status(&self) -> CommitStatus {
        self.state.status
    }
}
