//! # error
//!
//! why: submitters must tell their own mistakes from cancellation; storage errors never reach them
//! relations: raised by log.rs, wrapped by coordinator.rs
//! what: InvalidSubmission, TransactionLogError, CoordinatorError

use ledger_core::ConfigError;
use thiserror::Error;

/// Why a submission was rejected before reaching a committer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidSubmission {
    #[error("transaction id cannot be nil")]
    NilTransactionId,

    #[error("transaction submitted for incorrect account")]
    WrongAccount,

    #[error("transaction has already been submitted")]
    AlreadySubmitted,
}

#[derive(Debug, Error)]
pub enum TransactionLogError {
    #[error("invalid submission: {0}")]
    InvalidSubmission(#[from] InvalidSubmission),

    #[error("submission interrupted")]
    Interrupted,
}

impl TransactionLogError {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::InvalidSubmission(_))
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Log(#[from] TransactionLogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("coordinator is shut down")]
    ShutDown,
}

impl CoordinatorError {
    /// The rejected submission, if this is a caller mistake
    pub fn invalid_submission(&self) -> Option<InvalidSubmission> {
        match self {
            Self::Log(TransactionLogError::InvalidSubmission(reason)) => Some(*reason),
            _ => None,
        }
    }
}
