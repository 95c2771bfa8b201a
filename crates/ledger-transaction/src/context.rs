//! # context
//!
//! why: every log line of a submission should name the account and transaction it belongs to
//! relations: entered by log.rs, committer.rs and coordinator.rs on top of ledger-commit's spans
//! what: account and transaction span constructors

use tracing::{info_span, Span};
use uuid::Uuid;

pub fn account_span(account_id: Uuid) -> Span {
    info_span!("account", account = %account_id)
}

pub fn transaction_span(account_id: Uuid, transaction_id: Uuid) -> Span {
    info_span!("transaction", account = %account_id, transaction = %transaction_id)
}
