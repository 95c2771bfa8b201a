//! # path
//!
//! why: every participant must agree on where a stream's chain and election group live
//! relations: used by ledger-commit's ChainStore and LeadershipFlag
//! what: StreamPath ({account}/{date}), chain and election group path formatting

use chrono::NaiveDate;
use std::fmt;
use uuid::Uuid;

const CHAIN_ROOT: &str = "ledgers-collection";
const ELECTION_ROOT: &str = "ledgers-elect";

/// One account-day stream, formatted as `{account}/{date}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamPath {
    pub account_id: Uuid,
    pub date: NaiveDate,
}

impl StreamPath {
    pub fn new(account_id: Uuid, date: NaiveDate) -> Self {
        Self { account_id, date }
    }

    /// Path of the chain node in the coordination service
    pub fn chain_path(&self) -> String {
        format!("{CHAIN_ROOT}/{self}")
    }

    /// Election group shared by every committer of the account
    pub fn election_group(&self) -> String {
        election_group(self.account_id)
    }

    /// Secret guarding the stream's segments
    pub fn secret(&self) -> Vec<u8> {
        self.account_id.to_string().into_bytes()
    }
}

impl fmt::Display for StreamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.date.format("%Y-%m-%d"))
    }
}

/// Election group path for an account, formatted as `ledgers-elect/{account}`
pub fn election_group(account_id: Uuid) -> String {
    format!("{ELECTION_ROOT}/{account_id}")
}
