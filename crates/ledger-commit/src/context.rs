//! # context
//!
//! why: interleaved logs of competing participants are only readable with role and id attached
//! relations: entered by committer.rs and reader.rs, extended by ledger-transaction
//! what: tracing span constructors for the ledger participant context

use tracing::{info_span, Span};
use uuid::Uuid;

pub const LEADER: &str = "leader";
pub const FOLLOWER: &str = "follower";
pub const READER: &str = "reader";

pub fn role(leader: bool) -> &'static str {
    if leader {
        LEADER
    } else {
        FOLLOWER
    }
}

/// Span for one pass of a committer's run loop
pub fn ledger_span(leader: bool, participant: Uuid) -> Span {
    info_span!("ledger", role = role(leader), participant = %participant)
}

/// Span for a standalone reader that never competes for leadership
pub fn reader_span(participant: Uuid) -> Span {
    info_span!("ledger", role = READER, participant = %participant)
}
