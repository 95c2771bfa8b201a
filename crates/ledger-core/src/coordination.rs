//! # coordination
//!
//! why: chains and leadership are shared across processes through a coordination service
//! relations: implemented by ledger-storage, used by ledger-commit's ChainStore and LeadershipFlag
//! what: Stat (node version), Coordination trait, LeaderLease revocable lease

use crate::error::CoordinationError;
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Metadata of a coordination node, used for conditional writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub version: i32,
}

/// Client of the coordination service
#[async_trait]
pub trait Coordination: Send + Sync {
    /// Read a node and its current stat
    async fn get(&self, path: &str) -> Result<(Bytes, Stat), CoordinationError>;

    /// Create a node (and any missing parents). Fails if it already exists.
    async fn create(&self, path: &str, data: Bytes) -> Result<Stat, CoordinationError>;

    /// Overwrite a node only if its version still equals `version`
    async fn set_data(
        &self,
        path: &str,
        version: i32,
        data: Bytes,
    ) -> Result<Stat, CoordinationError>;

    /// Join `group` and wait until `participant` wins leadership.
    ///
    /// Dropping the returned future withdraws the candidacy.
    async fn acquire_leadership(
        &self,
        group: &str,
        participant: Uuid,
    ) -> Result<LeaderLease, CoordinationError>;
}

/// Exclusive leadership of an election group.
///
/// The lease ends when the holder relinquishes it, when it is dropped, or
/// when the coordination service revokes it. Both sides share the token.
#[derive(Debug)]
pub struct LeaderLease {
    group: String,
    participant: Uuid,
    token: CancellationToken,
}

impl LeaderLease {
    pub fn new(group: impl Into<String>, participant: Uuid, token: CancellationToken) -> Self {
        Self {
            group: group.into(),
            participant,
            token,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn participant(&self) -> Uuid {
        self.participant
    }

    pub fn is_revoked(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the lease has ended for any reason
    pub async fn revoked(&self) {
        self.token.cancelled().await
    }

    /// Give leadership up so another participant can win
    pub fn relinquish(&self) {
        self.token.cancel();
    }
}

impl Drop for LeaderLease {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
