//! # chain_store
//!
//! why: the chain is the only cross-process mutable state and is guarded by its node version
//! relations: wraps ledger_core::Coordination, used by reader.rs (load) and committer.rs (extend)
//! what: ChainStore with load / load_versioned / create / update, VersionedChain

use ledger_core::{Coordination, CoordinationError, SegmentChain, Stat, StreamPath};
use std::sync::Arc;
use tracing::debug;

/// A chain together with the node version it was read at.
///
/// `stat` is `None` when the chain has never been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedChain {
    pub chain: SegmentChain,
    pub stat: Option<Stat>,
}

/// Persists the segment chain of one stream
#[derive(Clone)]
pub struct ChainStore {
    coordination: Arc<dyn Coordination>,
    path: String,
}

impl ChainStore {
    pub fn new(coordination: Arc<dyn Coordination>, stream: &StreamPath) -> Self {
        Self::at_path(coordination, stream.chain_path())
    }

    pub fn at_path(coordination: Arc<dyn Coordination>, path: impl Into<String>) -> Self {
        Self {
            coordination,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Current chain. A stream that was never initialised has an empty chain.
    pub async fn load(&self) -> Result<SegmentChain, CoordinationError> {
        Ok(self.load_versioned().await?.chain)
    }

    /// Current chain with the version to guard the next update
    pub async fn load_versioned(&self) -> Result<VersionedChain, CoordinationError> {
        match self.coordination.get(&self.path).await {
            Ok((bytes, stat)) => Ok(VersionedChain {
                chain: SegmentChain::from_bytes(&self.path, &bytes)?,
                stat: Some(stat),
            }),
            Err(CoordinationError::NotFound { .. }) => {
                debug!(path = %self.path, "no chain yet, awaiting initialisation by a leader");
                Ok(VersionedChain {
                    chain: SegmentChain::new(),
                    stat: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// First write of the chain. Fails with `AlreadyExists` if another leader got there first.
    pub async fn create(&self, chain: &SegmentChain) -> Result<Stat, CoordinationError> {
        self.coordination.create(&self.path, chain.to_bytes()).await
    }

    /// Conditional write. Fails with `VersionConflict` if the chain moved since `stat` was read.
    pub async fn update(&self, stat: Stat, chain: &SegmentChain) -> Result<Stat, CoordinationError> {
        self.coordination
            .set_data(&self.path, stat.version, chain.to_bytes())
            .await
    }

    /// Persist `chain` with `create` or `update` depending on how it was loaded
    pub async fn persist(
        &self,
        loaded: Option<Stat>,
        chain: &SegmentChain,
    ) -> Result<Stat, CoordinationError> {
        match loaded {
            None => self.create(chain).await,
            Some(stat) => self.update(stat, chain).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_storage::InMemoryCoordination;

    fn store(coordination: &InMemoryCoordination) -> ChainStore {
        ChainStore::at_path(Arc::new(coordination.clone()), "ledgers-collection/a/2024-01-01")
    }

    #[tokio::test]
    async fn missing_chain_loads_as_empty() {
        let store = store(&InMemoryCoordination::new());
        let loaded = store.load_versioned().await.unwrap();

        assert!(loaded.chain.is_empty());
        assert_eq!(loaded.stat, None);
    }

    #[tokio::test]
    async fn persist_creates_then_updates() {
        let store = store(&InMemoryCoordination::new());

        let mut chain: SegmentChain = [4].into_iter().collect();
        store.persist(None, &chain).await.unwrap();

        let loaded = store.load_versioned().await.unwrap();
        chain.append(9);
        store.persist(loaded.stat, &chain).await.unwrap();

        assert_eq!(store.load().await.unwrap(), chain);
        let updated = store.load_versioned().await.unwrap();
        assert_eq!(updated.stat.map(|stat| stat.version), Some(1));
    }

    #[tokio::test]
    async fn racing_updates_conflict() {
        let store = store(&InMemoryCoordination::new());
        store.create(&[1].into_iter().collect()).await.unwrap();

        let first = store.load_versioned().await.unwrap();
        let second = store.load_versioned().await.unwrap();

        store
            .update(first.stat.unwrap(), &[1, 2].into_iter().collect())
            .await
            .unwrap();
        let lost = store
            .update(second.stat.unwrap(), &[1, 3].into_iter().collect())
            .await;

        assert!(matches!(lost, Err(CoordinationError::VersionConflict { .. })));
        assert_eq!(store.load().await.unwrap().iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn racing_creates_conflict() {
        let store = store(&InMemoryCoordination::new());
        store.create(&[1].into_iter().collect()).await.unwrap();

        let lost = store.create(&[2].into_iter().collect()).await;
        assert!(matches!(lost, Err(CoordinationError::AlreadyExists { .. })));
    }
}
