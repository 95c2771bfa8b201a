//! # coordination
//!
//! why: versioned nodes and leader election without an external coordination ensemble
//! relations: implements ledger_core::Coordination for tests and single-process deployments
//! what: InMemoryCoordination with conditional writes, election groups and fault injection

use async_trait::async_trait;
use bytes::Bytes;
use ledger_core::{Coordination, CoordinationError, LeaderLease, Stat};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// in-memory coordination service
///
/// cloning shares nodes and election groups
#[derive(Clone, Default)]
pub struct InMemoryCoordination {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: Mutex<HashMap<String, Node>>,
    groups: Mutex<HashMap<String, Arc<ElectionGroup>>>,
    unavailable: AtomicBool,
}

struct Node {
    data: Bytes,
    version: i32,
}

#[derive(Default)]
struct ElectionGroup {
    holder: Mutex<Option<Holder>>,
    changed: Notify,
}

#[derive(Clone)]
struct Holder {
    participant: Uuid,
    token: CancellationToken,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// simulate losing (or regaining) the coordination ensemble
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// current leader of a group, if any
    pub fn leader_of(&self, group: &str) -> Option<Uuid> {
        let group = self.inner.groups.lock().get(group).cloned()?;
        let holder = group.holder.lock();
        holder
            .as_ref()
            .filter(|h| !h.token.is_cancelled())
            .map(|h| h.participant)
    }

    /// revoke the current lease of a group, as a session expiry would
    pub fn revoke_leadership(&self, group: &str) {
        let group = self.inner.groups.lock().get(group).cloned();
        if let Some(group) = group {
            if let Some(holder) = group.holder.lock().as_ref() {
                debug!(participant = %holder.participant, "revoking leadership");
                holder.token.cancel();
            }
            group.changed.notify_waiters();
        }
    }

    fn check_available(&self) -> Result<(), CoordinationError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(CoordinationError::Unavailable(
                "in-memory coordination marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn group(&self, name: &str) -> Arc<ElectionGroup> {
        self.inner
            .groups
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl Coordination for InMemoryCoordination {
    async fn get(&self, path: &str) -> Result<(Bytes, Stat), CoordinationError> {
        self.check_available()?;
        let nodes = self.inner.nodes.lock();
        let node = nodes.get(path).ok_or_else(|| CoordinationError::NotFound {
            path: path.to_string(),
        })?;
        Ok((
            node.data.clone(),
            Stat {
                version: node.version,
            },
        ))
    }

    async fn create(&self, path: &str, data: Bytes) -> Result<Stat, CoordinationError> {
        self.check_available()?;
        let mut nodes = self.inner.nodes.lock();
        if nodes.contains_key(path) {
            return Err(CoordinationError::AlreadyExists {
                path: path.to_string(),
            });
        }
        nodes.insert(path.to_string(), Node { data, version: 0 });
        Ok(Stat { version: 0 })
    }

    async fn set_data(
        &self,
        path: &str,
        version: i32,
        data: Bytes,
    ) -> Result<Stat, CoordinationError> {
        self.check_available()?;
        let mut nodes = self.inner.nodes.lock();
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NotFound {
                path: path.to_string(),
            })?;
        if node.version != version {
            return Err(CoordinationError::VersionConflict {
                path: path.to_string(),
                expected: version,
                actual: node.version,
            });
        }
        node.data = data;
        node.version += 1;
        Ok(Stat {
            version: node.version,
        })
    }

    async fn acquire_leadership(
        &self,
        group: &str,
        participant: Uuid,
    ) -> Result<LeaderLease, CoordinationError> {
        let election = self.group(group);

        loop {
            self.check_available()?;

            let notified = election.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = {
                let mut holder = election.holder.lock();
                let vacant = holder.as_ref().map_or(true, |h| h.token.is_cancelled());
                if vacant {
                    let token = CancellationToken::new();
                    *holder = Some(Holder {
                        participant,
                        token: token.clone(),
                    });
                    debug!(group, %participant, "leadership granted");
                    return Ok(LeaderLease::new(group, participant, token));
                }
                holder.as_ref().map(|h| h.token.clone()).unwrap_or_default()
            };

            // wait for the holder to let go, or for an explicit change
            tokio::select! {
                _ = current.cancelled() => {}
                _ = &mut notified => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn create_then_conditional_update() {
        let coordination = InMemoryCoordination::new();

        let stat = coordination
            .create("a/b", Bytes::from_static(b"1"))
            .await
            .unwrap();
        let stat = coordination
            .set_data("a/b", stat.version, Bytes::from_static(b"2"))
            .await
            .unwrap();

        let (data, current) = coordination.get("a/b").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"2"));
        assert_eq!(current, stat);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let coordination = InMemoryCoordination::new();
        coordination.create("p", Bytes::new()).await.unwrap();
        coordination.set_data("p", 0, Bytes::new()).await.unwrap();

        let result = coordination.set_data("p", 0, Bytes::new()).await;
        assert!(matches!(
            result,
            Err(CoordinationError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn second_create_fails() {
        let coordination = InMemoryCoordination::new();
        coordination.create("p", Bytes::new()).await.unwrap();
        assert!(matches!(
            coordination.create("p", Bytes::new()).await,
            Err(CoordinationError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let coordination = InMemoryCoordination::new();
        assert!(matches!(
            coordination.get("nothing").await,
            Err(CoordinationError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn leadership_passes_on_relinquish() {
        let coordination = InMemoryCoordination::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let lease = coordination.acquire_leadership("g", first).await.unwrap();
        assert_eq!(coordination.leader_of("g"), Some(first));

        let waiting = {
            let coordination = coordination.clone();
            tokio::spawn(async move { coordination.acquire_leadership("g", second).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        lease.relinquish();
        let next = waiting.await.unwrap().unwrap();
        assert_eq!(next.participant(), second);
        assert_eq!(coordination.leader_of("g"), Some(second));
    }

    #[tokio::test]
    async fn revoked_lease_is_observed_by_holder() {
        let coordination = InMemoryCoordination::new();
        let lease = coordination
            .acquire_leadership("g", Uuid::new_v4())
            .await
            .unwrap();

        coordination.revoke_leadership("g");
        lease.revoked().await;
        assert!(lease.is_revoked());
        assert_eq!(coordination.leader_of("g"), None);
    }
}
