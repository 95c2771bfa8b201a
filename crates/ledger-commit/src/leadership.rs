//! # leadership
//!
//! why: at most one committer per account may extend the chain and accept commits
//! relations: campaigns through ledger_core::Coordination, polled by committer.rs and reader.rs
//! what: LeadershipFlag, a background campaign publishing leadership through a watch channel

use ledger_core::{Coordination, LeaderLease};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Participation in one election group.
///
/// The campaign re-joins the group every time leadership is lost or
/// relinquished, until the flag is closed.
pub struct LeadershipFlag {
    participant: Uuid,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: watch::Sender<bool>,
    lease: Mutex<Option<Arc<LeaderLease>>>,
}

impl LeadershipFlag {
    /// Join `group` and start campaigning in the background
    pub fn start(coordination: Arc<dyn Coordination>, group: String, participant: Uuid) -> Self {
        let (state, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state,
            lease: Mutex::new(None),
        });
        let shutdown = CancellationToken::new();

        let span = tracing::info_span!("election", %group, %participant);
        let task = tokio::spawn(
            campaign(
                coordination,
                group,
                participant,
                shared.clone(),
                shutdown.clone(),
            )
            .instrument(span),
        );

        Self {
            participant,
            shared,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn participant(&self) -> Uuid {
        self.participant
    }

    /// Non-blocking poll of the current leadership state
    pub fn is_leader(&self) -> bool {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every leadership change
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shared.state.subscribe()
    }

    /// Give up leadership if held. The campaign re-joins the group afterwards.
    pub fn relinquish(&self) {
        let lease = self.shared.lease.lock().take();
        if let Some(lease) = lease {
            info!(participant = %self.participant, "relinquishing leadership");
            self.shared.state.send_replace(false);
            lease.relinquish();
        }
    }

    /// Relinquish and leave the election group for good
    pub fn close(&self) {
        self.relinquish();
        self.shutdown.cancel();
    }

    /// Close and wait for the campaign to wind down
    pub async fn shutdown(&self) {
        self.close();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for LeadershipFlag {
    fn drop(&mut self) {
        self.close();
    }
}

async fn campaign(
    coordination: Arc<dyn Coordination>,
    group: String,
    participant: Uuid,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    loop {
        let acquired = tokio::select! {
            _ = shutdown.cancelled() => break,
            acquired = coordination.acquire_leadership(&group, participant) => acquired,
        };

        match acquired {
            Ok(lease) => {
                let lease = Arc::new(lease);
                *shared.lease.lock() = Some(lease.clone());
                info!("becoming leader");
                shared.state.send_replace(true);

                tokio::select! {
                    _ = lease.revoked() => {}
                    _ = shutdown.cancelled() => lease.relinquish(),
                }

                shared.state.send_replace(false);
                shared.lease.lock().take();
                info!("leadership ended");
            }
            Err(e) => {
                warn!(error = %e, "election attempt failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
            }
        }
    }

    shared.state.send_replace(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_storage::InMemoryCoordination;

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn single_candidate_becomes_leader() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let flag = LeadershipFlag::start(coordination.clone(), "g".into(), Uuid::new_v4());

        eventually(|| flag.is_leader()).await;
        assert_eq!(coordination.leader_of("g"), Some(flag.participant()));
        flag.shutdown().await;
        assert!(!flag.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn relinquish_hands_leadership_to_competitor() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let first = LeadershipFlag::start(coordination.clone(), "g".into(), Uuid::new_v4());
        eventually(|| first.is_leader()).await;

        let second = LeadershipFlag::start(coordination.clone(), "g".into(), Uuid::new_v4());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_leader());

        first.close();
        eventually(|| second.is_leader()).await;
        assert!(!first.is_leader());
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_leader_rejoins_election() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let flag = LeadershipFlag::start(coordination.clone(), "g".into(), Uuid::new_v4());
        eventually(|| flag.is_leader()).await;

        let mut changes = flag.watch();
        coordination.revoke_leadership("g");
        changes.changed().await.unwrap();

        // sole candidate wins again after re-joining
        eventually(|| flag.is_leader()).await;
    }
}
