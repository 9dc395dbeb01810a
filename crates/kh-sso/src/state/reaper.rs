//! Background removal of abandoned login states.
//!
//! Correctness never depends on this task: expiry is checked on every read. It only
//! keeps the store from accumulating attempts that never came back.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::state::store::StateStore;

pub struct StateReaper {
    store: Arc<StateStore>,
    period: Duration,
}

impl StateReaper {
    pub fn new(store: Arc<StateStore>, period: Duration) -> Self {
        Self { store, period }
    }

    /// Run until the task is aborted.
    pub async fn run(&self) {
        info!("Starting login state reaper (interval: {:?})", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.reap_once().await;
        }
    }

    /// Delete expired states once; returns how many were removed.
    pub async fn reap_once(&self) -> u64 {
        match self.store.delete_expired().await {
            Ok(0) => {
                debug!("No expired login states");
                0
            }
            Ok(count) => {
                info!(count, "Removed expired login states");
                count
            }
            Err(e) => {
                error!(error = %e, "Failed to remove expired login states");
                0
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::entity::{ProtocolConfig, SamlConfig, SsoConnection};
    use crate::state::repository::InMemoryStateRepository;
    use chrono::Utc;

    #[tokio::test]
    async fn test_reap_once_removes_only_expired() {
        let repo = Arc::new(InMemoryStateRepository::new());
        let store = Arc::new(StateStore::new(repo.clone()));
        let conn = SsoConnection::new(
            "org-1",
            "Acme",
            "acme.com",
            ProtocolConfig::Saml(SamlConfig::default()),
            "https://sso.example.com",
        );

        let live = store.new_state(&conn, "/");
        let mut stale = store.new_state(&conn, "/");
        stale.expires_at = Utc::now() - chrono::Duration::minutes(11);
        store.create(&live).await.unwrap();
        store.create(&stale).await.unwrap();

        let reaper = StateReaper::new(store, Duration::from_secs(300));
        assert_eq!(reaper.reap_once().await, 1);
        assert_eq!(reaper.reap_once().await, 0);
        assert_eq!(repo.len(), 1);
    }
}
