//! Login State Repositories
//!
//! `take_by_state` is the exclusivity point for callbacks: it removes and returns the
//! record in one step, so two callbacks racing on one token cannot both get it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mongodb::{bson::doc, Collection, Database};

use crate::shared::error::Result;
use crate::state::entity::AuthState;

pub const STATES_COLLECTION: &str = "sso_states";

#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn insert(&self, state: &AuthState) -> Result<()>;

    async fn find_by_state(&self, token: &str) -> Result<Option<AuthState>>;

    async fn delete_by_id(&self, id: &str) -> Result<bool>;

    /// Atomically remove and return the record for `token`.
    async fn take_by_state(&self, token: &str) -> Result<Option<AuthState>>;

    /// Remove every record that expired before `now`; returns how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// MongoDB repository backed by the `sso_states` collection
pub struct MongoStateRepository {
    collection: Collection<AuthState>,
}

impl MongoStateRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(STATES_COLLECTION),
        }
    }
}

#[async_trait]
impl StateRepository for MongoStateRepository {
    async fn insert(&self, state: &AuthState) -> Result<()> {
        self.collection.insert_one(state).await?;
        Ok(())
    }

    async fn find_by_state(&self, token: &str) -> Result<Option<AuthState>> {
        Ok(self.collection.find_one(doc! { "state": token }).await?)
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn take_by_state(&self, token: &str) -> Result<Option<AuthState>> {
        Ok(self
            .collection
            .find_one_and_delete(doc! { "state": token })
            .await?)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let now = mongodb::bson::DateTime::from_chrono(now);
        let result = self
            .collection
            .delete_many(doc! { "expiresAt": { "$lte": now } })
            .await?;
        Ok(result.deleted_count)
    }
}

/// In-process repository keyed by state token
#[derive(Default)]
pub struct InMemoryStateRepository {
    states: DashMap<String, AuthState>,
}

impl InMemoryStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl StateRepository for InMemoryStateRepository {
    async fn insert(&self, state: &AuthState) -> Result<()> {
        self.states.insert(state.state.clone(), state.clone());
        Ok(())
    }

    async fn find_by_state(&self, token: &str) -> Result<Option<AuthState>> {
        Ok(self.states.get(token).map(|s| s.value().clone()))
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let before = self.states.len();
        self.states.retain(|_, s| s.id != id);
        Ok(self.states.len() < before)
    }

    async fn take_by_state(&self, token: &str) -> Result<Option<AuthState>> {
        Ok(self.states.remove(token).map(|(_, state)| state))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.states.len();
        self.states.retain(|_, s| !s.is_expired_at(now));
        Ok(before.saturating_sub(self.states.len()) as u64)
    }
}
