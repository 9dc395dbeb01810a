//! SSO Connection Repositories

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use futures::TryStreamExt;
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    Collection, Database,
};

use crate::connection::entity::SsoConnection;
use crate::shared::error::{Result, SsoError};

pub const CONNECTIONS_COLLECTION: &str = "sso_connections";

const DUPLICATE_KEY_CODE: i32 = 11000;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Insert a new connection. Fails with `Duplicate` when the domain is taken.
    async fn insert(&self, connection: &SsoConnection) -> Result<()>;

    async fn find_by_id(&self, id: &str) -> Result<Option<SsoConnection>>;

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<SsoConnection>>;

    /// Lookup by normalized domain
    async fn find_by_domain(&self, domain: &str) -> Result<Option<SsoConnection>>;

    async fn find_by_organization(&self, organization_id: &str) -> Result<Vec<SsoConnection>>;

    /// Replace a stored connection. Fails with `Duplicate` when a changed domain is taken.
    async fn update(&self, connection: &SsoConnection) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;
}

fn domain_taken(domain: &str) -> SsoError {
    SsoError::duplicate("SsoConnection", "domain", domain)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE
    )
}

/// MongoDB repository backed by the `sso_connections` collection
pub struct MongoConnectionRepository {
    collection: Collection<SsoConnection>,
}

impl MongoConnectionRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(CONNECTIONS_COLLECTION),
        }
    }
}

#[async_trait]
impl ConnectionRepository for MongoConnectionRepository {
    async fn insert(&self, connection: &SsoConnection) -> Result<()> {
        match self.collection.insert_one(connection).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(domain_taken(&connection.domain)),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SsoConnection>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<SsoConnection>> {
        Ok(self.collection.find_one(doc! { "uuid": uuid }).await?)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<SsoConnection>> {
        Ok(self.collection.find_one(doc! { "domain": domain }).await?)
    }

    async fn find_by_organization(&self, organization_id: &str) -> Result<Vec<SsoConnection>> {
        let cursor = self
            .collection
            .find(doc! { "organizationId": organization_id })
            .sort(doc! { "createdAt": 1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update(&self, connection: &SsoConnection) -> Result<()> {
        match self
            .collection
            .replace_one(doc! { "_id": &connection.id }, connection)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(domain_taken(&connection.domain)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }
}

/// In-process repository. A domain index map gives the same uniqueness guarantee as
/// the MongoDB unique index.
#[derive(Default)]
pub struct InMemoryConnectionRepository {
    connections: DashMap<String, SsoConnection>,
    domains: DashMap<String, String>,
}

impl InMemoryConnectionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[async_trait]
impl ConnectionRepository for InMemoryConnectionRepository {
    async fn insert(&self, connection: &SsoConnection) -> Result<()> {
        match self.domains.entry(connection.domain.clone()) {
            Entry::Occupied(_) => Err(domain_taken(&connection.domain)),
            Entry::Vacant(slot) => {
                slot.insert(connection.id.clone());
                self.connections
                    .insert(connection.id.clone(), connection.clone());
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<SsoConnection>> {
        Ok(self.connections.get(id).map(|c| c.value().clone()))
    }

    async fn find_by_uuid(&self, uuid: &str) -> Result<Option<SsoConnection>> {
        Ok(self
            .connections
            .iter()
            .find(|c| c.value().uuid == uuid)
            .map(|c| c.value().clone()))
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Option<SsoConnection>> {
        let Some(id) = self.domains.get(domain).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        self.find_by_id(&id).await
    }

    async fn find_by_organization(&self, organization_id: &str) -> Result<Vec<SsoConnection>> {
        let mut found: Vec<SsoConnection> = self
            .connections
            .iter()
            .filter(|c| c.value().organization_id == organization_id)
            .map(|c| c.value().clone())
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn update(&self, connection: &SsoConnection) -> Result<()> {
        let previous_domain = match self.connections.get(&connection.id) {
            Some(existing) => existing.domain.clone(),
            None => return Ok(()),
        };

        if previous_domain != connection.domain {
            match self.domains.entry(connection.domain.clone()) {
                Entry::Occupied(_) => return Err(domain_taken(&connection.domain)),
                Entry::Vacant(slot) => {
                    slot.insert(connection.id.clone());
                }
            }
            self.domains.remove(&previous_domain);
        }

        self.connections
            .insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match self.connections.remove(id) {
            Some((_, removed)) => {
                self.domains.remove(&removed.domain);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::entity::{OidcConfig, ProtocolConfig};

    fn connection(org: &str, domain: &str) -> SsoConnection {
        SsoConnection::new(
            org,
            "test",
            domain,
            ProtocolConfig::Oidc(OidcConfig::default()),
            "https://sso.example.com",
        )
    }

    #[tokio::test]
    async fn test_domain_is_unique_across_organizations() {
        let repo = InMemoryConnectionRepository::new();
        repo.insert(&connection("org-a", "acme.com")).await.unwrap();

        let err = repo.insert(&connection("org-b", "acme.com")).await.unwrap_err();
        assert!(matches!(err, SsoError::Duplicate { .. }));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_update_moves_domain_index() {
        let repo = InMemoryConnectionRepository::new();
        let mut conn = connection("org-a", "acme.com");
        repo.insert(&conn).await.unwrap();
        repo.insert(&connection("org-b", "globex.com")).await.unwrap();

        conn.domain = "globex.com".to_string();
        assert!(matches!(repo.update(&conn).await, Err(SsoError::Duplicate { .. })));

        conn.domain = "acme.io".to_string();
        repo.update(&conn).await.unwrap();
        assert!(repo.find_by_domain("acme.com").await.unwrap().is_none());
        assert_eq!(repo.find_by_domain("acme.io").await.unwrap().unwrap().id, conn.id);

        // the released domain can be claimed again
        repo.insert(&connection("org-c", "acme.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_releases_domain() {
        let repo = InMemoryConnectionRepository::new();
        let conn = connection("org-a", "acme.com");
        repo.insert(&conn).await.unwrap();

        assert!(repo.delete(&conn.id).await.unwrap());
        assert!(!repo.delete(&conn.id).await.unwrap());
        assert!(repo.is_empty());
        repo.insert(&connection("org-b", "acme.com")).await.unwrap();
    }

    #[tokio::test]
    async fn test_find_by_organization_and_uuid() {
        let repo = InMemoryConnectionRepository::new();
        let a = connection("org-a", "a.com");
        repo.insert(&a).await.unwrap();
        repo.insert(&connection("org-a", "b.com")).await.unwrap();
        repo.insert(&connection("org-b", "c.com")).await.unwrap();

        assert_eq!(repo.find_by_organization("org-a").await.unwrap().len(), 2);
        assert_eq!(repo.find_by_uuid(&a.uuid).await.unwrap().unwrap().id, a.id);
    }
}
