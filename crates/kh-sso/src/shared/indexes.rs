//! MongoDB Index Initialization
//!
//! Creates the indexes the SSO collections rely on. The unique `domain` index is the
//! backstop for cross-organization domain isolation; the `expiresAt` TTL index lets
//! MongoDB sweep abandoned login attempts.

use mongodb::{bson::doc, options::IndexOptions, Database, IndexModel};
use std::time::Duration;
use tracing::info;

use crate::connection::repository::CONNECTIONS_COLLECTION;
use crate::state::repository::STATES_COLLECTION;

/// Initialize all SSO indexes
pub async fn initialize_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    info!("Initializing MongoDB indexes...");

    create_connection_indexes(db).await?;
    create_state_indexes(db).await?;

    info!("MongoDB indexes initialized successfully");
    Ok(())
}

async fn create_connection_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let connections = db.collection::<mongodb::bson::Document>(CONNECTIONS_COLLECTION);

    // One connection per email domain across all organizations
    connections
        .create_index(
            IndexModel::builder()
                .keys(doc! { "domain": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;

    connections
        .create_index(
            IndexModel::builder()
                .keys(doc! { "uuid": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;

    connections
        .create_index(
            IndexModel::builder()
                .keys(doc! { "organizationId": 1, "createdAt": 1 })
                .build(),
        )
        .await?;

    info!("Created indexes on {}", CONNECTIONS_COLLECTION);
    Ok(())
}

async fn create_state_indexes(db: &Database) -> Result<(), mongodb::error::Error> {
    let states = db.collection::<mongodb::bson::Document>(STATES_COLLECTION);

    states
        .create_index(
            IndexModel::builder()
                .keys(doc! { "state": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build(),
        )
        .await?;

    // Documents are removed once expiresAt has passed
    states
        .create_index(
            IndexModel::builder()
                .keys(doc! { "expiresAt": 1 })
                .options(
                    IndexOptions::builder()
                        .expire_after(Duration::from_secs(0))
                        .build(),
                )
                .build(),
        )
        .await?;

    info!("Created indexes on {}", STATES_COLLECTION);
    Ok(())
}
