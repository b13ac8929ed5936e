//! One-shot provisioning of the octofit database schema.
//!
//! [`DatabaseInitializer::run`] connects, makes sure the fixed set of
//! collections and the unique `users.email` index exist, logs the outcome
//! and always shuts the client down before returning.
use std::fmt;

use mongodb::{
    bson::{doc, Document},
    Client, Collection, Database,
};
use tracing::{info, instrument};

use crate::{
    conf::DatabaseConfig,
    log_error,
    utils::{
        db::{
            build_client, create_index, ensure_collection, ping, CollectionStatus, ConnectError,
            CreateCollectionError, CreateIndexError,
        },
        o11y::ERROR,
    },
};

pub const USERS_COLLECTION: &str = "users";
pub const TEAMS_COLLECTION: &str = "teams";
pub const ACTIVITY_COLLECTION: &str = "activity";
pub const LEADERBOARD_COLLECTION: &str = "leaderboard";
pub const WORKOUTS_COLLECTION: &str = "workouts";

/// Collections created by the initializer, in creation order.
pub const COLLECTIONS: [&str; 5] = [
    USERS_COLLECTION,
    TEAMS_COLLECTION,
    ACTIVITY_COLLECTION,
    LEADERBOARD_COLLECTION,
    WORKOUTS_COLLECTION,
];

/// Field of `users` carrying the ascending unique index.
pub const EMAIL_FIELD: &str = "email";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    Disconnected,
    Connected,
    SchemaEnsured,
    Closed,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStage::Disconnected => "disconnected",
            InitStage::Connected => "connected",
            InitStage::SchemaEnsured => "schema_ensured",
            InitStage::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("could not connect to the database service")]
    Connection(#[from] ConnectError),
    #[error("could not create collection '{collection}'")]
    Schema {
        collection: &'static str,
        #[source]
        source: CreateCollectionError,
    },
    #[error("could not create unique index on '{collection}.{field}'")]
    Index {
        collection: &'static str,
        field: &'static str,
        #[source]
        source: CreateIndexError,
    },
}

impl InitError {
    /// The last stage reached before the failure.
    pub fn stage(&self) -> InitStage {
        match self {
            InitError::Connection(_) => InitStage::Disconnected,
            InitError::Schema { .. } | InitError::Index { .. } => InitStage::Connected,
        }
    }
}

pub struct DatabaseInitializer {
    config: DatabaseConfig,
}

impl DatabaseInitializer {
    pub fn new(config: DatabaseConfig) -> Self {
        DatabaseInitializer { config }
    }

    /// Provision the schema and release the connection.
    ///
    /// The outcome is logged here; the returned error is only for the
    /// caller to decide on an exit status.
    #[instrument(skip(self), fields(database = %self.config.name))]
    pub async fn run(&self) -> Result<(), InitError> {
        let result = match build_client(&self.config).await {
            Ok(client) => {
                let result = self.provision(&client).await;
                client.shutdown().await;
                info!(stage = %InitStage::Closed, "connection released");
                result
            }
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(()) => info!("Database initialized successfully."),
            Err(error) => {
                log_error!(ERROR, *error, stage = %error.stage(), "Error initializing database")
            }
        }
        result
    }

    async fn provision(&self, client: &Client) -> Result<(), InitError> {
        ping(client, &self.config).await?;
        info!(stage = %InitStage::Connected, "connected to database service");

        let db = client.database(&self.config.name);
        ensure_schema(&db).await?;
        info!(stage = %InitStage::SchemaEnsured, "schema ensured");
        Ok(())
    }
}

/// Create the fixed collections and the unique email index on `db`.
///
/// Collections that already exist are left alone. A failing index build
/// does not undo the collections created before it.
#[instrument(skip(db), fields(database = db.name()), level = "debug")]
pub async fn ensure_schema(db: &Database) -> Result<(), InitError> {
    let mut created = 0;
    for collection in COLLECTIONS {
        let status = ensure_collection(db, collection)
            .await
            .map_err(|source| InitError::Schema { collection, source })?;
        if status == CollectionStatus::Created {
            created += 1;
        }
    }
    info!(
        "{} collections present ({} newly created)",
        COLLECTIONS.len(),
        created
    );

    let users: Collection<Document> = db.collection(USERS_COLLECTION);
    create_index(&users, doc! { EMAIL_FIELD: 1 }, true)
        .await
        .map_err(|source| InitError::Index {
            collection: USERS_COLLECTION,
            field: EMAIL_FIELD,
            source,
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(
            COLLECTIONS,
            ["users", "teams", "activity", "leaderboard", "workouts"]
        );
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(InitStage::Disconnected.to_string(), "disconnected");
        assert_eq!(InitStage::SchemaEnsured.to_string(), "schema_ensured");
        assert_eq!(InitStage::Closed.to_string(), "closed");
    }

    #[tokio::test]
    async fn test_invalid_uri_is_a_connection_error() {
        let initializer = DatabaseInitializer::new(DatabaseConfig {
            uri: "not-a-uri".to_string(),
            ..Default::default()
        });
        let err = initializer.run().await.unwrap_err();
        assert!(matches!(err, InitError::Connection(_)));
        assert_eq!(err.stage(), InitStage::Disconnected);
    }
}
