// Utility for tests that run against a live MongoDB deployment
use std::time::Duration;

use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    Client, Database,
};
use uuid::Uuid;

use crate::conf::{AppConfig, DatabaseConfig};
use crate::utils::db::build_client;

pub const TEST_CONFIG_FILE: &str = "tests/config.test.yaml";

/// Database settings from the test config, pointed at a fresh database
/// name so tests never share state.
pub fn test_database_config() -> Result<DatabaseConfig, Box<dyn std::error::Error>> {
    let mut database = AppConfig::from_path(TEST_CONFIG_FILE)?.database;
    database.name = format!("octofit_test_{}", Uuid::new_v4().simple());
    Ok(database)
}

/// A client and database handle for inspecting what the initializer did.
pub async fn test_db(
    config: &DatabaseConfig,
) -> Result<(Client, Database), Box<dyn std::error::Error>> {
    let client = build_client(config).await?;
    let db = client.database(&config.name);
    Ok((client, db))
}

pub async fn drop_test_database(config: &DatabaseConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (client, db) = test_db(config).await?;
    db.drop().await?;
    client.shutdown().await;
    Ok(())
}

/// Sorted collection names of `db`.
pub async fn collection_names(db: &Database) -> Result<Vec<String>, mongodb::error::Error> {
    let mut names = db.list_collection_names().await?;
    names.sort();
    Ok(names)
}

/// Index specifications of `collection`, as returned by the server.
pub async fn index_specs(
    db: &Database,
    collection: &str,
) -> Result<Vec<Document>, mongodb::error::Error> {
    let cursor = db
        .collection::<Document>(collection)
        .list_indexes()
        .await?;
    let indexes = cursor.try_collect::<Vec<_>>().await?;
    Ok(indexes
        .into_iter()
        .map(|index| {
            let mut spec = index.keys;
            if let Some(options) = index.options {
                spec.insert("name", options.name.unwrap_or_default());
                spec.insert("unique", options.unique.unwrap_or(false));
            }
            spec
        })
        .collect())
}

/// Number of open connections reported by `serverStatus`, across all
/// clients of the server.
pub async fn open_connections(client: &Client) -> Result<i64, Box<dyn std::error::Error>> {
    let status = client
        .database("admin")
        .run_command(doc! { "serverStatus": 1 })
        .await?;
    match status.get_document("connections")?.get("current") {
        Some(Bson::Int32(current)) => Ok(i64::from(*current)),
        Some(Bson::Int64(current)) => Ok(*current),
        other => Err(format!("unexpected connections.current: {:?}", other).into()),
    }
}

/// Poll `serverStatus` until at most `expected` connections are open or
/// `timeout` elapses, returning the last count seen.
pub async fn wait_for_open_connections(
    client: &Client,
    expected: i64,
    timeout: Duration,
) -> Result<i64, Box<dyn std::error::Error>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = open_connections(client).await?;
        if current <= expected || tokio::time::Instant::now() >= deadline {
            return Ok(current);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
