//! Schema table operations (create, query, insert, delete).
//!
//! Both metadata tables live in the connection's own database. Table names,
//! the cluster clause and the engine all come from the connection config.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::client::deserialize_u64;
use crate::db::{metadata_engine, on_cluster, quote_ident};
use crate::error::Result;
use crate::method::MethodClient;

/// Format version of the metadata tables.
pub const SCHEMA_VERSION: u32 = 1;

/// Timestamp layout of `migration_time` in JSON output.
const MIGRATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A row from the schema table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaRow {
    #[serde(deserialize_with = "deserialize_u64")]
    pub id: u64,
    /// Name of the schema file.
    pub name: String,
    #[serde(deserialize_with = "deserialize_u64")]
    pub batch: u64,
    /// When the row was written, as the server formats `DateTime`.
    #[serde(default)]
    pub migration_time: String,
}

impl SchemaRow {
    pub fn applied_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.migration_time, MIGRATION_TIME_FORMAT).ok()
    }
}

#[derive(Deserialize)]
struct Count {
    #[serde(deserialize_with = "deserialize_u64")]
    result: u64,
}

#[derive(Deserialize)]
struct Version {
    #[serde(deserialize_with = "deserialize_u64")]
    version: u64,
}

#[derive(Deserialize)]
struct MaxBatch {
    #[serde(deserialize_with = "deserialize_u64")]
    batch: u64,
}

#[derive(Deserialize)]
struct MaxId {
    #[serde(deserialize_with = "deserialize_u64")]
    id: u64,
}

#[derive(Deserialize)]
struct Name {
    name: String,
}

fn schema_table(client: &MethodClient) -> String {
    client.config().migrations.table_name.clone()
}

fn versions_table(client: &MethodClient) -> String {
    client.config().migrations.versions_table_name()
}

/// Check whether a table exists in the connection's database.
pub async fn table_exists(client: &MethodClient, table: &str) -> Result<bool> {
    let rows: Vec<Count> = client
        .query(format!("EXISTS TABLE {}", quote_ident(table)))
        .rows()
        .await?;
    Ok(rows.first().map(|r| r.result == 1).unwrap_or(false))
}

/// Create the schema table if missing. Returns whether it was created.
pub async fn create_schema_table(client: &MethodClient) -> Result<bool> {
    let table = schema_table(client);
    if table_exists(client, &table).await? {
        return Ok(false);
    }

    let config = client.config();
    let sql = format!(
        "CREATE TABLE {}{} (\
id UInt32, \
name String, \
batch UInt32, \
migration_time DateTime DEFAULT now()\
) ENGINE = {} ORDER BY (migration_time)",
        quote_ident(&table),
        on_cluster(config),
        metadata_engine(config.migrations.replicated_merge_tree.as_ref()),
    );
    client.command(sql).execute().await?;

    log::info!("Created schema table; table={}, connection={}", table, client.connection_name());
    Ok(true)
}

/// Create the versions table if missing. Returns whether it was created.
pub async fn create_versions_table(client: &MethodClient) -> Result<bool> {
    let table = versions_table(client);
    if table_exists(client, &table).await? {
        return Ok(false);
    }

    let config = client.config();
    let sql = format!(
        "CREATE TABLE {}{} (version UInt32) ENGINE = {} ORDER BY (version)",
        quote_ident(&table),
        on_cluster(config),
        metadata_engine(config.migrations.replicated_merge_tree.as_ref()),
    );
    client.command(sql).execute().await?;

    log::info!("Created schema versions table; table={}, connection={}", table, client.connection_name());
    Ok(true)
}

/// Current metadata format version. An empty table is stamped with version 1.
pub async fn latest_version(client: &MethodClient) -> Result<u32> {
    let table = versions_table(client);
    let rows: Vec<Version> = client
        .query(format!("SELECT version FROM {} LIMIT 1", quote_ident(&table)))
        .rows()
        .await?;

    match rows.first() {
        Some(row) => Ok(row.version as u32),
        None => {
            client
                .insert(table)
                .values(vec![json!({ "version": 1 })])
                .execute()
                .await?;
            Ok(1)
        }
    }
}

/// Bring the metadata tables up to [`SCHEMA_VERSION`].
///
/// Version 1 is the first format, so no upgrade step exists yet.
pub async fn upgrade_tables(client: &MethodClient, from: u32) -> Result<()> {
    if from >= SCHEMA_VERSION {
        return Ok(());
    }
    log::info!(
        "Upgrading schema tables; connection={}, from={}, to={}",
        client.connection_name(),
        from,
        SCHEMA_VERSION
    );
    let table = versions_table(client);
    client
        .command(format!(
            "ALTER TABLE {}{} UPDATE version = {{version:UInt32}} WHERE 1",
            quote_ident(&table),
            on_cluster(client.config())
        ))
        .param("version", SCHEMA_VERSION)
        .setting("mutations_sync", 2)
        .execute()
        .await?;
    Ok(())
}

/// Highest batch number recorded, 0 when the table is empty.
pub async fn latest_batch(client: &MethodClient) -> Result<u32> {
    let rows: Vec<MaxBatch> = client
        .query(format!(
            "SELECT max(batch) as batch FROM {}",
            quote_ident(&schema_table(client))
        ))
        .rows()
        .await?;
    Ok(rows.first().map(|r| r.batch as u32).unwrap_or(0))
}

/// Highest row id, 0 when the table is empty.
pub async fn latest_id(client: &MethodClient) -> Result<u32> {
    let rows: Vec<MaxId> = client
        .query(format!(
            "SELECT max(id) as id FROM {}",
            quote_ident(&schema_table(client))
        ))
        .rows()
        .await?;
    Ok(rows.first().map(|r| r.id as u32).unwrap_or(0))
}

/// Names of every recorded schema file, oldest first.
pub async fn migrated_names(client: &MethodClient) -> Result<Vec<String>> {
    let rows: Vec<Name> = client
        .query(format!(
            "SELECT name FROM {} ORDER BY id",
            quote_ident(&schema_table(client))
        ))
        .rows()
        .await?;
    Ok(rows.into_iter().map(|r| r.name).collect())
}

/// Rows with a batch strictly greater than `batch`, newest first.
pub async fn rows_after_batch(client: &MethodClient, batch: i64) -> Result<Vec<SchemaRow>> {
    client
        .query(format!(
            "SELECT name, batch, migration_time, id FROM {} WHERE batch > {{batch:Int32}} ORDER BY id DESC",
            quote_ident(&schema_table(client))
        ))
        .param("batch", batch)
        .rows()
        .await
}

/// Record a schema file as applied in `batch`.
pub async fn record_migrated(client: &MethodClient, name: &str, batch: u32) -> Result<()> {
    let id = latest_id(client).await? + 1;
    client
        .insert(schema_table(client))
        .columns(&["id", "name", "batch"])
        .values(vec![json!({ "id": id, "name": name, "batch": batch })])
        .execute()
        .await?;
    Ok(())
}

/// Remove the row of a rolled back schema file.
pub async fn record_rollback(client: &MethodClient, name: &str) -> Result<()> {
    client
        .command(format!(
            "ALTER TABLE {}{} DELETE WHERE name = {{name:String}}",
            quote_ident(&schema_table(client)),
            on_cluster(client.config())
        ))
        .param("name", name)
        .setting("mutations_sync", 2)
        .execute()
        .await?;
    Ok(())
}
