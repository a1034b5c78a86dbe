//! Empty every table of the connection's database.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionManager;
use crate::db::{on_cluster, quote_ident};
use crate::error::Result;
use crate::method::MethodClient;

#[derive(Debug, Serialize)]
pub struct TruncateReport {
    pub connection: String,
    pub database: String,
    pub tables: Vec<String>,
}

#[derive(Deserialize)]
struct TableName {
    name: String,
}

/// Tables of the connection's database, sorted.
pub(crate) async fn list_tables(client: &MethodClient) -> Result<Vec<String>> {
    let rows: Vec<TableName> = client
        .query("SELECT name FROM system.tables WHERE database = {database:String} ORDER BY name")
        .param("database", client.config().database.clone())
        .rows()
        .await?;
    Ok(rows.into_iter().map(|r| r.name).collect())
}

/// Execute the truncate command. The schema tables are kept intact.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    connection: &str,
) -> Result<TruncateReport> {
    let client = manager.client(connection)?;
    let migrations = &client.config().migrations;
    let keep = [migrations.table_name.clone(), migrations.versions_table_name()];

    let tables: Vec<String> = list_tables(&client)
        .await?
        .into_iter()
        .filter(|t| !keep.contains(t))
        .collect();

    let cluster = on_cluster(client.config());
    let results = join_all(tables.iter().map(|table| {
        let truncate = client.command(format!("TRUNCATE TABLE {}{}", quote_ident(table), cluster));
        async move { truncate.execute().await }
    }))
    .await;
    for result in results {
        result?;
    }

    log::info!(
        "Truncated tables; connection={}, tables={}",
        connection,
        tables.len()
    );
    Ok(TruncateReport {
        connection: connection.to_string(),
        database: client.config().database.clone(),
        tables,
    })
}
