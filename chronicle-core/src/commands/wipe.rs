//! Drop every table of the connection's database.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;

use super::truncate::list_tables;
use crate::connection::ConnectionManager;
use crate::db::{on_cluster, quote_ident};
use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct WipeReport {
    pub connection: String,
    pub database: String,
    pub tables: Vec<String>,
}

/// Execute the wipe command. The schema tables are dropped as well.
pub async fn execute(manager: &Arc<ConnectionManager>, connection: &str) -> Result<WipeReport> {
    let client = manager.client(connection)?;
    let tables = list_tables(&client).await?;

    let cluster = on_cluster(client.config());
    let results = join_all(tables.iter().map(|table| {
        let drop = client
            .command(format!("DROP TABLE {}{}", quote_ident(table), cluster))
            .setting("database_atomic_wait_for_drop_and_detach_synchronously", 1);
        async move { drop.execute().await }
    }))
    .await;
    for result in results {
        result?;
    }

    log::info!("Dropped tables; connection={}, tables={}", connection, tables.len());
    Ok(WipeReport {
        connection: connection.to_string(),
        database: client.config().database.clone(),
        tables,
    })
}
