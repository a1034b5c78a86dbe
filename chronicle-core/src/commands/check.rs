//! Health check for one connection.

use std::sync::Arc;

use serde::Serialize;

use crate::connection::ConnectionManager;
use crate::error::Result;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub connection: String,
    pub url: String,
    pub database: String,
    pub cluster: Option<String>,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Execute the check command. An unreachable server is reported, not raised.
pub async fn execute(manager: &Arc<ConnectionManager>, connection: &str) -> Result<HealthReport> {
    let client = manager.client(connection)?;
    let ping = client.ping().execute().await;

    let config = client.config();
    if ping.success {
        log::info!("Health check passed; connection={}, url={}", connection, config.url);
    } else {
        log::warn!(
            "Health check failed; connection={}, url={}, error={}",
            connection,
            config.url,
            ping.error.as_deref().unwrap_or("unknown")
        );
    }

    Ok(HealthReport {
        connection: connection.to_string(),
        url: config.url.clone(),
        database: config.database.clone(),
        cluster: config.cluster_name.clone(),
        healthy: ping.success,
        error: ping.error,
    })
}
