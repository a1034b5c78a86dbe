//! Rebuild the schema from an empty database: wipe, migrate, then optionally seed.

use std::sync::Arc;

use super::refresh::RefreshReport;
use crate::config::ChronicleConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::migration::MigratorHook;

/// Execute the fresh command: drop every table, migrate, and seed when `seed` is set.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    seed: bool,
    hooks: &[Arc<dyn MigratorHook>],
) -> Result<RefreshReport> {
    let wipe = super::wipe::execute(manager, connection).await?;
    let mut report = RefreshReport {
        connection: connection.to_string(),
        reset: None,
        wipe: Some(wipe),
        migrate: None,
        seed: None,
    };

    super::refresh::migrate_and_seed(manager, config, connection, seed, hooks, &mut report).await?;
    log::info!("Fresh finished; connection={}, success={}", connection, report.is_success());
    Ok(report)
}
