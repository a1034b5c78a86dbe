//! Roll back every applied schema file.

use std::sync::Arc;

use super::migrate::MigrationReport;
use crate::config::ChronicleConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::migration::MigratorHook;

/// Execute the reset command: a rollback down to batch 0.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    dry_run: bool,
    hooks: &[Arc<dyn MigratorHook>],
) -> Result<MigrationReport> {
    super::rollback::execute(manager, config, connection, Some(0), None, dry_run, hooks).await
}
