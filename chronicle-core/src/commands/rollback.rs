//! Roll back applied schema files.

use std::sync::Arc;

use super::migrate::{run_migrator, MigrationReport};
use crate::config::ChronicleConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::migration::{MigrationDirection, MigratorHook};

/// Execute the rollback command.
///
/// Without `batch` only the latest batch is reverted. A positive `step`
/// reverts at most that many files of the latest batch.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    batch: Option<u32>,
    step: Option<i64>,
    dry_run: bool,
    hooks: &[Arc<dyn MigratorHook>],
) -> Result<MigrationReport> {
    let report = run_migrator(
        manager,
        config,
        connection,
        MigrationDirection::Down { batch, step },
        dry_run,
        hooks,
    )
    .await?;

    match &report.failure {
        None => log::info!(
            "Rollback completed; connection={}, status={}, files={}",
            connection,
            report.status,
            report.files.len()
        ),
        Some(e) => log::error!("Rollback failed; connection={}, error={}", connection, e),
    }
    Ok(report)
}
