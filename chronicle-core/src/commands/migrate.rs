//! Apply pending schema files.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ChronicleConfig;
use crate::connection::ConnectionManager;
use crate::error::{ChronicleError, Result};
use crate::migration::{
    MigratedFileNode, MigrationDirection, MigrationRunner, MigratorHook, MigratorOptions,
    MigratorStatus,
};

/// Report returned after an up or down run.
#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub connection: String,
    /// `"up"` or `"down"`.
    pub direction: &'static str,
    pub dry_run: bool,
    pub status: MigratorStatus,
    /// Files attempted, in execution order.
    pub files: Vec<MigratedFileNode>,
    /// Files selected but never attempted because an earlier one failed.
    pub not_attempted: Vec<String>,
    pub error: Option<String>,
    /// The error that halted the run.
    #[serde(skip)]
    pub failure: Option<ChronicleError>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Build a runner, execute it, and turn its final state into a report.
pub(crate) async fn run_migrator(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    direction: MigrationDirection,
    dry_run: bool,
    hooks: &[Arc<dyn MigratorHook>],
) -> Result<MigrationReport> {
    let mut runner = MigrationRunner::new(
        manager.clone(),
        config.app_root.clone(),
        config.in_production(),
        MigratorOptions {
            direction,
            connection_name: connection.to_string(),
            dry_run,
        },
    )?;
    for hook in hooks {
        runner.add_hook(hook.clone());
    }

    runner.run().await;

    let status = runner.status();
    let not_attempted = runner
        .not_attempted()
        .into_iter()
        .map(str::to_string)
        .collect();
    let failure = runner.take_error();

    Ok(MigrationReport {
        connection: connection.to_string(),
        direction: match direction {
            MigrationDirection::Up => "up",
            MigrationDirection::Down { .. } => "down",
        },
        dry_run,
        status,
        files: runner.migrated_files().to_vec(),
        not_attempted,
        error: failure.as_ref().map(|e| e.to_string()),
        failure,
    })
}

/// Execute the migrate command.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    dry_run: bool,
    hooks: &[Arc<dyn MigratorHook>],
) -> Result<MigrationReport> {
    let report = run_migrator(
        manager,
        config,
        connection,
        MigrationDirection::Up,
        dry_run,
        hooks,
    )
    .await?;

    match &report.failure {
        None => log::info!(
            "Migrate completed; connection={}, status={}, files={}",
            connection,
            report.status,
            report.files.len()
        ),
        Some(e) => log::error!("Migrate failed; connection={}, error={}", connection, e),
    }
    Ok(report)
}
