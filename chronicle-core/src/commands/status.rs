//! List schema files with their migration state.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ChronicleConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::migration::{
    MigrationDirection, MigrationListNode, MigrationListStatus, MigrationRunner, MigratorOptions,
};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub connection: String,
    pub files: Vec<MigrationListNode>,
}

impl StatusReport {
    pub fn count(&self, status: MigrationListStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

/// Execute the status command.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
) -> Result<StatusReport> {
    let runner = MigrationRunner::new(
        manager.clone(),
        config.app_root.clone(),
        config.in_production(),
        MigratorOptions {
            direction: MigrationDirection::Up,
            connection_name: connection.to_string(),
            dry_run: false,
        },
    )?;
    let files = runner.get_list().await?;

    let report = StatusReport {
        connection: connection.to_string(),
        files,
    };
    log::info!(
        "Status listed; connection={}, migrated={}, pending={}, corrupt={}",
        connection,
        report.count(MigrationListStatus::Migrated),
        report.count(MigrationListStatus::Pending),
        report.count(MigrationListStatus::Corrupt)
    );
    Ok(report)
}
