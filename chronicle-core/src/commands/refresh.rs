//! Rebuild the schema: reset, migrate, then optionally seed.

use std::sync::Arc;

use serde::Serialize;

use super::migrate::MigrationReport;
use super::seed::SeedReport;
use super::wipe::WipeReport;
use crate::config::ChronicleConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::migration::MigratorHook;

/// Report of a refresh or fresh run. Later steps are `None` when an earlier
/// step failed.
#[derive(Debug, Serialize)]
pub struct RefreshReport {
    pub connection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<MigrationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wipe: Option<WipeReport>,
    pub migrate: Option<MigrationReport>,
    pub seed: Option<SeedReport>,
}

impl RefreshReport {
    pub fn is_success(&self) -> bool {
        self.reset.as_ref().map_or(true, |r| r.is_success())
            && self.migrate.as_ref().is_some_and(|m| m.is_success())
            && self.seed.as_ref().map_or(true, |s| s.failed() == 0)
    }
}

pub(crate) async fn migrate_and_seed(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    seed: bool,
    hooks: &[Arc<dyn MigratorHook>],
    report: &mut RefreshReport,
) -> Result<()> {
    let migrate = super::migrate::execute(manager, config, connection, false, hooks).await?;
    let migrated = migrate.is_success();
    report.migrate = Some(migrate);

    if seed && migrated {
        report.seed = Some(super::seed::execute(manager, config, connection, None).await?);
    }
    Ok(())
}

/// Execute the refresh command: reset, migrate, and seed when `seed` is set.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    seed: bool,
    hooks: &[Arc<dyn MigratorHook>],
) -> Result<RefreshReport> {
    let reset = super::reset::execute(manager, config, connection, false, hooks).await?;
    let reset_ok = reset.is_success();
    let mut report = RefreshReport {
        connection: connection.to_string(),
        reset: Some(reset),
        wipe: None,
        migrate: None,
        seed: None,
    };

    if reset_ok {
        migrate_and_seed(manager, config, connection, seed, hooks, &mut report).await?;
    }
    log::info!("Refresh finished; connection={}, success={}", connection, report.is_success());
    Ok(report)
}
