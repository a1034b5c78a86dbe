//! Connection lifecycle management and schema migrations for ClickHouse.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use chronicle_core::config::{ChronicleConfig, CliOverrides};
//! use chronicle_core::Chronicle;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ChronicleConfig::load(None, &CliOverrides::default())?;
//! let chronicle = Chronicle::new(config);
//! let report = chronicle.migrate(false, &[]).await?;
//! println!("Applied {} schema files", report.files.len());
//! chronicle.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`]: Configuration loading (TOML, env vars, CLI overrides)
//! - [`connection`]: Named connections and their manager
//! - [`client`] / [`http`]: Database client seam and the HTTP interface client
//! - [`method`]: Instrumented query/insert/command/exec/ping builders
//! - [`events`]: Event emitter and query pretty printer
//! - [`source`]: Schema and seeder file discovery
//! - [`script`] / [`directive`] / [`sql_parser`] / [`placeholder`]: Script parsing
//! - [`history`]: Schema table operations
//! - [`migration`] / [`seeds`]: Runners
//! - [`commands`]: Individual command implementations
//! - [`db`]: Identifier quoting and DDL clauses
//! - [`error`]: Error types

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod directive;
pub mod error;
pub mod events;
pub mod history;
pub mod http;
pub mod method;
pub mod migration;
pub mod placeholder;
pub mod script;
pub mod seeds;
pub mod source;
pub mod sql_parser;

use std::sync::Arc;

use client::ClientFactory;
use config::ChronicleConfig;
use connection::ConnectionManager;
use error::Result;
use events::{Emitter, QueryPrinter};
use method::MethodClient;
use migration::{MigrationRunner, MigratorHook, MigratorOptions};
use seeds::SeedsRunner;

pub use commands::check::HealthReport;
pub use commands::make::MakeReport;
pub use commands::migrate::MigrationReport;
pub use commands::refresh::RefreshReport;
pub use commands::seed::SeedReport;
pub use commands::status::StatusReport;
pub use commands::truncate::TruncateReport;
pub use commands::wipe::WipeReport;
pub use config::CliOverrides;
pub use error::ChronicleError;

/// Main entry point for the library.
///
/// Registers every configured connection with a [`ConnectionManager`].
/// Nothing connects until a command or [`Chronicle::connection`] needs it.
/// Commands run against the primary connection (`config.connection`).
pub struct Chronicle {
    pub config: ChronicleConfig,
    manager: Arc<ConnectionManager>,
    emitter: Arc<Emitter>,
}

impl Chronicle {
    /// Create an instance talking to ClickHouse over HTTP.
    pub fn new(config: ChronicleConfig) -> Self {
        Self::with_factory(config, Arc::new(http::HttpClientFactory))
    }

    /// Create an instance with a custom client factory.
    pub fn with_factory(config: ChronicleConfig, factory: Arc<dyn ClientFactory>) -> Self {
        let emitter = Arc::new(Emitter::new());
        if config.pretty_print_debug_queries {
            for name in QueryPrinter::EVENTS {
                emitter.on(name, QueryPrinter);
            }
        }

        let manager = Arc::new(ConnectionManager::new(emitter.clone(), factory));
        for (name, connection) in &config.connections {
            manager.add(name, connection.clone());
        }

        Self {
            config,
            manager,
            emitter,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.emitter
    }

    /// Name of the connection commands run against.
    pub fn primary_connection_name(&self) -> &str {
        &self.config.connection
    }

    /// Connect `name` if needed and return a method client for it.
    pub fn connection(&self, name: &str) -> Result<MethodClient> {
        self.manager.client(name)
    }

    /// Build a migration runner. The caller drives it and closes it.
    pub fn migrator(&self, options: MigratorOptions) -> Result<MigrationRunner> {
        MigrationRunner::new(
            self.manager.clone(),
            self.config.app_root.clone(),
            self.config.in_production(),
            options,
        )
    }

    /// Build a seeds runner for `connection`.
    pub fn seeder(&self, connection: &str) -> Result<SeedsRunner> {
        Ok(SeedsRunner::new(
            self.manager.client(connection)?,
            self.config.app_root.clone(),
            &self.config.environment,
        ))
    }

    /// Apply pending schema files.
    pub async fn migrate(
        &self,
        dry_run: bool,
        hooks: &[Arc<dyn MigratorHook>],
    ) -> Result<MigrationReport> {
        commands::migrate::execute(&self.manager, &self.config, &self.config.connection, dry_run, hooks)
            .await
    }

    /// Roll back applied schema files.
    pub async fn rollback(
        &self,
        batch: Option<u32>,
        step: Option<i64>,
        dry_run: bool,
        hooks: &[Arc<dyn MigratorHook>],
    ) -> Result<MigrationReport> {
        commands::rollback::execute(
            &self.manager,
            &self.config,
            &self.config.connection,
            batch,
            step,
            dry_run,
            hooks,
        )
        .await
    }

    /// List schema files with their state.
    pub async fn status(&self) -> Result<StatusReport> {
        commands::status::execute(&self.manager, &self.config, &self.config.connection).await
    }

    /// Roll back every batch.
    pub async fn reset(
        &self,
        dry_run: bool,
        hooks: &[Arc<dyn MigratorHook>],
    ) -> Result<MigrationReport> {
        commands::reset::execute(&self.manager, &self.config, &self.config.connection, dry_run, hooks)
            .await
    }

    /// Reset, migrate, and optionally seed.
    pub async fn refresh(
        &self,
        seed: bool,
        hooks: &[Arc<dyn MigratorHook>],
    ) -> Result<RefreshReport> {
        commands::refresh::execute(&self.manager, &self.config, &self.config.connection, seed, hooks)
            .await
    }

    /// Drop every table, migrate, and optionally seed.
    pub async fn fresh(
        &self,
        seed: bool,
        hooks: &[Arc<dyn MigratorHook>],
    ) -> Result<RefreshReport> {
        commands::fresh::execute(&self.manager, &self.config, &self.config.connection, seed, hooks)
            .await
    }

    /// Run every seeder, or only `files` when given.
    pub async fn seed(&self, files: Option<&[String]>) -> Result<SeedReport> {
        commands::seed::execute(&self.manager, &self.config, &self.config.connection, files).await
    }

    /// Empty every table except the schema tables.
    pub async fn truncate(&self) -> Result<TruncateReport> {
        commands::truncate::execute(&self.manager, &self.config.connection).await
    }

    /// Drop every table.
    pub async fn wipe(&self) -> Result<WipeReport> {
        commands::wipe::execute(&self.manager, &self.config.connection).await
    }

    /// Ping the primary connection.
    pub async fn check(&self) -> Result<HealthReport> {
        commands::check::execute(&self.manager, &self.config.connection).await
    }

    /// Create a schema file (no DB required).
    pub fn make_migration(&self, name: &str, folder: Option<&str>) -> Result<MakeReport> {
        commands::make::execute_migration(&self.config, &self.config.connection, name, folder)
    }

    /// Create a seeder file (no DB required).
    pub fn make_seeder(&self, name: &str, folder: Option<&str>) -> Result<MakeReport> {
        commands::make::execute_seeder(&self.config, &self.config.connection, name, folder)
    }

    /// Close and release every connection, waiting for drains.
    pub async fn close(&self) {
        self.manager.close_all(true).await
    }
}
