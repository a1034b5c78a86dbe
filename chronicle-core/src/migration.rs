//! Up/down execution of schema files with batch bookkeeping.
//!
//! A [`MigrationRunner`] is built for one connection and one direction. It
//! boots the metadata tables, works out which files to run, and executes
//! them in order. Failures never escape `run()`: the first one halts the run
//! and is kept on the runner, next to the per-file results.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::connection::ConnectionManager;
use crate::directive::Section;
use crate::error::{ChronicleError, Result};
use crate::history::{self, SchemaRow};
use crate::method::MethodClient;
use crate::placeholder::build_placeholders;
use crate::script::SchemaScript;
use crate::source::{FileNode, MigrationSource};

/// Which way to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDirection {
    Up,
    /// Roll back every batch above `batch` (default: the latest batch only).
    /// A positive `step` rolls back at most that many files of the latest batch.
    Down { batch: Option<u32>, step: Option<i64> },
}

impl MigrationDirection {
    fn section(&self) -> Section {
        match self {
            MigrationDirection::Up => Section::Up,
            MigrationDirection::Down { .. } => Section::Down,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MigratorOptions {
    pub direction: MigrationDirection,
    pub connection_name: String,
    /// Capture SQL instead of running it; the schema table is left untouched.
    pub dry_run: bool,
}

/// Overall state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigratorStatus {
    Pending,
    Completed,
    Skipped,
    Error,
}

impl std::fmt::Display for MigratorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigratorStatus::Pending => write!(f, "pending"),
            MigratorStatus::Completed => write!(f, "completed"),
            MigratorStatus::Skipped => write!(f, "skipped"),
            MigratorStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Completed,
    Error,
}

/// One file attempted during a run.
#[derive(Debug, Clone, Serialize)]
pub struct MigratedFileNode {
    pub name: String,
    pub status: FileStatus,
    #[serde(skip)]
    pub file: FileNode,
    pub batch: u32,
    /// Rendered statements, filled in dry-run only.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
}

/// Progress notifications, in emission order.
#[derive(Debug)]
pub enum MigratorEvent<'a> {
    Start(MigrationDirection),
    CreateSchemaTable,
    CreateSchemaVersionsTable,
    MigrationStart(&'a MigratedFileNode),
    MigrationCompleted(&'a MigratedFileNode),
    MigrationError(&'a MigratedFileNode, &'a ChronicleError),
    End,
}

/// Receives [`MigratorEvent`]s.
pub trait MigratorHook: Send + Sync {
    fn on_event(&self, event: &MigratorEvent<'_>);
}

impl<F> MigratorHook for F
where
    F: Fn(&MigratorEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &MigratorEvent<'_>) {
        self(event)
    }
}

/// Status of a file in [`MigrationRunner::get_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationListStatus {
    Pending,
    Migrated,
    /// Recorded in the schema table but no longer on disk.
    Corrupt,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationListNode {
    pub name: String,
    pub status: MigrationListStatus,
    pub batch: Option<u64>,
    pub migration_time: Option<String>,
}

/// Derive the run status from what the runner has seen.
fn status_of(booted: bool, failed: bool, migrated: usize) -> MigratorStatus {
    match (booted, failed) {
        (false, _) => MigratorStatus::Pending,
        (true, true) => MigratorStatus::Error,
        (true, false) if migrated == 0 => MigratorStatus::Skipped,
        (true, false) => MigratorStatus::Completed,
    }
}

/// Batch floor and row cap for a rollback.
///
/// A positive `step` always targets the latest batch and ignores `batch`.
fn rollback_target(latest: u32, batch: Option<u32>, step: Option<i64>) -> (i64, Option<usize>) {
    let previous = i64::from(latest) - 1;
    match step.filter(|s| *s > 0) {
        Some(step) => (previous, Some(step as usize)),
        None => (batch.map(i64::from).unwrap_or(previous), None),
    }
}

/// Runs schema files up or down against one connection.
pub struct MigrationRunner {
    client: MethodClient,
    manager: Arc<ConnectionManager>,
    source: MigrationSource,
    options: MigratorOptions,
    in_production: bool,
    placeholders: HashMap<String, String>,
    hooks: Vec<Arc<dyn MigratorHook>>,
    booted: bool,
    error: Option<ChronicleError>,
    migrated_files: Vec<MigratedFileNode>,
    planned: Vec<String>,
}

impl MigrationRunner {
    /// Connects `options.connection_name` through the manager.
    pub fn new(
        manager: Arc<ConnectionManager>,
        app_root: impl Into<PathBuf>,
        in_production: bool,
        options: MigratorOptions,
    ) -> Result<Self> {
        let client = manager.client(&options.connection_name)?;
        let source = MigrationSource::new(client.config(), app_root);
        let placeholders = build_placeholders(client.connection_name(), client.config());
        Ok(Self {
            client,
            manager,
            source,
            options,
            in_production,
            placeholders,
            hooks: Vec::new(),
            booted: false,
            error: None,
            migrated_files: Vec::new(),
            planned: Vec::new(),
        })
    }

    /// Register a progress hook.
    pub fn on(&mut self, hook: impl MigratorHook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    /// Register a hook shared with other runners.
    pub fn add_hook(&mut self, hook: Arc<dyn MigratorHook>) {
        self.hooks.push(hook);
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    pub fn status(&self) -> MigratorStatus {
        status_of(self.booted, self.error.is_some(), self.migrated_files.len())
    }

    /// The error that halted the run, if any.
    pub fn error(&self) -> Option<&ChronicleError> {
        self.error.as_ref()
    }

    /// Move the halting error out. [`status`](Self::status) no longer
    /// reports `Error` afterwards.
    pub fn take_error(&mut self) -> Option<ChronicleError> {
        self.error.take()
    }

    /// Files attempted in this run, in execution order.
    pub fn migrated_files(&self) -> &[MigratedFileNode] {
        &self.migrated_files
    }

    /// Files selected for this run that were never attempted.
    pub fn not_attempted(&self) -> Vec<&str> {
        let attempted: HashSet<&str> = self.migrated_files.iter().map(|f| f.name.as_str()).collect();
        self.planned
            .iter()
            .map(String::as_str)
            .filter(|name| !attempted.contains(name))
            .collect()
    }

    fn emit(&self, event: MigratorEvent<'_>) {
        for hook in &self.hooks {
            hook.on_event(&event);
        }
    }

    /// Execute the run. Outcome is read back through [`status`](Self::status)
    /// and [`error`](Self::error).
    pub async fn run(&mut self) {
        if self.booted {
            log::warn!(
                "Migration runner already used, ignoring run; connection={}",
                self.options.connection_name
            );
            return;
        }

        let name = self.options.connection_name.clone();
        self.manager.begin_migrating(&name);
        self.emit(MigratorEvent::Start(self.options.direction));

        let result = self.run_inner().await;

        if let Err(e) = result {
            log::error!("Migration run failed; connection={}, error={}", name, e);
            self.error = Some(e);
        }
        self.emit(MigratorEvent::End);
        self.manager.end_migrating(&name);

        log::info!(
            "Migration run finished; connection={}, status={}, files={}, dry_run={}",
            name,
            self.status(),
            self.migrated_files.len(),
            self.options.dry_run
        );
    }

    async fn run_inner(&mut self) -> Result<()> {
        self.boot().await?;
        match self.options.direction {
            MigrationDirection::Up => self.run_up().await,
            MigrationDirection::Down { batch, step } => self.run_down(batch, step).await,
        }
    }

    /// Make sure both metadata tables exist and are current.
    async fn boot(&mut self) -> Result<()> {
        self.booted = true;
        if history::create_schema_table(&self.client).await? {
            self.emit(MigratorEvent::CreateSchemaTable);
        }
        if history::create_versions_table(&self.client).await? {
            self.emit(MigratorEvent::CreateSchemaVersionsTable);
        }
        let version = history::latest_version(&self.client).await?;
        history::upgrade_tables(&self.client, version).await
    }

    async fn run_up(&mut self) -> Result<()> {
        let batch = history::latest_batch(&self.client).await? + 1;
        let existing: HashSet<String> = history::migrated_names(&self.client)
            .await?
            .into_iter()
            .collect();

        let pending: Vec<FileNode> = self
            .source
            .get_migrations()?
            .into_iter()
            .filter(|file| !existing.contains(&file.name))
            .collect();
        self.planned = pending.iter().map(|f| f.name.clone()).collect();

        log::debug!(
            "Migrating up; connection={}, batch={}, pending={}",
            self.client.connection_name(),
            batch,
            pending.len()
        );

        for file in pending {
            self.execute_file(file, batch).await?;
        }
        Ok(())
    }

    async fn run_down(&mut self, batch: Option<u32>, step: Option<i64>) -> Result<()> {
        if self.in_production && self.client.config().migrations.disable_rollbacks_in_production {
            return Err(ChronicleError::RollbackDisabled);
        }

        let latest = history::latest_batch(&self.client).await?;
        let (target, limit) = rollback_target(latest, batch, step);
        let rows: Vec<SchemaRow> = history::rows_after_batch(&self.client, target).await?;

        // Every fetched row must map to a file before anything is reverted,
        // including rows past the step cap.
        let discovered: HashMap<String, FileNode> = self
            .source
            .get_migrations()?
            .into_iter()
            .map(|file| (file.name.clone(), file))
            .collect();
        let mut plan = Vec::with_capacity(rows.len());
        for row in rows {
            let file = discovered
                .get(&row.name)
                .cloned()
                .ok_or_else(|| ChronicleError::MissingSchemaFile {
                    name: row.name.clone(),
                })?;
            plan.push((file, row.batch as u32));
        }
        if let Some(limit) = limit {
            plan.truncate(limit);
        }
        self.planned = plan.iter().map(|(f, _)| f.name.clone()).collect();

        log::debug!(
            "Rolling back; connection={}, target_batch={}, files={}",
            self.client.connection_name(),
            target,
            plan.len()
        );

        for (file, batch) in plan {
            self.execute_file(file, batch).await?;
        }
        Ok(())
    }

    async fn execute_file(&mut self, file: FileNode, batch: u32) -> Result<()> {
        self.migrated_files.push(MigratedFileNode {
            name: file.name.clone(),
            status: FileStatus::Pending,
            file,
            batch,
            queries: Vec::new(),
        });
        let index = self.migrated_files.len() - 1;
        self.emit(MigratorEvent::MigrationStart(&self.migrated_files[index]));

        let outcome = self.apply(&self.migrated_files[index].file, batch).await;

        match outcome {
            Ok(queries) => {
                let node = &mut self.migrated_files[index];
                node.status = FileStatus::Completed;
                if self.options.dry_run {
                    node.queries = queries;
                }
                log::info!(
                    "Schema file {}; script={}, batch={}",
                    if self.options.dry_run { "captured" } else { "applied" },
                    node.name,
                    batch
                );
                self.emit(MigratorEvent::MigrationCompleted(&self.migrated_files[index]));
                Ok(())
            }
            Err(e) => {
                self.migrated_files[index].status = FileStatus::Error;
                self.emit(MigratorEvent::MigrationError(&self.migrated_files[index], &e));
                Err(e)
            }
        }
    }

    /// Run one file's section and update the schema table.
    async fn apply(&self, file: &FileNode, batch: u32) -> Result<Vec<String>> {
        let content = file.load()?;
        let mut script = SchemaScript::parse(&file.name, &content)?;
        let section = self.options.direction.section();
        let queries = script
            .execute(section, &self.client, &self.placeholders, self.options.dry_run)
            .await?;

        if !self.options.dry_run {
            match section {
                Section::Up => history::record_migrated(&self.client, &file.name, batch).await?,
                Section::Down => history::record_rollback(&self.client, &file.name).await?,
            }
        }
        Ok(queries)
    }

    /// Every discovered and recorded file with its state.
    ///
    /// Discovered files come in discovery order; recorded rows with no file
    /// on disk follow as `Corrupt`.
    pub async fn get_list(&self) -> Result<Vec<MigrationListNode>> {
        history::create_schema_table(&self.client).await?;
        let rows = history::rows_after_batch(&self.client, 0).await?;
        let files = self.source.get_migrations()?;

        let by_name: HashMap<&str, &SchemaRow> = rows.iter().map(|r| (r.name.as_str(), r)).collect();
        let discovered: HashSet<&str> = files.iter().map(|f| f.name.as_str()).collect();

        let mut list: Vec<MigrationListNode> = files
            .iter()
            .map(|file| match by_name.get(file.name.as_str()) {
                Some(row) => MigrationListNode {
                    name: file.name.clone(),
                    status: MigrationListStatus::Migrated,
                    batch: Some(row.batch),
                    migration_time: Some(row.migration_time.clone()),
                },
                None => MigrationListNode {
                    name: file.name.clone(),
                    status: MigrationListStatus::Pending,
                    batch: None,
                    migration_time: None,
                },
            })
            .collect();

        list.extend(
            rows.iter()
                .filter(|row| !discovered.contains(row.name.as_str()))
                .map(|row| MigrationListNode {
                    name: row.name.clone(),
                    status: MigrationListStatus::Corrupt,
                    batch: Some(row.batch),
                    migration_time: Some(row.migration_time.clone()),
                }),
        );
        Ok(list)
    }

    /// Close every connection of the manager, releasing them.
    pub async fn close(&self) {
        self.manager.close_all(true).await
    }
}
