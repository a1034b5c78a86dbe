//! One-shot execution of seeder files.
//!
//! Seeders are not tracked: every run executes them again.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::method::MethodClient;
use crate::placeholder::build_placeholders;
use crate::script::SeederScript;
use crate::source::{FileNode, SeedersSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeederStatus {
    Pending,
    Completed,
    Failed,
    /// Skipped because the environment allow-list excludes the current one.
    Ignored,
}

/// Outcome of one seeder file.
#[derive(Debug, Clone, Serialize)]
pub struct SeederFileNode {
    pub name: String,
    #[serde(skip)]
    pub file: FileNode,
    pub status: SeederStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs seeder files against one connection.
pub struct SeedsRunner {
    client: MethodClient,
    source: SeedersSource,
    environment: String,
    placeholders: HashMap<String, String>,
}

impl SeedsRunner {
    pub fn new(client: MethodClient, app_root: impl Into<PathBuf>, environment: &str) -> Self {
        let source = SeedersSource::new(client.config(), app_root);
        let placeholders = build_placeholders(client.connection_name(), client.config());
        Self {
            client,
            source,
            environment: environment.to_string(),
            placeholders,
        }
    }

    /// Discovered seeder files, in run order.
    pub fn get_list(&self) -> Result<Vec<FileNode>> {
        self.source.get_seeders()
    }

    /// Run one seeder.
    ///
    /// A statement failure is reported as `Failed`; only an unreadable or
    /// malformed file is an error.
    pub async fn run(&self, file: &FileNode) -> Result<SeederFileNode> {
        let content = file.load()?;
        let script = SeederScript::parse(&file.name, &content)?;

        let mut node = SeederFileNode {
            name: file.name.clone(),
            file: file.clone(),
            status: SeederStatus::Pending,
            error: None,
        };

        if !script.directives().allows_environment(&self.environment) {
            log::debug!(
                "Seeder not enabled for environment, ignoring; script={}, environment={}",
                file.name,
                self.environment
            );
            node.status = SeederStatus::Ignored;
            return Ok(node);
        }

        match script.run(&self.client, &self.placeholders).await {
            Ok(statements) => {
                log::info!("Seeder completed; script={}, statements={}", file.name, statements);
                node.status = SeederStatus::Completed;
            }
            Err(e) => {
                log::error!("Seeder failed; script={}, error={}", file.name, e);
                node.status = SeederStatus::Failed;
                node.error = Some(e.to_string());
            }
        }
        Ok(node)
    }
}
