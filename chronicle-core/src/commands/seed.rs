//! Run seeder files.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ChronicleConfig;
use crate::connection::ConnectionManager;
use crate::error::{ChronicleError, Result};
use crate::seeds::{SeederFileNode, SeederStatus, SeedsRunner};
use crate::source::{normalize_directory, FileNode};

#[derive(Debug, Serialize)]
pub struct SeedReport {
    pub connection: String,
    pub environment: String,
    pub seeders: Vec<SeederFileNode>,
}

impl SeedReport {
    pub fn failed(&self) -> usize {
        self.seeders
            .iter()
            .filter(|s| s.status == SeederStatus::Failed)
            .count()
    }
}

/// Pick the requested seeders, keeping discovery order.
///
/// A requested name matches a file by its full name or by its path with the
/// extension, relative to the app root.
fn select(files: Vec<FileNode>, requested: &[String]) -> Result<Vec<FileNode>> {
    let wanted: Vec<String> = requested
        .iter()
        .map(|r| {
            let r = normalize_directory(r);
            r.strip_suffix(".sql").map(str::to_string).unwrap_or(r)
        })
        .collect();

    if let Some(missing) = wanted
        .iter()
        .find(|w| !files.iter().any(|f| &f.name == *w))
    {
        return Err(ChronicleError::InvalidSource {
            name: missing.clone(),
            reason: "no such seeder file".to_string(),
        });
    }
    Ok(files.into_iter().filter(|f| wanted.contains(&f.name)).collect())
}

/// Execute the seed command.
///
/// Every selected seeder runs even when an earlier one fails; failures are
/// reported per file.
pub async fn execute(
    manager: &Arc<ConnectionManager>,
    config: &ChronicleConfig,
    connection: &str,
    files: Option<&[String]>,
) -> Result<SeedReport> {
    let client = manager.client(connection)?;
    let runner = SeedsRunner::new(client, config.app_root.clone(), &config.environment);

    let mut selected = runner.get_list()?;
    if let Some(requested) = files.filter(|f| !f.is_empty()) {
        selected = select(selected, requested)?;
    }

    let mut seeders = Vec::with_capacity(selected.len());
    for file in &selected {
        seeders.push(runner.run(file).await?);
    }

    let report = SeedReport {
        connection: connection.to_string(),
        environment: config.environment.clone(),
        seeders,
    };
    log::info!(
        "Seed completed; connection={}, seeders={}, failed={}",
        connection,
        report.seeders.len(),
        report.failed()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn node(name: &str) -> FileNode {
        FileNode {
            name: name.to_string(),
            abs_path: PathBuf::from(format!("/app/{}.sql", name)),
        }
    }

    #[test]
    fn test_select_keeps_discovery_order() {
        let files = vec![node("seeders/a"), node("seeders/b"), node("seeders/c")];
        let picked = select(
            files,
            &["./seeders/c.sql".to_string(), "seeders/a".to_string()],
        )
        .unwrap();
        let names: Vec<&str> = picked.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["seeders/a", "seeders/c"]);
    }

    #[test]
    fn test_select_unknown_file() {
        let err = select(vec![node("seeders/a")], &["seeders/z".to_string()]).unwrap_err();
        assert!(matches!(err, ChronicleError::InvalidSource { ref name, .. } if name == "seeders/z"));
    }
}
