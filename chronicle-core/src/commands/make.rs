//! Create new schema and seeder files from templates.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ChronicleConfig;
use crate::error::{ChronicleError, Result};
use crate::source::{normalize_directory, SCRIPT_EXTENSION};

#[derive(Debug, Serialize)]
pub struct MakeReport {
    /// Name the file will be tracked under.
    pub name: String,
    pub path: PathBuf,
}

/// Lowercase `name`, turning anything outside `[a-z0-9]` into `_`.
fn file_stem(name: &str) -> Result<String> {
    let mut stem = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            stem.push(c.to_ascii_lowercase());
        } else if !stem.ends_with('_') {
            stem.push('_');
        }
    }
    let stem = stem.trim_matches('_').to_string();
    if stem.is_empty() {
        return Err(ChronicleError::ConfigError(format!(
            "Cannot derive a file name from '{}'",
            name
        )));
    }
    Ok(stem)
}

fn migration_template(stem: &str) -> String {
    format!(
        "-- chronicle:up\n\
-- CREATE TABLE {stem}${{on_cluster}} (\n\
--     id UInt64,\n\
--     created_at DateTime DEFAULT now()\n\
-- ) ENGINE = MergeTree ORDER BY id;\n\
\n\
-- chronicle:down\n\
-- DROP TABLE {stem}${{on_cluster}};\n"
    )
}

fn seeder_template(stem: &str) -> String {
    format!(
        "-- Start with a \"-- chronicle:env development\" line to limit environments.\n\
\n\
-- INSERT INTO {stem} (id) VALUES (1);\n"
    )
}

/// Write `content` to a new file under `app_root/folder`. Never overwrites.
fn write_new(
    app_root: &Path,
    folder: &str,
    file_name: &str,
    content: &str,
) -> Result<MakeReport> {
    let folder = normalize_directory(folder);
    let dir = app_root.join(&folder);
    std::fs::create_dir_all(&dir)?;

    let path = dir.join(format!("{}.{}", file_name, SCRIPT_EXTENSION));
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    file.write_all(content.as_bytes())?;

    let name = if folder.is_empty() {
        file_name.to_string()
    } else {
        format!("{}/{}", folder, file_name)
    };
    log::info!("Created script file; name={}, path={}", name, path.display());
    Ok(MakeReport { name, path })
}

fn target_folder(configured: &[String], folder: Option<&str>, kind: &str) -> Result<String> {
    match folder {
        Some(folder) => Ok(folder.to_string()),
        None => configured.first().cloned().ok_or_else(|| {
            ChronicleError::ConfigError(format!("No {} directory configured", kind))
        }),
    }
}

/// Create a schema file named `<millis>_<name>.sql`.
pub fn execute_migration(
    config: &ChronicleConfig,
    connection: &str,
    name: &str,
    folder: Option<&str>,
) -> Result<MakeReport> {
    let conn = config.connections.get(connection).ok_or_else(|| {
        ChronicleError::UnmanagedConnection {
            name: connection.to_string(),
        }
    })?;
    let folder = target_folder(&conn.migrations.paths, folder, "migrations")?;
    let stem = file_stem(name)?;
    let file_name = format!("{}_{}", chrono::Utc::now().timestamp_millis(), stem);
    write_new(&config.app_root, &folder, &file_name, &migration_template(&stem))
}

/// Create a seeder file named `<name>.sql`.
pub fn execute_seeder(
    config: &ChronicleConfig,
    connection: &str,
    name: &str,
    folder: Option<&str>,
) -> Result<MakeReport> {
    let conn = config.connections.get(connection).ok_or_else(|| {
        ChronicleError::UnmanagedConnection {
            name: connection.to_string(),
        }
    })?;
    let folder = target_folder(&conn.seeders.paths, folder, "seeders")?;
    let stem = file_stem(name)?;
    write_new(&config.app_root, &folder, &stem, &seeder_template(&stem))
}
