//! Discovery of schema and seeder script files.
//!
//! Each configured directory is scanned recursively for `.sql` files and
//! sorted on its own; directories are then concatenated in configuration
//! order. A file's name is its directory-relative path without extension,
//! prefixed with the configured directory, using forward slashes.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::config::ConnectionConfig;
use crate::error::{ChronicleError, Result};

/// Extension of script files.
pub const SCRIPT_EXTENSION: &str = "sql";

/// A discovered script file. Contents are read on [`FileNode::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Canonical name, the key stored in the schema table.
    pub name: String,
    pub abs_path: PathBuf,
}

impl FileNode {
    /// Read the file. An empty file has nothing to run and is rejected.
    pub fn load(&self) -> Result<String> {
        let content = std::fs::read_to_string(&self.abs_path)?;
        if content.trim().is_empty() {
            return Err(ChronicleError::MissingSourceExport {
                name: self.name.clone(),
            });
        }
        Ok(content)
    }
}

/// Strip a leading `./` and trailing slashes, use forward slashes.
pub fn normalize_directory(directory: &str) -> String {
    let unix = directory.replace('\\', "/");
    let trimmed = unix.strip_prefix("./").unwrap_or(&unix);
    trimmed.trim_end_matches('/').to_string()
}

/// Collect the files of one directory, sorted.
pub fn source_files(app_root: &Path, directory: &str, natural_sort: bool) -> Result<Vec<FileNode>> {
    let directory = normalize_directory(directory);
    let root = app_root.join(&directory);
    let mut relative = Vec::new();
    if root.is_dir() {
        collect(&root, &root, &mut relative)?;
    } else {
        log::debug!("Script directory not found, skipping; path={}", root.display());
    }

    if natural_sort {
        relative.sort_by(|a, b| natural_cmp(a, b));
    } else {
        relative.sort();
    }

    Ok(relative
        .into_iter()
        .map(|rel| {
            let stem = rel
                .strip_suffix(&format!(".{}", SCRIPT_EXTENSION))
                .unwrap_or(&rel)
                .to_string();
            let name = if directory.is_empty() {
                stem
            } else {
                format!("{}/{}", directory, stem)
            };
            FileNode {
                name,
                abs_path: root.join(&rel),
            }
        })
        .collect())
}

/// Walk `dir`, pushing `/`-separated paths relative to `root`.
fn collect(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect(root, &path, out)?;
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(SCRIPT_EXTENSION) {
            continue;
        }
        if let Ok(rel) = path.strip_prefix(root) {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

/// Numeric-aware, case-insensitive ordering ("2_x" < "10_x").
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a).into_iter();
    let mut right = chunks(b).into_iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (&l, &r) {
                    (Chunk::Number(x), Chunk::Number(y)) => {
                        let x = x.trim_start_matches('0');
                        let y = y.trim_start_matches('0');
                        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                    }
                    (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
                    (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
                    (Chunk::Text(x), Chunk::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

enum Chunk<'a> {
    Number(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut digits: Option<bool> = None;
    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        if let Some(prev) = digits {
            if prev != is_digit {
                out.push(chunk(&s[start..i], prev));
                start = i;
            }
        }
        digits = Some(is_digit);
    }
    if let Some(prev) = digits {
        out.push(chunk(&s[start..], prev));
    }
    out
}

fn chunk(s: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Number(s)
    } else {
        Chunk::Text(s)
    }
}

fn gather(app_root: &Path, paths: &[String], natural_sort: bool) -> Result<Vec<FileNode>> {
    let mut files = Vec::new();
    for directory in paths {
        files.extend(source_files(app_root, directory, natural_sort)?);
    }
    Ok(files)
}

/// Schema files of one connection.
pub struct MigrationSource {
    app_root: PathBuf,
    paths: Vec<String>,
    natural_sort: bool,
}

impl MigrationSource {
    pub fn new(config: &ConnectionConfig, app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            paths: config.migrations.paths.clone(),
            natural_sort: config.migrations.natural_sort,
        }
    }

    pub fn get_migrations(&self) -> Result<Vec<FileNode>> {
        gather(&self.app_root, &self.paths, self.natural_sort)
    }
}

/// Seeder files of one connection.
pub struct SeedersSource {
    app_root: PathBuf,
    paths: Vec<String>,
    natural_sort: bool,
}

impl SeedersSource {
    pub fn new(config: &ConnectionConfig, app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            paths: config.seeders.paths.clone(),
            natural_sort: config.seeders.natural_sort,
        }
    }

    pub fn get_seeders(&self) -> Result<Vec<FileNode>> {
        gather(&self.app_root, &self.paths, self.natural_sort)
    }
}
