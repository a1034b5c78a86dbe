//! Parsed schema and seeder scripts.
//!
//! A schema script carries an up and a down section split by
//! `-- chronicle:up` / `-- chronicle:down`. A seeder script is a plain list of
//! statements with an optional `-- chronicle:env` header.

use std::collections::HashMap;

use crate::directive::{parse_directives, section_marker, ScriptDirectives, Section};
use crate::error::{ChronicleError, Result};
use crate::method::MethodClient;
use crate::placeholder::replace_placeholders;
use crate::sql_parser::{is_comment_only, split_statements};

/// Substitute placeholders and split into statements.
pub fn render_statements(sql: &str, placeholders: &HashMap<String, String>) -> Result<Vec<String>> {
    let rendered = replace_placeholders(sql, placeholders)?;
    Ok(split_statements(&rendered)
        .into_iter()
        .map(str::to_string)
        .collect())
}

/// A schema file split into its up and down sections.
///
/// Each parsed script runs at most once; load the file again to run it again.
#[derive(Debug)]
pub struct SchemaScript {
    name: String,
    up: String,
    down: String,
    executed: bool,
}

impl SchemaScript {
    pub fn parse(name: &str, content: &str) -> Result<Self> {
        let invalid = |reason: &str| ChronicleError::InvalidSource {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let mut preamble = String::new();
        let mut up: Option<String> = None;
        let mut down: Option<String> = None;
        let mut current: Option<Section> = None;

        for line in content.lines() {
            if let Some(section) = section_marker(line) {
                let slot = match section {
                    Section::Up => &mut up,
                    Section::Down => &mut down,
                };
                if slot.is_some() {
                    return Err(invalid(&format!("duplicate {} section", section_label(section))));
                }
                *slot = Some(String::new());
                current = Some(section);
                continue;
            }

            let target = match current {
                None => &mut preamble,
                Some(Section::Up) => up.get_or_insert_with(String::new),
                Some(Section::Down) => down.get_or_insert_with(String::new),
            };
            target.push_str(line);
            target.push('\n');
        }

        if up.is_none() && down.is_none() {
            return Err(invalid(
                "expected a \"-- chronicle:up\" or \"-- chronicle:down\" section",
            ));
        }
        if !is_comment_only(&preamble) {
            return Err(invalid("statements found before the first section marker"));
        }

        Ok(Self {
            name: name.to_string(),
            up: up.unwrap_or_default(),
            down: down.unwrap_or_default(),
            executed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw SQL of one section, placeholders untouched.
    pub fn section(&self, section: Section) -> &str {
        match section {
            Section::Up => &self.up,
            Section::Down => &self.down,
        }
    }

    pub fn has_run(&self) -> bool {
        self.executed
    }

    /// Run one section statement by statement.
    ///
    /// In dry-run nothing is sent; the rendered statements are returned for
    /// review. Otherwise the executed statements are returned.
    pub async fn execute(
        &mut self,
        section: Section,
        client: &MethodClient,
        placeholders: &HashMap<String, String>,
        dry_run: bool,
    ) -> Result<Vec<String>> {
        if self.executed {
            return Err(ChronicleError::SchemaAlreadyExecuted {
                name: self.name.clone(),
            });
        }
        self.executed = true;

        let statements = render_statements(self.section(section), placeholders)?;
        if dry_run {
            return Ok(statements);
        }

        for statement in &statements {
            client
                .command(statement.as_str())
                .execute()
                .await
                .map_err(|e| ChronicleError::MigrationFailed {
                    script: self.name.clone(),
                    reason: e.to_string(),
                })?;
        }

        log::debug!(
            "Schema section executed; script={}, section={}, statements={}",
            self.name,
            section_label(section),
            statements.len()
        );
        Ok(statements)
    }
}

fn section_label(section: Section) -> &'static str {
    match section {
        Section::Up => "up",
        Section::Down => "down",
    }
}

/// A seeder file.
#[derive(Debug)]
pub struct SeederScript {
    name: String,
    directives: ScriptDirectives,
    body: String,
}

impl SeederScript {
    pub fn parse(name: &str, content: &str) -> Result<Self> {
        if content.lines().any(|line| section_marker(line).is_some()) {
            return Err(ChronicleError::InvalidSource {
                name: name.to_string(),
                reason: "seeders cannot contain up/down sections".to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            directives: parse_directives(content),
            body: content.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directives(&self) -> &ScriptDirectives {
        &self.directives
    }

    /// Run every statement in order, stopping at the first failure.
    pub async fn run(
        &self,
        client: &MethodClient,
        placeholders: &HashMap<String, String>,
    ) -> Result<usize> {
        let statements = render_statements(&self.body, placeholders)?;
        for statement in &statements {
            client
                .command(statement.as_str())
                .execute()
                .await
                .map_err(|e| ChronicleError::SeederFailed {
                    script: self.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(statements.len())
    }
}
