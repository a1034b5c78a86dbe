//! `-- chronicle:*` comment directives in script files.
//!
//! ```sql
//! -- chronicle:env development,testing
//! -- chronicle:up
//! CREATE TABLE ...
//! -- chronicle:down
//! DROP TABLE ...
//! ```

/// Directives read from a script header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptDirectives {
    /// Environment allow-list: `-- chronicle:env development,testing`.
    /// Empty means every environment.
    pub env: Vec<String>,
}

impl ScriptDirectives {
    /// Whether a script with these directives runs in `environment`.
    pub fn allows_environment(&self, environment: &str) -> bool {
        self.env.is_empty() || self.env.iter().any(|e| e.eq_ignore_ascii_case(environment))
    }
}

/// Section marker splitting a schema file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Up,
    Down,
}

/// Strip a directive prefix, ensuring the prefix is followed by whitespace or end of string.
/// This keeps "chronicle:env" from matching "chronicle:environment".
fn strip_directive_prefix<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// The body of a `--` comment line, or None for any other line.
fn comment_body(line: &str) -> Option<&str> {
    line.trim().strip_prefix("--").map(str::trim)
}

/// Parse directives from the leading comment block.
///
/// Stops at the first non-empty, non-comment line.
pub fn parse_directives(sql: &str) -> ScriptDirectives {
    let mut directives = ScriptDirectives::default();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(body) = comment_body(trimmed) else {
            break;
        };

        if let Some(value) = strip_directive_prefix(body, "chronicle:env") {
            for item in value.split(',') {
                let item = item.trim();
                if !item.is_empty() {
                    directives.env.push(item.to_string());
                }
            }
        }
    }

    directives
}

/// Recognise `-- chronicle:up` / `-- chronicle:down`.
pub fn section_marker(line: &str) -> Option<Section> {
    let body = comment_body(line)?;
    if strip_directive_prefix(body, "chronicle:up").is_some() {
        Some(Section::Up)
    } else if strip_directive_prefix(body, "chronicle:down").is_some() {
        Some(Section::Down)
    } else {
        None
    }
}
