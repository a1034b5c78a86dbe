//! `${key}` placeholder substitution in script SQL.
//!
//! Built-in keys describe the connection a script runs against, so one
//! schema file can target single-node and clustered deployments.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::config::ConnectionConfig;
use crate::db::{on_cluster, quote_ident};
use crate::error::{ChronicleError, Result};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Replace every `${key}` in `sql`. Keys are case-insensitive; an unknown key
/// is an error listing the available ones.
pub fn replace_placeholders(sql: &str, placeholders: &HashMap<String, String>) -> Result<String> {
    let lower_map: HashMap<String, &String> = placeholders
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect();

    let mut result = String::with_capacity(sql.len());
    let mut last_end = 0;

    for caps in PLACEHOLDER_RE.captures_iter(sql) {
        let (Some(full), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let key = key.as_str().trim();
        let Some(value) = lower_map.get(&key.to_lowercase()) else {
            let mut available: Vec<&str> = placeholders.keys().map(|k| k.as_str()).collect();
            available.sort();
            return Err(ChronicleError::PlaceholderNotFound {
                key: key.to_string(),
                available: if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                },
            });
        };
        result.push_str(&sql[last_end..full.start()]);
        result.push_str(value);
        last_end = full.end();
    }

    result.push_str(&sql[last_end..]);
    Ok(result)
}

/// Placeholders available to every script of a connection.
///
/// - `database`: the connection's database
/// - `cluster`: the cluster name, or empty
/// - `on_cluster`: the `ON CLUSTER <name>` clause with a leading space, or empty
/// - `connection`: the connection name
pub fn build_placeholders(connection: &str, config: &ConnectionConfig) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("database".to_string(), config.database.clone());
    map.insert(
        "cluster".to_string(),
        config
            .cluster_name
            .as_deref()
            .map(quote_ident)
            .unwrap_or_default(),
    );
    map.insert("on_cluster".to_string(), on_cluster(config));
    map.insert("connection".to_string(), connection.to_string());
    map
}
