//! ClickHouse identifier handling and DDL clause helpers.

use crate::config::{ConnectionConfig, ReplicatedMergeTree};
use crate::error::{ChronicleError, Result};

/// Quote a ClickHouse identifier with backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// Quote a string literal for inline use in DDL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Validate that a SQL identifier contains only safe characters.
///
/// Returns an error for names with characters outside `[a-zA-Z0-9_]`.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ChronicleError::InvalidIdentifier(
            "Identifier cannot be empty".to_string(),
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ChronicleError::InvalidIdentifier(format!(
            "Identifier '{}' contains invalid characters. Only [a-zA-Z0-9_] are allowed.",
            name
        )));
    }
    Ok(())
}

/// ` ON CLUSTER <name>` when the connection targets a cluster, else empty.
pub fn on_cluster(config: &ConnectionConfig) -> String {
    match config.cluster_name {
        Some(ref cluster) => format!(" ON CLUSTER {}", quote_ident(cluster)),
        None => String::new(),
    }
}

/// Table engine for the migration metadata tables.
pub fn metadata_engine(replicated: Option<&ReplicatedMergeTree>) -> String {
    match replicated {
        None => "MergeTree()".to_string(),
        Some(ReplicatedMergeTree::Default) => "ReplicatedMergeTree()".to_string(),
        Some(ReplicatedMergeTree::Custom {
            zoo_keeper_path,
            replica_name,
        }) => format!(
            "ReplicatedMergeTree({}, {})",
            quote_literal(zoo_keeper_path),
            quote_literal(replica_name)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("adonis_schema").is_ok());
        assert!(validate_identifier("Events2024").is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a-b").is_err());
        assert!(validate_identifier("x; DROP TABLE y").is_err());
        assert!(validate_identifier("`t`").is_err());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("events"), "`events`");
        assert_eq!(quote_ident("we`ird"), "`we\\`ird`");
    }

    #[test]
    fn test_on_cluster() {
        let mut config = ConnectionConfig::default();
        assert_eq!(on_cluster(&config), "");
        config.cluster_name = Some("main".to_string());
        assert_eq!(on_cluster(&config), " ON CLUSTER `main`");
    }

    #[test]
    fn test_metadata_engine() {
        assert_eq!(metadata_engine(None), "MergeTree()");
        assert_eq!(
            metadata_engine(Some(&ReplicatedMergeTree::Default)),
            "ReplicatedMergeTree()"
        );
        assert_eq!(
            metadata_engine(Some(&ReplicatedMergeTree::Custom {
                zoo_keeper_path: "/ch/{shard}/schema".to_string(),
                replica_name: "{replica}".to_string(),
            })),
            "ReplicatedMergeTree('/ch/{shard}/schema', '{replica}')"
        );
    }
}
