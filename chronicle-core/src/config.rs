//! Configuration loading and resolution.
//!
//! Supports a TOML config file, environment variables, and CLI overrides
//! with a defined priority order (CLI > env > TOML > defaults).

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ChronicleError, Result};

/// Helper macro to apply an optional owned value directly to a target field.
macro_rules! apply_option {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = v;
        }
    };
}

/// Helper macro to apply an optional owned value, wrapping it in `Some()`.
macro_rules! apply_option_some {
    ($opt:expr => $target:expr) => {
        if let Some(v) = $opt {
            $target = Some(v);
        }
    };
}

/// Helper macro to clone a borrowed optional value directly to a target field.
macro_rules! apply_option_clone {
    ($opt:expr => $target:expr) => {
        if let Some(ref v) = $opt {
            $target = v.clone();
        }
    };
}

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "chronicle.toml";

/// Name used for the single implicit connection when none are configured.
pub const DEFAULT_CONNECTION: &str = "clickhouse";

/// Top-level configuration for chronicle.
#[derive(Debug, Clone)]
pub struct ChronicleConfig {
    /// Name of the primary connection.
    pub connection: String,
    /// All named connections.
    pub connections: BTreeMap<String, ConnectionConfig>,
    /// Log every debug-enabled query through the `log` facade.
    pub pretty_print_debug_queries: bool,
    /// Runtime environment (`development`, `testing`, `production`, ...).
    pub environment: String,
    /// Directory that relative script paths resolve against.
    pub app_root: PathBuf,
}

impl Default for ChronicleConfig {
    fn default() -> Self {
        let mut connections = BTreeMap::new();
        connections.insert(DEFAULT_CONNECTION.to_string(), ConnectionConfig::default());
        Self {
            connection: DEFAULT_CONNECTION.to_string(),
            connections,
            pretty_print_debug_queries: false,
            environment: "development".to_string(),
            app_root: PathBuf::from("."),
        }
    }
}

/// Settings for one named ClickHouse connection.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// HTTP endpoint of the server.
    pub url: String,
    /// User sent as `X-ClickHouse-User`.
    pub username: String,
    /// Password sent as `X-ClickHouse-Key`.
    pub password: Option<String>,
    /// Database every request runs against.
    pub database: String,
    /// When set, DDL is issued with `ON CLUSTER <name>`.
    pub cluster_name: Option<String>,
    /// Time method calls and emit events for them.
    pub debug: bool,
    /// Per-request timeout in seconds (0 disables).
    pub request_timeout_secs: u64,
    /// Migration settings for this connection.
    pub migrations: MigrationsConfig,
    /// Seeder settings for this connection.
    pub seeders: SeedersConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            username: "default".to_string(),
            password: None,
            database: "default".to_string(),
            cluster_name: None,
            debug: false,
            request_timeout_secs: 30,
            migrations: MigrationsConfig::default(),
            seeders: SeedersConfig::default(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("database", &self.database)
            .field("cluster_name", &self.cluster_name)
            .field("debug", &self.debug)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("migrations", &self.migrations)
            .field("seeders", &self.seeders)
            .finish()
    }
}

/// Engine used for the migration metadata tables on replicated clusters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicatedMergeTree {
    /// `ReplicatedMergeTree` without parameters; the server supplies defaults.
    Default,
    /// `ReplicatedMergeTree('<zoo_keeper_path>', '<replica_name>')`.
    Custom {
        zoo_keeper_path: String,
        replica_name: String,
    },
}

/// Migration behavior settings.
#[derive(Debug, Clone)]
pub struct MigrationsConfig {
    /// Directories scanned for schema files, in priority order.
    pub paths: Vec<String>,
    /// Name of the schema table. The versions table appends `_versions`.
    pub table_name: String,
    /// Refuse rollbacks when the environment is `production`.
    pub disable_rollbacks_in_production: bool,
    /// Sort file names numerically-aware instead of lexically.
    pub natural_sort: bool,
    /// Use `ReplicatedMergeTree` for the metadata tables.
    pub replicated_merge_tree: Option<ReplicatedMergeTree>,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            paths: vec!["clickhouse/migrations".to_string()],
            table_name: "adonis_schema".to_string(),
            disable_rollbacks_in_production: false,
            natural_sort: false,
            replicated_merge_tree: None,
        }
    }
}

impl MigrationsConfig {
    /// Name of the table holding the metadata format version.
    pub fn versions_table_name(&self) -> String {
        format!("{}_versions", self.table_name)
    }
}

/// Seeder settings.
#[derive(Debug, Clone)]
pub struct SeedersConfig {
    /// Directories scanned for seeder files.
    pub paths: Vec<String>,
    /// Sort file names numerically-aware instead of lexically.
    pub natural_sort: bool,
}

impl Default for SeedersConfig {
    fn default() -> Self {
        Self {
            paths: vec!["clickhouse/seeders".to_string()],
            natural_sort: false,
        }
    }
}

// ── TOML deserialization structs ──

#[derive(Deserialize, Default)]
struct TomlConfig {
    connection: Option<String>,
    pretty_print_debug_queries: Option<bool>,
    environment: Option<String>,
    app_root: Option<String>,
    connections: Option<BTreeMap<String, TomlConnectionConfig>>,
}

#[derive(Deserialize, Default)]
struct TomlConnectionConfig {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
    cluster_name: Option<String>,
    debug: Option<bool>,
    request_timeout: Option<u64>,
    migrations: Option<TomlMigrationsConfig>,
    seeders: Option<TomlSeedersConfig>,
}

#[derive(Deserialize, Default)]
struct TomlMigrationsConfig {
    paths: Option<Vec<String>>,
    table_name: Option<String>,
    disable_rollbacks_in_production: Option<bool>,
    natural_sort: Option<bool>,
    replicated_merge_tree: Option<TomlReplicatedMergeTree>,
}

/// Either `replicated_merge_tree = true` or a table with both parameters.
#[derive(Deserialize)]
#[serde(untagged)]
enum TomlReplicatedMergeTree {
    Enabled(bool),
    Custom {
        zoo_keeper_path: String,
        replica_name: String,
    },
}

#[derive(Deserialize, Default)]
struct TomlSeedersConfig {
    paths: Option<Vec<String>>,
    natural_sort: Option<bool>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    /// Override the primary connection name.
    pub connection: Option<String>,
    /// Override the runtime environment.
    pub environment: Option<String>,
    /// Override the server URL of the primary connection.
    pub url: Option<String>,
    /// Override the database of the primary connection.
    pub database: Option<String>,
    /// Override the debug flag of the primary connection.
    pub debug: Option<bool>,
}

impl ChronicleConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables
    /// 3. TOML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = ChronicleConfig::default();

        let toml_path = config_path.unwrap_or(DEFAULT_CONFIG_FILE);
        if let Ok(content) = std::fs::read_to_string(toml_path) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = std::fs::metadata(toml_path) {
                    let mode = meta.permissions().mode();
                    if mode & 0o077 != 0 {
                        log::warn!("Config file has overly permissive permissions. Consider chmod 600.; path={}, mode={:o}", toml_path, mode);
                    }
                }
            }
            config.apply_toml_str(&content).map_err(|e| match e {
                ChronicleError::ConfigError(msg) => ChronicleError::ConfigError(format!(
                    "Failed to parse config file '{}': {}",
                    toml_path, msg
                )),
                other => other,
            })?;
        } else if config_path.is_some() {
            return Err(ChronicleError::ConfigError(format!(
                "Config file '{}' not found",
                toml_path
            )));
        }

        config.apply_env();
        config.apply_cli(overrides);
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document and layer it on top of the current values.
    pub fn apply_toml_str(&mut self, content: &str) -> Result<()> {
        let toml_config: TomlConfig =
            toml::from_str(content).map_err(|e| ChronicleError::ConfigError(e.to_string()))?;
        self.apply_toml(toml_config);
        Ok(())
    }

    fn apply_toml(&mut self, toml: TomlConfig) {
        apply_option!(toml.connection => self.connection);
        apply_option!(toml.pretty_print_debug_queries => self.pretty_print_debug_queries);
        apply_option!(toml.environment => self.environment);
        if let Some(root) = toml.app_root {
            self.app_root = PathBuf::from(root);
        }

        if let Some(connections) = toml.connections {
            // An explicit connection list replaces the implicit default one.
            self.connections.clear();
            for (name, c) in connections {
                let mut conn = ConnectionConfig::default();
                apply_option!(c.url => conn.url);
                apply_option!(c.username => conn.username);
                apply_option_some!(c.password => conn.password);
                apply_option!(c.database => conn.database);
                apply_option_some!(c.cluster_name => conn.cluster_name);
                apply_option!(c.debug => conn.debug);
                apply_option!(c.request_timeout => conn.request_timeout_secs);

                if let Some(m) = c.migrations {
                    apply_option!(m.paths => conn.migrations.paths);
                    apply_option!(m.table_name => conn.migrations.table_name);
                    apply_option!(m.disable_rollbacks_in_production => conn.migrations.disable_rollbacks_in_production);
                    apply_option!(m.natural_sort => conn.migrations.natural_sort);
                    conn.migrations.replicated_merge_tree = match m.replicated_merge_tree {
                        Some(TomlReplicatedMergeTree::Enabled(true)) => {
                            Some(ReplicatedMergeTree::Default)
                        }
                        Some(TomlReplicatedMergeTree::Enabled(false)) | None => None,
                        Some(TomlReplicatedMergeTree::Custom {
                            zoo_keeper_path,
                            replica_name,
                        }) => Some(ReplicatedMergeTree::Custom {
                            zoo_keeper_path,
                            replica_name,
                        }),
                    };
                }

                if let Some(s) = c.seeders {
                    apply_option!(s.paths => conn.seeders.paths);
                    apply_option!(s.natural_sort => conn.seeders.natural_sort);
                }

                self.connections.insert(name, conn);
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CHRONICLE_CONNECTION") {
            self.connection = v;
        }
        if let Ok(v) = std::env::var("CHRONICLE_ENV") {
            self.environment = v;
        }
        if let Ok(v) = std::env::var("CHRONICLE_PRETTY_PRINT_DEBUG_QUERIES") {
            self.pretty_print_debug_queries = v == "1" || v.eq_ignore_ascii_case("true");
        }

        let primary = self.connection.clone();
        let Some(conn) = self.connections.get_mut(&primary) else {
            return;
        };
        if let Ok(v) = std::env::var("CHRONICLE_URL") {
            conn.url = v;
        }
        if let Ok(v) = std::env::var("CHRONICLE_USERNAME") {
            conn.username = v;
        }
        if let Ok(v) = std::env::var("CHRONICLE_PASSWORD") {
            conn.password = Some(v);
        }
        if let Ok(v) = std::env::var("CHRONICLE_DATABASE") {
            conn.database = v;
        }
        if let Ok(v) = std::env::var("CHRONICLE_CLUSTER") {
            conn.cluster_name = Some(v);
        }
        if let Ok(v) = std::env::var("CHRONICLE_REQUEST_TIMEOUT") {
            if let Ok(n) = v.parse::<u64>() {
                conn.request_timeout_secs = n;
            }
        }
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) {
        apply_option_clone!(overrides.connection => self.connection);
        apply_option_clone!(overrides.environment => self.environment);

        let primary = self.connection.clone();
        if let Some(conn) = self.connections.get_mut(&primary) {
            apply_option_clone!(overrides.url => conn.url);
            apply_option_clone!(overrides.database => conn.database);
            apply_option!(overrides.debug => conn.debug);
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.connections.contains_key(&self.connection) {
            let available: Vec<&str> = self.connections.keys().map(|k| k.as_str()).collect();
            return Err(ChronicleError::ConfigError(format!(
                "Primary connection '{}' is not defined. Available: {}",
                self.connection,
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                }
            )));
        }
        for conn in self.connections.values() {
            crate::db::validate_identifier(&conn.migrations.table_name)?;
            if let Some(ref cluster) = conn.cluster_name {
                crate::db::validate_identifier(cluster)?;
            }
        }
        Ok(())
    }

    /// Whether the runtime environment is `production`.
    pub fn in_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Config of the primary connection.
    pub fn primary(&self) -> Option<&ConnectionConfig> {
        self.connections.get(&self.connection)
    }

    /// Replace the primary connection settings, keeping the primary name.
    pub fn with_primary(mut self, config: ConnectionConfig) -> Self {
        self.connections.insert(self.connection.clone(), config);
        self
    }
}
