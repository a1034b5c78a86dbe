//! Error types for chronicle operations.

use thiserror::Error;

/// All error types that chronicle operations can produce.
#[derive(Error, Debug)]
pub enum ChronicleError {
    /// Invalid or missing configuration (TOML parse errors, unknown primary connection, etc.).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A connection name was requested that the manager does not know about.
    #[error("Cannot connect to unregistered connection {name}")]
    UnmanagedConnection { name: String },

    /// A rollback target references a schema file that is no longer on disk.
    #[error("Cannot perform rollback. Schema file \"{name}\" is missing")]
    MissingSchemaFile { name: String },

    /// Rollback attempted while `disable_rollbacks_in_production` is set.
    #[error("Rollback in production environment is disabled. Check \"chronicle.toml\" file for options.")]
    RollbackDisabled,

    /// A script file exists but has no content to load.
    #[error("Missing source in \"{name}\" file")]
    MissingSourceExport { name: String },

    /// A script file could not be parsed as a schema or seeder.
    #[error("Invalid source \"{name}\": {reason}")]
    InvalidSource { name: String, reason: String },

    /// The same parsed schema was asked to run a second time.
    #[error("Cannot execute schema \"{name}\" twice")]
    SchemaAlreadyExecuted { name: String },

    /// A statement inside a schema file failed.
    #[error("Migration failed for {script}: {reason}")]
    MigrationFailed { script: String, reason: String },

    /// A statement inside a seeder file failed.
    #[error("Seeder failed for {script}: {reason}")]
    SeederFailed { script: String, reason: String },

    /// The connection has no live client handle (never connected, or already disconnected).
    #[error("Connection \"{name}\" is closed")]
    ConnectionClosed { name: String },

    /// The database server rejected a request.
    #[error("Database error: {0}")]
    ClientError(String),

    /// The HTTP transport failed before the server could answer.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A row or parameter could not be (de)serialized.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// A `${key}` placeholder in a script has no corresponding value.
    #[error("Placeholder '{key}' not found. Available placeholders: {available}")]
    PlaceholderNotFound { key: String, available: String },

    /// A table or cluster name is not a safe identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A filesystem I/O operation failed (reading scripts, config, etc.).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, ChronicleError>`.
pub type Result<T> = std::result::Result<T, ChronicleError>;
