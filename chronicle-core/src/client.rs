//! The database client seam.
//!
//! Everything above this module talks to ClickHouse through
//! [`DatabaseClient`]; the HTTP implementation lives in [`crate::http`] and
//! tests substitute an in-memory one through [`ClientFactory`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::ConnectionConfig;
use crate::error::Result;

/// Named query parameters, bound server-side as `{name:Type}`.
pub type QueryParamMap = BTreeMap<String, Value>;

/// Per-request server settings (`mutations_sync`, ...).
pub type SettingsMap = BTreeMap<String, String>;

/// Parameters shared by `query`, `command` and `exec`.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pub query: String,
    pub query_params: QueryParamMap,
    pub settings: SettingsMap,
}

impl QueryParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Parameters for a JSONEachRow insert.
#[derive(Debug, Clone, Default)]
pub struct InsertParams {
    pub table: String,
    pub values: Vec<Value>,
    pub columns: Option<Vec<String>>,
    pub settings: SettingsMap,
}

/// Rows returned by a `query`, one JSON object per row.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub query_id: Option<String>,
    pub rows: Vec<Value>,
}

impl QueryResult {
    /// Decode every row into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| serde_json::from_value(row.clone()).map_err(Into::into))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InsertResult {
    pub query_id: Option<String>,
    /// False when there was nothing to send.
    pub executed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub query_id: Option<String>,
}

/// Raw response of an `exec` call.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub query_id: Option<String>,
    pub body: String,
}

/// Outcome of a ping. Never an error; failures are carried inside.
#[derive(Debug, Clone, Default)]
pub struct PingResult {
    pub success: bool,
    pub error: Option<String>,
}

/// Operations chronicle needs from a ClickHouse client.
#[async_trait]
pub trait DatabaseClient: Send + Sync {
    /// Run a statement that returns rows.
    async fn query(&self, params: QueryParams) -> Result<QueryResult>;

    /// Insert rows into a table.
    async fn insert(&self, params: InsertParams) -> Result<InsertResult>;

    /// Run a statement whose result is discarded (DDL, mutations).
    async fn command(&self, params: QueryParams) -> Result<CommandResult>;

    /// Run a statement and return the raw response body.
    async fn exec(&self, params: QueryParams) -> Result<ExecResult>;

    /// Check the server is reachable.
    async fn ping(&self) -> Result<()>;

    /// Release the client. Calls after this fail.
    async fn close(&self) -> Result<()>;
}

/// Builds client handles for a connection.
///
/// Construction must not block; the network is first touched on use.
pub trait ClientFactory: Send + Sync {
    fn create(&self, name: &str, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>>;
}

/// Accept a number, a numeric string (64-bit integers are quoted in JSON
/// output), or null (treated as 0).
pub fn deserialize_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Lenient {
        Number(u64),
        Text(String),
        Null(Option<()>),
    }

    match Lenient::deserialize(deserializer)? {
        Lenient::Number(n) => Ok(n),
        Lenient::Text(s) => s.parse().map_err(serde::de::Error::custom),
        Lenient::Null(_) => Ok(0),
    }
}
