//! ClickHouse HTTP interface client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::client::{
    ClientFactory, CommandResult, DatabaseClient, ExecResult, InsertParams, InsertResult,
    QueryParams, QueryResult,
};
use crate::config::ConnectionConfig;
use crate::db::quote_ident;
use crate::error::{ChronicleError, Result};

const QUERY_ID_HEADER: &str = "x-clickhouse-query-id";

/// Client for one connection, speaking the ClickHouse HTTP protocol.
pub struct HttpClient {
    name: String,
    base_url: String,
    database: String,
    http: reqwest::Client,
    closed: AtomicBool,
}

impl HttpClient {
    /// Build a client. No request is sent until the first call.
    pub fn new(name: &str, config: &ConnectionConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-ClickHouse-User",
            HeaderValue::from_str(&config.username).map_err(|_| {
                ChronicleError::ConfigError("username contains invalid characters".to_string())
            })?,
        );
        if let Some(ref password) = config.password {
            let mut value = HeaderValue::from_str(password).map_err(|_| {
                ChronicleError::ConfigError("password contains invalid characters".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert("X-ClickHouse-Key", value);
        }

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }

        Ok(Self {
            name: name.to_string(),
            base_url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            http: builder.build()?,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChronicleError::ConnectionClosed {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// URL parameters common to every statement.
    fn url_params(&self, params: &QueryParams) -> Vec<(String, String)> {
        let mut url_params = vec![("database".to_string(), self.database.clone())];
        for (key, value) in &params.query_params {
            url_params.push((format!("param_{}", key), format_param(value)));
        }
        for (key, value) in &params.settings {
            url_params.push((key.clone(), value.clone()));
        }
        url_params
    }

    async fn send(
        &self,
        url_params: Vec<(String, String)>,
        body: String,
    ) -> Result<(Option<String>, String)> {
        self.ensure_open()?;
        let response = self
            .http
            .post(format!("{}/", self.base_url))
            .query(&url_params)
            .body(body)
            .send()
            .await?;

        let query_id = response
            .headers()
            .get(QUERY_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ChronicleError::ClientError(text.trim().to_string()));
        }
        Ok((query_id, text))
    }
}

#[async_trait]
impl DatabaseClient for HttpClient {
    async fn query(&self, params: QueryParams) -> Result<QueryResult> {
        let mut url_params = self.url_params(&params);
        url_params.push(("default_format".to_string(), "JSONEachRow".to_string()));
        let (query_id, body) = self.send(url_params, params.query).await?;

        let rows = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(QueryResult { query_id, rows })
    }

    async fn insert(&self, params: InsertParams) -> Result<InsertResult> {
        if params.values.is_empty() {
            return Ok(InsertResult {
                query_id: None,
                executed: false,
            });
        }

        let columns = match params.columns {
            Some(ref cols) if !cols.is_empty() => format!(
                " ({})",
                cols.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
            ),
            _ => String::new(),
        };
        let statement = format!(
            "INSERT INTO {}{} FORMAT JSONEachRow",
            quote_ident(&params.table),
            columns
        );

        let mut body = String::new();
        for row in &params.values {
            body.push_str(&serde_json::to_string(row)?);
            body.push('\n');
        }

        let mut url_params = self.url_params(&QueryParams {
            settings: params.settings.clone(),
            ..Default::default()
        });
        url_params.push(("query".to_string(), statement));
        let (query_id, _) = self.send(url_params, body).await?;
        Ok(InsertResult {
            query_id,
            executed: true,
        })
    }

    async fn command(&self, params: QueryParams) -> Result<CommandResult> {
        let url_params = self.url_params(&params);
        let (query_id, _) = self.send(url_params, params.query).await?;
        Ok(CommandResult { query_id })
    }

    async fn exec(&self, params: QueryParams) -> Result<ExecResult> {
        let url_params = self.url_params(&params);
        let (query_id, body) = self.send(url_params, params.query).await?;
        Ok(ExecResult { query_id, body })
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        let response = self
            .http
            .get(format!("{}/ping", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ChronicleError::ClientError(format!(
                "ping returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Creates [`HttpClient`] handles.
#[derive(Debug, Default, Clone)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn create(&self, name: &str, config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
        Ok(Arc::new(HttpClient::new(name, config)?))
    }
}

/// Render a bound parameter in the text form the server parses.
fn format_param(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "\\N".to_string(),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(format_nested).collect::<Vec<_>>().join(",")
        ),
        other => other.to_string(),
    }
}

fn format_nested(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Null => "NULL".to_string(),
        other => format_param(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_param_scalars() {
        assert_eq!(format_param(&json!("name")), "name");
        assert_eq!(format_param(&json!(3)), "3");
        assert_eq!(format_param(&json!(true)), "true");
        assert_eq!(format_param(&Value::Null), "\\N");
    }

    #[test]
    fn test_format_param_arrays() {
        assert_eq!(format_param(&json!(["a", "b'c"])), "['a','b\\'c']");
        assert_eq!(format_param(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_url_params_include_bindings_and_settings() {
        let client = HttpClient::new("primary", &ConnectionConfig::default()).unwrap();
        let mut params = QueryParams::new("SELECT 1");
        params.query_params.insert("batch".to_string(), json!(2));
        params
            .settings
            .insert("mutations_sync".to_string(), "2".to_string());

        let url_params = client.url_params(&params);
        assert!(url_params.contains(&("database".to_string(), "default".to_string())));
        assert!(url_params.contains(&("param_batch".to_string(), "2".to_string())));
        assert!(url_params.contains(&("mutations_sync".to_string(), "2".to_string())));
    }

    #[tokio::test]
    async fn test_closed_client_rejects_calls() {
        let client = HttpClient::new("primary", &ConnectionConfig::default()).unwrap();
        client.close().await.unwrap();
        let err = client.command(QueryParams::new("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, ChronicleError::ConnectionClosed { .. }));
    }
}
