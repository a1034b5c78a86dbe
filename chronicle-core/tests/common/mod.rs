//! In-memory stand-in for a ClickHouse server.
//!
//! Understands the statements chronicle issues for its schema tables plus a
//! small subset of DDL/DML used by test scripts. Any statement containing
//! `FAIL` is rejected, which is how tests inject failures.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex_lite::Regex;
use serde_json::{json, Value};

use chronicle_core::client::{
    ClientFactory, CommandResult, DatabaseClient, ExecResult, InsertParams, InsertResult,
    QueryParams, QueryResult,
};
use chronicle_core::config::{ChronicleConfig, ConnectionConfig};
use chronicle_core::error::{ChronicleError, Result};
use chronicle_core::Chronicle;

static COUNTER: AtomicU64 = AtomicU64::new(0);

static EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^EXISTS TABLE `?([\w.]+)`?").unwrap());
static CREATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^CREATE TABLE (?:IF NOT EXISTS )?`?([\w.]+)`?").unwrap()
});
static DROP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^DROP TABLE (?:IF EXISTS )?`?([\w.]+)`?").unwrap()
});
static TRUNCATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^TRUNCATE TABLE (?:IF EXISTS )?`?([\w.]+)`?").unwrap()
});
static INSERT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^INSERT INTO `?([\w.]+)`?").unwrap());
static ALTER_DELETE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^ALTER TABLE `?([\w.]+)`?.* DELETE WHERE name = \{name:String\}").unwrap()
});
static ALTER_UPDATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^ALTER TABLE `?([\w.]+)`?.* UPDATE version = \{version:UInt32\}").unwrap()
});
static SELECT_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i) FROM `?([\w.]+)`?").unwrap());

/// Unique suffix for names that must not collide across tests.
pub fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// Shared state of the fake server. Every client created by a
/// [`FakeFactory`] talks to the same instance.
#[derive(Default)]
pub struct FakeServer {
    tables: Mutex<BTreeMap<String, Vec<Value>>>,
    statements: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_ping: AtomicBool,
    /// Milliseconds every `close` takes.
    pub close_delay_ms: AtomicU64,
    /// Milliseconds every query takes before it is answered.
    pub query_delay_ms: AtomicU64,
    pub clients_created: AtomicUsize,
    pub clients_closed: AtomicUsize,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.lock().contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.lock().keys().cloned().collect()
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.lock().get(table).cloned().unwrap_or_default()
    }

    /// Names recorded in a schema table, in id order.
    pub fn recorded(&self, table: &str) -> Vec<String> {
        let mut rows = self.rows(table);
        rows.sort_by_key(|r| as_u64(&r["id"]));
        rows.iter()
            .filter_map(|r| r["name"].as_str().map(str::to_string))
            .collect()
    }

    pub fn create_table(&self, name: &str) {
        self.tables.lock().entry(name.to_string()).or_default();
    }

    pub fn put_row(&self, table: &str, row: Value) {
        self.tables.lock().entry(table.to_string()).or_default().push(row);
    }

    /// Every statement received, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Statements that wrote something: DDL, mutations and inserts.
    pub fn writes(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| !s.starts_with("SELECT") && !s.starts_with("EXISTS"))
            .collect()
    }

    fn log(&self, statement: &str) {
        self.statements.lock().push(statement.trim().to_string());
    }

    fn reject_marked(&self, sql: &str) -> Result<()> {
        if sql.contains("FAIL") {
            return Err(ChronicleError::ClientError(format!(
                "Code: 62. DB::Exception: Syntax error near '{}'",
                sql.trim()
            )));
        }
        Ok(())
    }

    fn query(&self, params: &QueryParams) -> Result<Vec<Value>> {
        self.log(&params.query);
        let sql = strip_leading_comments(&params.query);
        self.reject_marked(sql)?;
        let tables = self.tables.lock();

        if let Some(caps) = EXISTS.captures(sql) {
            let exists = tables.contains_key(&caps[1]);
            return Ok(vec![json!({ "result": u8::from(exists) })]);
        }
        if sql.contains("FROM system.tables") {
            return Ok(tables.keys().map(|name| json!({ "name": name })).collect());
        }

        let table = SELECT_FROM
            .captures(sql)
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| ChronicleError::ClientError(format!("Unsupported query: {}", sql)))?;
        let rows = tables.get(&table).ok_or_else(|| {
            ChronicleError::ClientError(format!("Code: 60. Table {} does not exist", table))
        })?;

        if sql.starts_with("SELECT version") {
            return Ok(rows.iter().take(1).cloned().collect());
        }
        if sql.starts_with("SELECT max(batch)") {
            let max = rows.iter().map(|r| as_u64(&r["batch"])).max().unwrap_or(0);
            return Ok(vec![json!({ "batch": max })]);
        }
        if sql.starts_with("SELECT max(id)") {
            // 64-bit results come back quoted.
            let max = rows.iter().map(|r| as_u64(&r["id"])).max().unwrap_or(0);
            return Ok(vec![json!({ "id": max.to_string() })]);
        }
        if sql.contains("WHERE batch > {batch:Int32}") {
            let floor = params
                .query_params
                .get("batch")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let mut selected: Vec<Value> = rows
                .iter()
                .filter(|r| as_u64(&r["batch"]) as i64 > floor)
                .cloned()
                .collect();
            selected.sort_by_key(|r| std::cmp::Reverse(as_u64(&r["id"])));
            return Ok(selected);
        }
        if sql.starts_with("SELECT name") {
            let mut sorted = rows.clone();
            sorted.sort_by_key(|r| as_u64(&r["id"]));
            return Ok(sorted
                .iter()
                .map(|r| json!({ "name": r["name"] }))
                .collect());
        }
        Ok(rows.clone())
    }

    fn command(&self, params: &QueryParams) -> Result<()> {
        self.log(&params.query);
        let sql = strip_leading_comments(&params.query);
        self.reject_marked(sql)?;
        let mut tables = self.tables.lock();

        if let Some(caps) = CREATE.captures(sql) {
            let name = caps[1].to_string();
            if tables.contains_key(&name) {
                if sql.contains("IF NOT EXISTS") {
                    return Ok(());
                }
                return Err(ChronicleError::ClientError(format!(
                    "Code: 57. Table {} already exists",
                    name
                )));
            }
            tables.insert(name, Vec::new());
            return Ok(());
        }
        if let Some(caps) = DROP.captures(sql) {
            if tables.remove(&caps[1]).is_none() && !sql.contains("IF EXISTS") {
                return Err(ChronicleError::ClientError(format!(
                    "Code: 60. Table {} does not exist",
                    &caps[1]
                )));
            }
            return Ok(());
        }
        if let Some(caps) = TRUNCATE.captures(sql) {
            if let Some(rows) = tables.get_mut(&caps[1]) {
                rows.clear();
            }
            return Ok(());
        }
        if let Some(caps) = ALTER_DELETE.captures(sql) {
            let name = params.query_params.get("name").cloned().unwrap_or(Value::Null);
            if let Some(rows) = tables.get_mut(&caps[1]) {
                rows.retain(|r| r["name"] != name);
            }
            return Ok(());
        }
        if let Some(caps) = INSERT.captures(sql) {
            let rows = tables.get_mut(&caps[1]).ok_or_else(|| {
                ChronicleError::ClientError(format!("Code: 60. Table {} does not exist", &caps[1]))
            })?;
            rows.push(json!({ "statement": sql }));
            return Ok(());
        }
        if let Some(caps) = ALTER_UPDATE.captures(sql) {
            let version = params.query_params.get("version").cloned().unwrap_or(Value::Null);
            if let Some(rows) = tables.get_mut(&caps[1]) {
                for row in rows.iter_mut() {
                    row["version"] = version.clone();
                }
            }
            return Ok(());
        }
        Err(ChronicleError::ClientError(format!(
            "Code: 62. DB::Exception: Unsupported statement '{}'",
            sql
        )))
    }

    fn insert(&self, params: &InsertParams) -> Result<()> {
        self.log(&format!("INSERT INTO {}", params.table));
        let mut tables = self.tables.lock();
        let rows = tables.get_mut(&params.table).ok_or_else(|| {
            ChronicleError::ClientError(format!("Code: 60. Table {} does not exist", params.table))
        })?;
        for value in &params.values {
            let mut row = value.clone();
            if row.get("batch").is_some() && row.get("migration_time").is_none() {
                row["migration_time"] = json!(chrono::Utc::now()
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string());
            }
            rows.push(row);
        }
        Ok(())
    }
}

/// `sql` without the comments and whitespace in front of the first keyword.
fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim();
    loop {
        if rest.starts_with("--") {
            match rest.find('\n') {
                Some(pos) => rest = rest[pos + 1..].trim_start(),
                None => return "",
            }
        } else if let Some(body) = rest.strip_prefix("/*") {
            match body.find("*/") {
                Some(pos) => rest = body[pos + 2..].trim_start(),
                None => return "",
            }
        } else {
            return rest;
        }
    }
}

fn as_u64(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

/// One client handle onto a [`FakeServer`].
pub struct FakeClient {
    server: Arc<FakeServer>,
    closed: AtomicBool,
}

impl FakeClient {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChronicleError::ClientError("client is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseClient for FakeClient {
    async fn query(&self, params: QueryParams) -> Result<QueryResult> {
        self.ensure_open()?;
        let delay = self.server.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let rows = self.server.query(&params)?;
        Ok(QueryResult {
            query_id: None,
            rows,
        })
    }

    async fn insert(&self, params: InsertParams) -> Result<InsertResult> {
        self.ensure_open()?;
        if params.values.is_empty() {
            return Ok(InsertResult::default());
        }
        self.server.insert(&params)?;
        Ok(InsertResult {
            query_id: None,
            executed: true,
        })
    }

    async fn command(&self, params: QueryParams) -> Result<CommandResult> {
        self.ensure_open()?;
        self.server.command(&params)?;
        Ok(CommandResult::default())
    }

    async fn exec(&self, params: QueryParams) -> Result<ExecResult> {
        self.ensure_open()?;
        self.server.command(&params)?;
        Ok(ExecResult::default())
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        if self.server.fail_ping.load(Ordering::SeqCst) {
            return Err(ChronicleError::ClientError("Connection refused".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let delay = self.server.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        if self.server.fail_close.load(Ordering::SeqCst) {
            return Err(ChronicleError::ClientError("socket hang up".to_string()));
        }
        self.server.clients_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out [`FakeClient`]s bound to one server.
pub struct FakeFactory {
    pub server: Arc<FakeServer>,
}

impl FakeFactory {
    pub fn new(server: Arc<FakeServer>) -> Arc<Self> {
        Arc::new(Self { server })
    }
}

impl ClientFactory for FakeFactory {
    fn create(&self, _name: &str, _config: &ConnectionConfig) -> Result<Arc<dyn DatabaseClient>> {
        if self.server.fail_create.load(Ordering::SeqCst) {
            return Err(ChronicleError::ConfigError("invalid url".to_string()));
        }
        self.server.clients_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            server: self.server.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Default config rooted at `app_root`.
pub fn config_in(app_root: &Path) -> ChronicleConfig {
    ChronicleConfig {
        app_root: app_root.to_path_buf(),
        ..Default::default()
    }
}

/// A [`Chronicle`] over a fresh fake server.
pub fn chronicle_in(app_root: &Path) -> (Chronicle, Arc<FakeServer>) {
    chronicle_with(config_in(app_root))
}

pub fn chronicle_with(config: ChronicleConfig) -> (Chronicle, Arc<FakeServer>) {
    let server = FakeServer::new();
    let chronicle = Chronicle::with_factory(config, FakeFactory::new(server.clone()));
    (chronicle, server)
}

/// Write `content` to `app_root/relative`, creating parent directories.
pub fn write_script(app_root: &Path, relative: &str, content: &str) {
    let path = app_root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// A schema file creating `table` on up and dropping it on down.
pub fn table_script(table: &str) -> String {
    format!(
        "-- chronicle:up\nCREATE TABLE {table}${{on_cluster}} (id UInt64) ENGINE = MergeTree ORDER BY id;\n\n\
-- chronicle:down\nDROP TABLE {table}${{on_cluster}};\n"
    )
}
