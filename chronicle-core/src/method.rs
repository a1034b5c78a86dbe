//! Instrumented method calls against a connection.
//!
//! `MethodClient` hands out builders. A builder does nothing until
//! `execute()` is awaited, and every `execute()` issues a new request.
//! Each call goes through [`MethodRunner`], which lets a
//! [`MethodReporter`] time it and emit one event when debugging is on and
//! someone listens.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::client::{
    CommandResult, ExecResult, InsertParams, InsertResult, PingResult, QueryParams, QueryResult,
};
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::Result;
use crate::events::{DbEvent, Emitter, EventName};

/// Times one call and reports it on completion.
pub struct MethodReporter {
    emitter: Arc<Emitter>,
    event: DbEvent,
    started: Option<Instant>,
}

impl MethodReporter {
    /// Start the timer only if `debug` is set and `event.name` has listeners.
    pub fn begin(emitter: Arc<Emitter>, event: DbEvent, debug: bool) -> Self {
        let started = (debug && emitter.has_listeners(event.name)).then(Instant::now);
        Self {
            emitter,
            event,
            started,
        }
    }

    pub fn is_timing(&self) -> bool {
        self.started.is_some()
    }

    /// Emit the event if the call was timed.
    pub fn end(mut self, error: Option<String>) {
        let Some(started) = self.started else {
            return;
        };
        self.event.duration = Some(started.elapsed());
        self.event.error = error;
        self.emitter.emit(self.event);
    }
}

/// Runs a call under a reporter without altering its outcome.
pub struct MethodRunner;

impl MethodRunner {
    pub async fn run<T, F>(reporter: MethodReporter, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = call.await;
        reporter.end(result.as_ref().err().map(|e| e.to_string()));
        result
    }
}

/// Entry point for method calls on one connection.
#[derive(Clone)]
pub struct MethodClient {
    connection: Arc<Connection>,
    emitter: Arc<Emitter>,
}

impl MethodClient {
    pub fn new(connection: Arc<Connection>, emitter: Arc<Emitter>) -> Self {
        Self {
            connection,
            emitter,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn connection_name(&self) -> &str {
        self.connection.name()
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        self.connection.config()
    }

    pub fn query(&self, sql: impl Into<String>) -> QueryMethod {
        QueryMethod {
            debug: self.config().debug,
            client: self.clone(),
            params: QueryParams::new(sql),
            reporter_data: None,
        }
    }

    pub fn insert(&self, table: impl Into<String>) -> InsertMethod {
        InsertMethod {
            debug: self.config().debug,
            client: self.clone(),
            params: InsertParams {
                table: table.into(),
                ..Default::default()
            },
            reporter_data: None,
        }
    }

    pub fn command(&self, sql: impl Into<String>) -> CommandMethod {
        CommandMethod {
            debug: self.config().debug,
            client: self.clone(),
            params: QueryParams::new(sql),
            reporter_data: None,
        }
    }

    pub fn exec(&self, sql: impl Into<String>) -> ExecMethod {
        ExecMethod {
            debug: self.config().debug,
            client: self.clone(),
            params: QueryParams::new(sql),
            reporter_data: None,
        }
    }

    pub fn ping(&self) -> PingMethod {
        PingMethod {
            debug: self.config().debug,
            client: self.clone(),
            reporter_data: None,
        }
    }

    fn reporter(
        &self,
        name: EventName,
        debug: bool,
        reporter_data: &Option<Value>,
        fill: impl FnOnce(&mut DbEvent),
    ) -> MethodReporter {
        let mut event = DbEvent::new(name, self.connection_name());
        event.reporter_data = reporter_data.clone();
        fill(&mut event);
        MethodReporter::begin(self.emitter.clone(), event, debug)
    }
}

/// Builder methods shared by every method type.
macro_rules! method_options {
    () => {
        /// Override the connection's debug flag for this call.
        pub fn debug(mut self, debug: bool) -> Self {
            self.debug = debug;
            self
        }

        /// Data passed through to the emitted event.
        pub fn reporter_data(mut self, data: Value) -> Self {
            self.reporter_data = Some(data);
            self
        }
    };
}

/// Builder methods for statement-carrying calls.
macro_rules! statement_options {
    () => {
        /// Bind `{key:Type}` in the statement.
        pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
            self.params.query_params.insert(key.into(), value.into());
            self
        }

        /// Apply a server setting to this request.
        pub fn setting(mut self, key: impl Into<String>, value: impl ToString) -> Self {
            self.params.settings.insert(key.into(), value.to_string());
            self
        }

        pub fn sql(&self) -> &str {
            &self.params.query
        }

        fn bindings(&self) -> Option<Value> {
            if self.params.query_params.is_empty() {
                return None;
            }
            serde_json::to_value(&self.params.query_params).ok()
        }
    };
}

/// A statement returning rows.
pub struct QueryMethod {
    client: MethodClient,
    params: QueryParams,
    debug: bool,
    reporter_data: Option<Value>,
}

impl QueryMethod {
    method_options!();
    statement_options!();

    pub async fn execute(&self) -> Result<QueryResult> {
        let reporter = self.client.reporter(EventName::Query, self.debug, &self.reporter_data, |e| {
            e.query = Some(self.params.query.clone());
            e.bindings = self.bindings();
        });
        MethodRunner::run(reporter, async {
            self.client
                .connection
                .client()?
                .query(self.params.clone())
                .await
        })
        .await
    }

    /// Execute and decode each JSONEachRow row into `T`.
    pub async fn rows<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.execute().await?.json()
    }
}

/// A JSONEachRow insert.
pub struct InsertMethod {
    client: MethodClient,
    params: InsertParams,
    debug: bool,
    reporter_data: Option<Value>,
}

impl InsertMethod {
    method_options!();

    pub fn values(mut self, values: Vec<Value>) -> Self {
        self.params.values = values;
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.params.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.settings.insert(key.into(), value.to_string());
        self
    }

    pub async fn execute(&self) -> Result<InsertResult> {
        let reporter = self.client.reporter(EventName::Insert, self.debug, &self.reporter_data, |e| {
            e.table = Some(self.params.table.clone());
            e.bindings = Some(Value::Array(self.params.values.clone()));
        });
        MethodRunner::run(reporter, async {
            self.client
                .connection
                .client()?
                .insert(self.params.clone())
                .await
        })
        .await
    }
}

/// A statement whose result is discarded.
pub struct CommandMethod {
    client: MethodClient,
    params: QueryParams,
    debug: bool,
    reporter_data: Option<Value>,
}

impl CommandMethod {
    method_options!();
    statement_options!();

    pub async fn execute(&self) -> Result<CommandResult> {
        let reporter = self.client.reporter(EventName::Command, self.debug, &self.reporter_data, |e| {
            e.query = Some(self.params.query.clone());
            e.bindings = self.bindings();
        });
        MethodRunner::run(reporter, async {
            self.client
                .connection
                .client()?
                .command(self.params.clone())
                .await
        })
        .await
    }
}

/// A statement returning its raw response.
pub struct ExecMethod {
    client: MethodClient,
    params: QueryParams,
    debug: bool,
    reporter_data: Option<Value>,
}

impl ExecMethod {
    method_options!();
    statement_options!();

    pub async fn execute(&self) -> Result<ExecResult> {
        let reporter = self.client.reporter(EventName::Exec, self.debug, &self.reporter_data, |e| {
            e.query = Some(self.params.query.clone());
            e.bindings = self.bindings();
        });
        MethodRunner::run(reporter, async {
            self.client
                .connection
                .client()?
                .exec(self.params.clone())
                .await
        })
        .await
    }
}

/// A reachability check. Failures come back inside [`PingResult`].
pub struct PingMethod {
    client: MethodClient,
    debug: bool,
    reporter_data: Option<Value>,
}

impl PingMethod {
    method_options!();

    pub async fn execute(&self) -> PingResult {
        let reporter = self
            .client
            .reporter(EventName::Ping, self.debug, &self.reporter_data, |_| {});
        let outcome = MethodRunner::run(reporter, async {
            self.client.connection.client()?.ping().await
        })
        .await;
        match outcome {
            Ok(()) => PingResult {
                success: true,
                error: None,
            },
            Err(e) => PingResult {
                success: false,
                error: Some(e.to_string()),
            },
        }
    }
}
