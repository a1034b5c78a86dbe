//! Observer interface for method calls and connection lifecycle.
//!
//! Hooks register per [`EventName`]; the emitter calls them synchronously in
//! registration order. Closures taking `&DbEvent` are hooks too.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

/// Events the emitter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    Query,
    Insert,
    Command,
    Exec,
    Ping,
    ConnectionConnect,
    ConnectionError,
    ConnectionDisconnect,
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventName::Query => "clickhouse:query",
            EventName::Insert => "clickhouse:insert",
            EventName::Command => "clickhouse:command",
            EventName::Exec => "clickhouse:exec",
            EventName::Ping => "clickhouse:ping",
            EventName::ConnectionConnect => "clickhouse:connection:connect",
            EventName::ConnectionError => "clickhouse:connection:error",
            EventName::ConnectionDisconnect => "clickhouse:connection:disconnect",
        };
        f.write_str(name)
    }
}

/// Payload delivered to hooks.
#[derive(Debug, Clone)]
pub struct DbEvent {
    pub name: EventName,
    /// Connection the event belongs to.
    pub connection: String,
    /// Elapsed time, when the call was timed.
    pub duration: Option<Duration>,
    /// Statement text (query/command/exec).
    pub query: Option<String>,
    /// Bound parameters or inserted rows.
    pub bindings: Option<Value>,
    /// Target table (insert).
    pub table: Option<String>,
    /// Arbitrary data attached by the caller.
    pub reporter_data: Option<Value>,
    /// Failure message, if the call or lifecycle step failed.
    pub error: Option<String>,
}

impl DbEvent {
    pub fn new(name: EventName, connection: impl Into<String>) -> Self {
        Self {
            name,
            connection: connection.into(),
            duration: None,
            query: None,
            bindings: None,
            table: None,
            reporter_data: None,
            error: None,
        }
    }
}

/// Hook for observing emitted events.
pub trait EventHook: Send + Sync {
    fn on_event(&self, event: &DbEvent);
}

impl<F> EventHook for F
where
    F: Fn(&DbEvent) + Send + Sync,
{
    fn on_event(&self, event: &DbEvent) {
        self(event)
    }
}

/// Fan-out of events to registered hooks.
#[derive(Default)]
pub struct Emitter {
    hooks: RwLock<HashMap<EventName, Vec<Arc<dyn EventHook>>>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook for one event.
    pub fn on(&self, name: EventName, hook: impl EventHook + 'static) {
        self.hooks.write().entry(name).or_default().push(Arc::new(hook));
    }

    /// Whether anything listens for `name`.
    pub fn has_listeners(&self, name: EventName) -> bool {
        self.hooks
            .read()
            .get(&name)
            .is_some_and(|hooks| !hooks.is_empty())
    }

    /// Drop every hook registered for `name`.
    pub fn clear(&self, name: EventName) {
        self.hooks.write().remove(&name);
    }

    pub fn emit(&self, event: DbEvent) {
        // Snapshot so hooks may register further hooks.
        let hooks: Vec<Arc<dyn EventHook>> = match self.hooks.read().get(&event.name) {
            Some(hooks) => hooks.clone(),
            None => return,
        };
        for hook in hooks {
            hook.on_event(&event);
        }
    }
}

/// Logs debug queries as `[query] "connection" (duration) sql bindings`.
pub struct QueryPrinter;

impl QueryPrinter {
    /// Events the printer subscribes to.
    pub const EVENTS: [EventName; 4] = [
        EventName::Query,
        EventName::Insert,
        EventName::Command,
        EventName::Exec,
    ];

    pub fn format(event: &DbEvent) -> String {
        let kind = match event.name {
            EventName::Query => "query",
            EventName::Insert => "insert",
            EventName::Command => "command",
            EventName::Exec => "exec",
            _ => "event",
        };
        let mut line = format!("[{}] \"{}\"", kind, event.connection);
        if let Some(duration) = event.duration {
            line.push_str(&format!(" ({:.2?})", duration));
        }
        if let Some(ref table) = event.table {
            line.push_str(&format!(" {}", table));
        }
        if let Some(ref query) = event.query {
            line.push_str(&format!(" {}", query.split_whitespace().collect::<Vec<_>>().join(" ")));
        }
        if let Some(ref bindings) = event.bindings {
            line.push_str(&format!(" {}", bindings));
        }
        if let Some(ref error) = event.error {
            line.push_str(&format!(" error={}", error));
        }
        line
    }
}

impl EventHook for QueryPrinter {
    fn on_event(&self, event: &DbEvent) {
        log::debug!("{}", QueryPrinter::format(event));
    }
}
