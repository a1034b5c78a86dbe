//! Registry of named connections.
//!
//! Nodes move `Registered -> Open -> Closing -> Closed`. Patching a live
//! node parks its connection in the orphan set while it drains, and
//! `close_all` waits for those drains too.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use super::{Connection, ConnectionEvent};
use crate::client::ClientFactory;
use crate::config::ConnectionConfig;
use crate::error::{ChronicleError, Result};
use crate::events::{DbEvent, Emitter, EventName};
use crate::method::MethodClient;

/// State of a [`ConnectionNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Registered,
    Migrating,
    Open,
    Closing,
    Closed,
    /// Closing the client failed; the node needs a fresh `connect`.
    Broken,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Registered => write!(f, "registered"),
            ConnectionState::Migrating => write!(f, "migrating"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closing => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Broken => write!(f, "broken"),
        }
    }
}

/// A registered connection as seen through [`ConnectionManager::get`].
#[derive(Debug, Clone)]
pub struct ConnectionNode {
    pub name: String,
    pub config: Arc<ConnectionConfig>,
    pub connection: Option<Arc<Connection>>,
    pub state: ConnectionState,
}

impl ConnectionNode {
    fn registered(name: &str, config: ConnectionConfig) -> Self {
        Self {
            name: name.to_string(),
            config: Arc::new(config),
            connection: None,
            state: ConnectionState::Registered,
        }
    }

    fn holds(&self, connection: &Connection) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.id() == connection.id())
    }
}

struct Orphan {
    node: ConnectionNode,
    drain: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<String, ConnectionNode>,
    orphans: HashMap<u64, Orphan>,
}

struct Shared {
    registry: Mutex<Registry>,
    emitter: Arc<Emitter>,
}

impl Shared {
    /// Apply a connection event to the registry, then re-emit it.
    fn handle(&self, connection: &Connection, event: &ConnectionEvent) {
        let out = match event {
            ConnectionEvent::Connect => DbEvent::new(EventName::ConnectionConnect, connection.name()),
            ConnectionEvent::Error(msg) | ConnectionEvent::DisconnectError(msg) => {
                let mut e = DbEvent::new(EventName::ConnectionError, connection.name());
                e.error = Some(msg.clone());
                e
            }
            ConnectionEvent::Disconnect => {
                DbEvent::new(EventName::ConnectionDisconnect, connection.name())
            }
        };

        {
            let mut registry = self.registry.lock();
            let orphaned = matches!(
                event,
                ConnectionEvent::Disconnect | ConnectionEvent::DisconnectError(_)
            ) && registry.orphans.remove(&connection.id()).is_some();

            if !orphaned {
                if let Some(node) = registry
                    .connections
                    .get_mut(connection.name())
                    .filter(|n| n.holds(connection))
                {
                    match event {
                        ConnectionEvent::Connect => node.state = ConnectionState::Open,
                        ConnectionEvent::Error(_) => node.connection = None,
                        ConnectionEvent::Disconnect => {
                            node.state = ConnectionState::Closed;
                            node.connection = None;
                        }
                        ConnectionEvent::DisconnectError(_) => {
                            node.state = ConnectionState::Broken;
                            node.connection = None;
                        }
                    }
                }
            }
        }

        self.emitter.emit(out);
    }
}

/// Owns every [`Connection`] lifecycle.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    factory: Arc<dyn ClientFactory>,
}

impl ConnectionManager {
    pub fn new(emitter: Arc<Emitter>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                emitter,
            }),
            factory,
        }
    }

    pub fn emitter(&self) -> &Arc<Emitter> {
        &self.shared.emitter
    }

    /// Register a connection. Does nothing if the name is already known.
    pub fn add(&self, name: &str, config: ConnectionConfig) {
        let mut registry = self.shared.registry.lock();
        if registry.connections.contains_key(name) {
            log::debug!("Connection already registered; connection={}", name);
            return;
        }
        registry
            .connections
            .insert(name.to_string(), ConnectionNode::registered(name, config));
    }

    /// Instantiate the connection for `name`. A no-op when already open.
    pub fn connect(&self, name: &str) -> Result<()> {
        let connection = {
            let mut registry = self.shared.registry.lock();
            let node = registry
                .connections
                .get_mut(name)
                .ok_or_else(|| ChronicleError::UnmanagedConnection {
                    name: name.to_string(),
                })?;
            // A held connection means open, migrating or mid-connect.
            if node.state == ConnectionState::Open || node.connection.is_some() {
                return Ok(());
            }
            let connection = Arc::new(Connection::new(
                name,
                node.config.clone(),
                self.factory.clone(),
            ));
            node.connection = Some(connection.clone());
            connection
        };

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        connection.on(move |conn: &Connection, event: &ConnectionEvent| {
            if let Some(shared) = shared.upgrade() {
                shared.handle(conn, event);
            }
        });

        connection.connect()
    }

    /// Connect `name` if needed and wrap it for method calls.
    pub fn client(&self, name: &str) -> Result<MethodClient> {
        self.connect(name)?;
        let connection = self
            .get(name)
            .and_then(|node| node.connection)
            .ok_or_else(|| ChronicleError::ConnectionClosed {
                name: name.to_string(),
            })?;
        Ok(MethodClient::new(connection, self.shared.emitter.clone()))
    }

    /// Move an open node to `Migrating` while a runner drives it.
    pub fn begin_migrating(&self, name: &str) {
        self.transition(name, ConnectionState::Open, ConnectionState::Migrating);
    }

    /// Hand a `Migrating` node back as `Open`.
    pub fn end_migrating(&self, name: &str) {
        self.transition(name, ConnectionState::Migrating, ConnectionState::Open);
    }

    fn transition(&self, name: &str, from: ConnectionState, to: ConnectionState) {
        let mut registry = self.shared.registry.lock();
        if let Some(node) = registry.connections.get_mut(name) {
            if node.state == from {
                node.state = to;
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<ConnectionNode> {
        self.shared.registry.lock().connections.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.shared.registry.lock().connections.contains_key(name)
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.shared
            .registry
            .lock()
            .connections
            .get(name)
            .is_some_and(|n| matches!(n.state, ConnectionState::Open | ConnectionState::Migrating))
    }

    /// Registered connection names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared
            .registry
            .lock()
            .connections
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of connections still draining after a patch.
    pub fn orphan_count(&self) -> usize {
        self.shared.registry.lock().orphans.len()
    }

    /// Replace the config for `name`.
    ///
    /// A live connection is moved to the orphan set and disconnected in the
    /// background; a fresh `Registered` node takes its place immediately.
    pub fn patch(&self, name: &str, config: ConnectionConfig) {
        let mut registry = self.shared.registry.lock();
        let Some(mut node) = registry.connections.remove(name) else {
            registry
                .connections
                .insert(name.to_string(), ConnectionNode::registered(name, config));
            return;
        };

        let Some(connection) = node.connection.clone() else {
            node.config = Arc::new(config);
            registry.connections.insert(name.to_string(), node);
            return;
        };

        node.state = ConnectionState::Closing;
        let drain = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let draining = connection.clone();
                Some(handle.spawn(async move { draining.disconnect().await }))
            }
            Err(_) => {
                log::debug!("No runtime to drain patched connection, deferring to close_all; connection={}", name);
                None
            }
        };
        log::debug!(
            "Patched connection, draining previous client; connection={}, id={}",
            name,
            connection.id()
        );
        registry
            .orphans
            .insert(connection.id(), Orphan { node, drain });
        registry
            .connections
            .insert(name.to_string(), ConnectionNode::registered(name, config));
    }

    /// Disconnect `name` if open; with `release`, also forget the node.
    pub async fn close(&self, name: &str, release: bool) {
        let connection = {
            let mut registry = self.shared.registry.lock();
            match registry.connections.get_mut(name) {
                Some(node)
                    if matches!(node.state, ConnectionState::Open | ConnectionState::Migrating) =>
                {
                    node.state = ConnectionState::Closing;
                    node.connection.clone()
                }
                _ => None,
            }
        };

        if let Some(connection) = connection {
            connection.disconnect().await;
        }

        let mut registry = self.shared.registry.lock();
        if release {
            registry.connections.remove(name);
        } else if let Some(node) = registry.connections.get_mut(name) {
            if node.state == ConnectionState::Closing {
                node.state = ConnectionState::Closed;
                node.connection = None;
            }
        }
    }

    /// Close every registered connection and wait for orphans to drain.
    pub async fn close_all(&self, release: bool) {
        let names = self.names();
        futures::future::join_all(names.iter().map(|name| self.close(name, release))).await;

        let draining: Vec<(u64, Option<Arc<Connection>>, Option<JoinHandle<()>>)> = {
            let mut registry = self.shared.registry.lock();
            registry
                .orphans
                .iter_mut()
                .map(|(id, orphan)| (*id, orphan.node.connection.clone(), orphan.drain.take()))
                .collect()
        };

        for (id, connection, drain) in draining {
            match drain {
                Some(handle) => {
                    if let Err(e) = handle.await {
                        log::warn!("Orphaned connection drain failed; id={}, error={}", id, e);
                    }
                }
                None => {
                    if let Some(connection) = connection {
                        connection.disconnect().await;
                    }
                }
            }
            self.shared.registry.lock().orphans.remove(&id);
        }
    }

    /// Close and forget `name`.
    pub async fn release(&self, name: &str) {
        self.close(name, true).await
    }
}
