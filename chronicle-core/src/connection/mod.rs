//! A single named connection and its client handle.

pub mod manager;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::client::{ClientFactory, DatabaseClient};
use crate::config::ConnectionConfig;
use crate::error::{ChronicleError, Result};

pub use manager::{ConnectionManager, ConnectionNode, ConnectionState};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle events of a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Error(String),
    Disconnect,
    DisconnectError(String),
}

/// Hook for connection lifecycle events.
pub trait ConnectionHook: Send + Sync {
    fn on_event(&self, connection: &Connection, event: &ConnectionEvent);
}

impl<F> ConnectionHook for F
where
    F: Fn(&Connection, &ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, connection: &Connection, event: &ConnectionEvent) {
        self(connection, event)
    }
}

/// Wraps one configuration and, once connected, one client handle.
///
/// Single use: after `disconnect` the instance cannot connect again.
pub struct Connection {
    id: u64,
    name: String,
    config: Arc<ConnectionConfig>,
    factory: Arc<dyn ClientFactory>,
    client: RwLock<Option<Arc<dyn DatabaseClient>>>,
    hooks: RwLock<Vec<Arc<dyn ConnectionHook>>>,
    disconnected: AtomicBool,
    broken: AtomicBool,
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        config: Arc<ConnectionConfig>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::SeqCst),
            name: name.into(),
            config,
            factory,
            client: RwLock::new(None),
            hooks: RwLock::new(Vec::new()),
            disconnected: AtomicBool::new(false),
            broken: AtomicBool::new(false),
        }
    }

    /// Process-unique id, distinguishes instances sharing a name.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    pub fn on(&self, hook: impl ConnectionHook + 'static) {
        self.hooks.write().push(Arc::new(hook));
    }

    /// Whether a client handle currently exists.
    pub fn ready(&self) -> bool {
        self.client.read().is_some()
    }

    /// Whether closing the handle failed; the instance is unusable.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    /// The live client handle.
    pub fn client(&self) -> Result<Arc<dyn DatabaseClient>> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| ChronicleError::ConnectionClosed {
                name: self.name.clone(),
            })
    }

    /// Create the client handle and emit `Connect`, or emit `Error` and
    /// return the failure.
    pub fn connect(&self) -> Result<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(ChronicleError::ConnectionClosed {
                name: self.name.clone(),
            });
        }
        if self.ready() {
            return Ok(());
        }

        match self.factory.create(&self.name, &self.config) {
            Ok(client) => {
                *self.client.write() = Some(client);
                log::debug!("Connection opened; connection={}", self.name);
                self.emit(&ConnectionEvent::Connect);
                Ok(())
            }
            Err(e) => {
                log::error!("Connection failed; connection={}, error={}", self.name, e);
                self.emit(&ConnectionEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Close the client handle. A no-op when none exists.
    ///
    /// On success emits `Disconnect`. If closing fails the handle is still
    /// dropped, the connection is marked broken and only `DisconnectError` is
    /// emitted. Either way listeners are removed afterwards.
    pub async fn disconnect(&self) {
        let client = self.client.write().take();
        let Some(client) = client else {
            return;
        };
        self.disconnected.store(true, Ordering::SeqCst);

        match client.close().await {
            Ok(()) => {
                log::debug!("Connection closed; connection={}", self.name);
                self.emit(&ConnectionEvent::Disconnect);
            }
            Err(e) => {
                self.broken.store(true, Ordering::SeqCst);
                log::warn!(
                    "Failed to close connection; connection={}, error={}",
                    self.name,
                    e
                );
                self.emit(&ConnectionEvent::DisconnectError(e.to_string()));
            }
        }
        self.hooks.write().clear();
    }

    fn emit(&self, event: &ConnectionEvent) {
        let hooks: Vec<Arc<dyn ConnectionHook>> = self.hooks.read().clone();
        for hook in hooks {
            hook.on_event(self, event);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("ready", &self.ready())
            .field("broken", &self.is_broken())
            .finish()
    }
}
