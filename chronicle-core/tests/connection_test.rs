//! Connection and connection manager lifecycle tests.
//!
//! Run with: cargo test --test connection_test

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use chronicle_core::config::ConnectionConfig;
use chronicle_core::connection::{Connection, ConnectionEvent, ConnectionManager, ConnectionState};
use chronicle_core::error::ChronicleError;
use chronicle_core::events::{DbEvent, Emitter, EventName};

use common::{FakeFactory, FakeServer};

fn record_connection(connection: &Connection) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    connection.on(move |_: &Connection, event: &ConnectionEvent| sink.lock().push(event.clone()));
    events
}

fn record_emitter(emitter: &Emitter) -> Arc<Mutex<Vec<DbEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for name in [
        EventName::ConnectionConnect,
        EventName::ConnectionError,
        EventName::ConnectionDisconnect,
    ] {
        let sink = events.clone();
        emitter.on(name, move |event: &DbEvent| sink.lock().push(event.clone()));
    }
    events
}

fn names_of(events: &Mutex<Vec<DbEvent>>) -> Vec<EventName> {
    events.lock().iter().map(|e| e.name).collect()
}

fn manager(server: &Arc<FakeServer>) -> (ConnectionManager, Arc<Mutex<Vec<DbEvent>>>) {
    let emitter = Arc::new(Emitter::new());
    let events = record_emitter(&emitter);
    (
        ConnectionManager::new(emitter, FakeFactory::new(server.clone())),
        events,
    )
}

// ── Connection ──

#[tokio::test]
async fn test_connect_is_idempotent() {
    let server = FakeServer::new();
    let connection = Connection::new(
        "primary",
        Arc::new(ConnectionConfig::default()),
        FakeFactory::new(server.clone()),
    );
    let events = record_connection(&connection);

    connection.connect().unwrap();
    connection.connect().unwrap();

    assert!(connection.ready());
    assert_eq!(server.clients_created.load(Ordering::SeqCst), 1);
    assert_eq!(*events.lock(), vec![ConnectionEvent::Connect]);
}

#[tokio::test]
async fn test_connection_is_single_use() {
    let server = FakeServer::new();
    let connection = Connection::new(
        "primary",
        Arc::new(ConnectionConfig::default()),
        FakeFactory::new(server.clone()),
    );
    let events = record_connection(&connection);

    connection.connect().unwrap();
    connection.disconnect().await;

    assert!(!connection.ready());
    assert!(!connection.is_broken());
    assert_eq!(
        *events.lock(),
        vec![ConnectionEvent::Connect, ConnectionEvent::Disconnect]
    );
    assert!(matches!(
        connection.connect(),
        Err(ChronicleError::ConnectionClosed { .. })
    ));
    assert!(matches!(
        connection.client(),
        Err(ChronicleError::ConnectionClosed { .. })
    ));
}

#[tokio::test]
async fn test_disconnect_without_client_is_noop() {
    let server = FakeServer::new();
    let connection = Connection::new(
        "primary",
        Arc::new(ConnectionConfig::default()),
        FakeFactory::new(server.clone()),
    );
    let events = record_connection(&connection);

    connection.disconnect().await;

    assert!(events.lock().is_empty());
    // Never connected, so it may still connect.
    connection.connect().unwrap();
}

#[tokio::test]
async fn test_disconnect_failure_marks_broken() {
    let server = FakeServer::new();
    server.fail_close.store(true, Ordering::SeqCst);
    let connection = Connection::new(
        "primary",
        Arc::new(ConnectionConfig::default()),
        FakeFactory::new(server.clone()),
    );
    let events = record_connection(&connection);

    connection.connect().unwrap();
    connection.disconnect().await;

    assert!(connection.is_broken());
    assert!(!connection.ready());
    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], ConnectionEvent::Connect);
    assert!(matches!(events[1], ConnectionEvent::DisconnectError(ref msg) if msg.contains("socket hang up")));
}

#[tokio::test]
async fn test_connect_failure_emits_error() {
    let server = FakeServer::new();
    server.fail_create.store(true, Ordering::SeqCst);
    let connection = Connection::new(
        "primary",
        Arc::new(ConnectionConfig::default()),
        FakeFactory::new(server.clone()),
    );
    let events = record_connection(&connection);

    assert!(connection.connect().is_err());
    assert!(!connection.ready());
    assert!(matches!(events.lock()[..], [ConnectionEvent::Error(_)]));
}

#[tokio::test]
async fn test_connection_ids_are_unique() {
    let server = FakeServer::new();
    let config = Arc::new(ConnectionConfig::default());
    let a = Connection::new("same", config.clone(), FakeFactory::new(server.clone()));
    let b = Connection::new("same", config, FakeFactory::new(server));
    assert_ne!(a.id(), b.id());
}

// ── ConnectionManager ──

#[tokio::test]
async fn test_add_keeps_first_registration() {
    let server = FakeServer::new();
    let (manager, _) = manager(&server);

    manager.add("b", ConnectionConfig::default());
    manager.add(
        "a",
        ConnectionConfig {
            database: "first".to_string(),
            ..Default::default()
        },
    );
    manager.add(
        "a",
        ConnectionConfig {
            database: "second".to_string(),
            ..Default::default()
        },
    );

    assert!(manager.has("a"));
    assert_eq!(manager.names(), vec!["a", "b"]);
    let node = manager.get("a").unwrap();
    assert_eq!(node.config.database, "first");
    assert_eq!(node.state, ConnectionState::Registered);
    assert!(node.connection.is_none());
    assert_eq!(server.clients_created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connect_unknown_name() {
    let server = FakeServer::new();
    let (manager, _) = manager(&server);
    assert!(matches!(
        manager.connect("missing"),
        Err(ChronicleError::UnmanagedConnection { ref name }) if name == "missing"
    ));
}

#[tokio::test]
async fn test_connect_opens_once() {
    let server = FakeServer::new();
    let (manager, events) = manager(&server);
    manager.add("primary", ConnectionConfig::default());

    manager.connect("primary").unwrap();
    manager.connect("primary").unwrap();
    let _client = manager.client("primary").unwrap();

    assert!(manager.is_connected("primary"));
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Open);
    assert_eq!(server.clients_created.load(Ordering::SeqCst), 1);
    assert_eq!(names_of(&events), vec![EventName::ConnectionConnect]);
    assert_eq!(events.lock()[0].connection, "primary");
}

#[tokio::test]
async fn test_connect_failure_leaves_node_reconnectable() {
    let server = FakeServer::new();
    let (manager, events) = manager(&server);
    manager.add("primary", ConnectionConfig::default());

    server.fail_create.store(true, Ordering::SeqCst);
    assert!(manager.connect("primary").is_err());
    assert_eq!(names_of(&events), vec![EventName::ConnectionError]);
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Registered);

    server.fail_create.store(false, Ordering::SeqCst);
    manager.connect("primary").unwrap();
    assert!(manager.is_connected("primary"));
}

#[tokio::test]
async fn test_close_keeps_node_and_allows_reconnect() {
    let server = FakeServer::new();
    let (manager, events) = manager(&server);
    manager.add("primary", ConnectionConfig::default());
    manager.connect("primary").unwrap();

    manager.close("primary", false).await;

    let node = manager.get("primary").unwrap();
    assert_eq!(node.state, ConnectionState::Closed);
    assert!(node.connection.is_none());
    assert!(!manager.is_connected("primary"));
    assert_eq!(
        names_of(&events),
        vec![EventName::ConnectionConnect, EventName::ConnectionDisconnect]
    );

    manager.connect("primary").unwrap();
    assert!(manager.is_connected("primary"));
    assert_eq!(server.clients_created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_close_registered_node_is_noop() {
    let server = FakeServer::new();
    let (manager, events) = manager(&server);
    manager.add("primary", ConnectionConfig::default());

    manager.close("primary", false).await;
    manager.close("unknown", false).await;

    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Registered);
    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn test_release_forgets_node() {
    let server = FakeServer::new();
    let (manager, _) = manager(&server);
    manager.add("primary", ConnectionConfig::default());
    manager.connect("primary").unwrap();

    manager.release("primary").await;

    assert!(!manager.has("primary"));
    assert!(matches!(
        manager.connect("primary"),
        Err(ChronicleError::UnmanagedConnection { .. })
    ));
    assert_eq!(server.clients_closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_close_marks_node_broken() {
    let server = FakeServer::new();
    let (manager, events) = manager(&server);
    manager.add("primary", ConnectionConfig::default());
    manager.connect("primary").unwrap();

    server.fail_close.store(true, Ordering::SeqCst);
    manager.close("primary", false).await;

    let node = manager.get("primary").unwrap();
    assert_eq!(node.state, ConnectionState::Broken);
    assert!(node.connection.is_none());
    assert_eq!(
        names_of(&events),
        vec![EventName::ConnectionConnect, EventName::ConnectionError]
    );
    assert!(events.lock()[1].error.is_some());

    // A broken node gets a brand new connection on the next connect.
    server.fail_close.store(false, Ordering::SeqCst);
    manager.connect("primary").unwrap();
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Open);
}

#[tokio::test]
async fn test_patch_registered_node_replaces_config() {
    let server = FakeServer::new();
    let (manager, _) = manager(&server);
    manager.add("primary", ConnectionConfig::default());

    manager.patch(
        "primary",
        ConnectionConfig {
            database: "analytics".to_string(),
            ..Default::default()
        },
    );

    assert_eq!(manager.get("primary").unwrap().config.database, "analytics");
    assert_eq!(manager.orphan_count(), 0);
}

#[tokio::test]
async fn test_patch_unknown_name_registers_it() {
    let server = FakeServer::new();
    let (manager, _) = manager(&server);

    manager.patch("late", ConnectionConfig::default());

    assert!(manager.has("late"));
    assert_eq!(manager.get("late").unwrap().state, ConnectionState::Registered);
}

#[tokio::test]
async fn test_patch_open_node_drains_previous_client() {
    let server = FakeServer::new();
    server.close_delay_ms.store(30, Ordering::SeqCst);
    let (manager, events) = manager(&server);
    manager.add("primary", ConnectionConfig::default());
    manager.connect("primary").unwrap();

    manager.patch(
        "primary",
        ConnectionConfig {
            database: "analytics".to_string(),
            ..Default::default()
        },
    );

    // The replacement is visible straight away.
    let node = manager.get("primary").unwrap();
    assert_eq!(node.config.database, "analytics");
    assert_eq!(node.state, ConnectionState::Registered);
    assert!(node.connection.is_none());
    assert_eq!(manager.orphan_count(), 1);

    manager.connect("primary").unwrap();
    assert_eq!(server.clients_created.load(Ordering::SeqCst), 2);

    manager.close_all(false).await;

    assert_eq!(manager.orphan_count(), 0);
    assert_eq!(server.clients_closed.load(Ordering::SeqCst), 2);
    let disconnects = names_of(&events)
        .into_iter()
        .filter(|n| *n == EventName::ConnectionDisconnect)
        .count();
    assert_eq!(disconnects, 2);
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Closed);
}

#[tokio::test]
async fn test_patch_during_running_query() {
    let server = FakeServer::new();
    server.query_delay_ms.store(50, Ordering::SeqCst);
    server.close_delay_ms.store(20, Ordering::SeqCst);
    let (manager, _) = manager(&server);
    manager.add("primary", ConnectionConfig::default());
    let client = manager.client("primary").unwrap();
    let query = client.query("EXISTS TABLE `events`");

    let (result, ()) = tokio::join!(query.execute(), async {
        // Let the query reach the old handle first.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        manager.patch(
            "primary",
            ConnectionConfig {
                database: "analytics".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(manager.get("primary").unwrap().config.database, "analytics");
        assert_eq!(manager.orphan_count(), 1);

        manager.close_all(false).await;

        assert_eq!(manager.orphan_count(), 0);
        assert_eq!(server.clients_closed.load(Ordering::SeqCst), 1);
    });

    let result = result.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(server.clients_created.load(Ordering::SeqCst), 1);
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Registered);
}

#[tokio::test]
async fn test_orphan_disconnect_leaves_replacement_alone() {
    let server = FakeServer::new();
    let (manager, _) = manager(&server);
    manager.add("primary", ConnectionConfig::default());
    manager.connect("primary").unwrap();
    manager.patch("primary", ConnectionConfig::default());
    manager.connect("primary").unwrap();

    manager.close_all(false).await;
    // Drained orphans never touch the node that replaced them.
    assert_eq!(server.clients_closed.load(Ordering::SeqCst), 2);

    manager.connect("primary").unwrap();
    assert!(manager.is_connected("primary"));
}

#[tokio::test]
async fn test_close_all_release() {
    let server = FakeServer::new();
    let (manager, events) = manager(&server);
    manager.add("a", ConnectionConfig::default());
    manager.add("b", ConnectionConfig::default());
    manager.add("idle", ConnectionConfig::default());
    manager.connect("a").unwrap();
    manager.connect("b").unwrap();

    manager.close_all(true).await;

    assert!(manager.names().is_empty());
    assert_eq!(server.clients_closed.load(Ordering::SeqCst), 2);
    let disconnects = names_of(&events)
        .into_iter()
        .filter(|n| *n == EventName::ConnectionDisconnect)
        .count();
    assert_eq!(disconnects, 2);
}

#[tokio::test]
async fn test_migrating_state_round_trip() {
    let server = FakeServer::new();
    let (manager, _) = manager(&server);
    manager.add("primary", ConnectionConfig::default());

    // Only an open node can start migrating.
    manager.begin_migrating("primary");
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Registered);

    manager.connect("primary").unwrap();
    manager.begin_migrating("primary");
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Migrating);
    assert!(manager.is_connected("primary"));
    // Connecting a migrating node does not replace its client.
    manager.connect("primary").unwrap();
    assert_eq!(server.clients_created.load(Ordering::SeqCst), 1);

    manager.end_migrating("primary");
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Open);

    manager.begin_migrating("primary");
    manager.close("primary", false).await;
    assert_eq!(manager.get("primary").unwrap().state, ConnectionState::Closed);
}
