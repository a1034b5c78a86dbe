//! Method client and event reporting tests.
//!
//! Run with: cargo test --test method_test

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use chronicle_core::config::ConnectionConfig;
use chronicle_core::connection::ConnectionManager;
use chronicle_core::error::ChronicleError;
use chronicle_core::events::{DbEvent, Emitter, EventName, QueryPrinter};

use common::{FakeFactory, FakeServer};

fn setup(debug: bool) -> (ConnectionManager, Arc<Emitter>, Arc<FakeServer>) {
    let server = FakeServer::new();
    let emitter = Arc::new(Emitter::new());
    let manager = ConnectionManager::new(emitter.clone(), FakeFactory::new(server.clone()));
    manager.add(
        "primary",
        ConnectionConfig {
            debug,
            ..Default::default()
        },
    );
    (manager, emitter, server)
}

fn listen(emitter: &Emitter, name: EventName) -> Arc<Mutex<Vec<DbEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    emitter.on(name, move |event: &DbEvent| sink.lock().push(event.clone()));
    events
}

#[tokio::test]
async fn test_debug_call_emits_timed_event() {
    let (manager, emitter, server) = setup(true);
    server.create_table("events");
    let events = listen(&emitter, EventName::Command);
    let client = manager.client("primary").unwrap();

    client
        .command("TRUNCATE TABLE events")
        .reporter_data(json!({ "source": "test" }))
        .execute()
        .await
        .unwrap();

    let events = events.lock();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.connection, "primary");
    assert_eq!(event.query.as_deref(), Some("TRUNCATE TABLE events"));
    assert!(event.duration.is_some());
    assert!(event.error.is_none());
    assert_eq!(event.reporter_data, Some(json!({ "source": "test" })));
}

#[tokio::test]
async fn test_no_event_without_debug() {
    let (manager, emitter, _server) = setup(false);
    let events = listen(&emitter, EventName::Query);
    let client = manager.client("primary").unwrap();

    client.query("EXISTS TABLE `events`").execute().await.unwrap();

    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn test_per_call_debug_override() {
    let (manager, emitter, _server) = setup(false);
    let events = listen(&emitter, EventName::Query);
    let client = manager.client("primary").unwrap();

    client
        .query("EXISTS TABLE `events`")
        .debug(true)
        .execute()
        .await
        .unwrap();

    assert_eq!(events.lock().len(), 1);
}

#[tokio::test]
async fn test_failed_call_reports_error_and_propagates() {
    let (manager, emitter, _server) = setup(true);
    let events = listen(&emitter, EventName::Command);
    let client = manager.client("primary").unwrap();

    let result = client.command("CREATE TABLE FAIL").execute().await;

    assert!(matches!(result, Err(ChronicleError::ClientError(_))));
    let events = events.lock();
    assert_eq!(events.len(), 1);
    assert!(events[0].error.as_deref().unwrap().contains("Syntax error"));
}

#[tokio::test]
async fn test_insert_event_carries_table_and_rows() {
    let (manager, emitter, server) = setup(true);
    server.create_table("users");
    let events = listen(&emitter, EventName::Insert);
    let client = manager.client("primary").unwrap();

    client
        .insert("users")
        .values(vec![json!({ "id": 1 }), json!({ "id": 2 })])
        .execute()
        .await
        .unwrap();

    let events = events.lock();
    assert_eq!(events[0].table.as_deref(), Some("users"));
    assert_eq!(events[0].bindings, Some(json!([{ "id": 1 }, { "id": 2 }])));
    assert_eq!(server.rows("users").len(), 2);
}

#[tokio::test]
async fn test_builders_are_lazy_and_repeatable() {
    let (manager, _emitter, server) = setup(false);
    server.create_table("users");
    let client = manager.client("primary").unwrap();

    let command = client.command("INSERT INTO users VALUES (1)");
    assert!(server.rows("users").is_empty());

    command.execute().await.unwrap();
    command.execute().await.unwrap();
    assert_eq!(server.rows("users").len(), 2);
}

#[tokio::test]
async fn test_ping_never_errors() {
    let (manager, _emitter, server) = setup(false);
    let client = manager.client("primary").unwrap();

    assert!(client.ping().execute().await.success);

    server
        .fail_ping
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let result = client.ping().execute().await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Connection refused"));
}

#[tokio::test]
async fn test_calls_after_close_fail() {
    let (manager, _emitter, _server) = setup(false);
    let client = manager.client("primary").unwrap();

    manager.close("primary", false).await;

    assert!(matches!(
        client.query("EXISTS TABLE `x`").execute().await,
        Err(ChronicleError::ConnectionClosed { .. })
    ));
}

#[test]
fn test_query_printer_format() {
    let mut event = DbEvent::new(EventName::Query, "primary");
    event.query = Some("SELECT 1".to_string());
    event.duration = Some(std::time::Duration::from_millis(12));

    let line = QueryPrinter::format(&event);
    assert!(line.contains("primary"));
    assert!(line.contains("SELECT 1"));
}
