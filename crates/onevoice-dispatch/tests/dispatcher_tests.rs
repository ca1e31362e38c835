//! End-to-end dispatcher tests against a local stand-in for the
//! command-execution service.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::mpsc;
use tokio::time::timeout;

use onevoice_coordination::{CoordinationContext, CoordinationHandle};
use onevoice_dispatch::{
    AllowList, CommandClient, CommandDispatcher, OutboundMessage, OutboundQueue,
};
use onevoice_protocol::PeerId;

#[derive(Clone)]
struct ServiceState {
    hits: Arc<AtomicUsize>,
    fail_commands: bool,
}

async fn list_commands(State(_): State<ServiceState>) -> Json<Vec<String>> {
    Json(vec![
        "!roll <dice> - roll some dice".to_string(),
        "!balance - show your balance".to_string(),
        "!commands - list available commands".to_string(),
    ])
}

async fn execute_command(
    State(state): State<ServiceState>,
    Json(req): Json<serde_json::Value>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    if state.fail_commands {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let user = req["username"].as_str().unwrap_or("?").to_string();
    Json(serde_json::json!({ "reply": format!("@{user} rolled a 17") })).into_response()
}

async fn spawn_service(fail_commands: bool) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/commands", get(list_commands))
        .route("/command", post(execute_command))
        .with_state(ServiceState {
            hits: Arc::clone(&hits),
            fail_commands,
        });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (addr, hits)
}

/// A coordination handle that has already elected itself leader.
async fn leader_handle() -> CoordinationHandle {
    let now = Instant::now();
    let handle = CoordinationHandle::new(CoordinationContext::new(
        PeerId::new("a-self"),
        Duration::from_secs(35),
        now,
    ));
    handle.evaluate(now).await.expect("gate open");
    assert!(handle.is_leader().await);
    handle
}

/// A coordination handle that knows about a smaller-id incumbent and is
/// therefore standing by.
async fn standby_handle() -> CoordinationHandle {
    let now = Instant::now();
    let handle = CoordinationHandle::new(CoordinationContext::new(
        PeerId::new("b-self"),
        Duration::from_secs(35),
        now,
    ));
    handle.touch(PeerId::new("a-incumbent"), now).await;
    handle.evaluate(now).await.expect("gate open");
    assert!(!handle.is_leader().await);
    handle
}

struct Harness {
    dispatcher: CommandDispatcher,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    hits: Arc<AtomicUsize>,
}

async fn harness(coordination: CoordinationHandle, fail_commands: bool) -> Harness {
    let (addr, hits) = spawn_service(fail_commands).await;
    let client = Arc::new(CommandClient::new(format!("http://{addr}"), "test-key"));
    let allow_list = Arc::new(AllowList::new());
    let definitions = client.fetch_command_list().await.expect("fetch definitions");
    allow_list.replace_from_definitions(&definitions).await;

    let (outbound, outbound_rx) = OutboundQueue::bounded(64, 199, Duration::from_secs(1));
    let dispatcher = CommandDispatcher::new(coordination, allow_list, client, outbound, 4);
    Harness {
        dispatcher,
        outbound_rx,
        hits,
    }
}

async fn recv_text(rx: &mut mpsc::Receiver<OutboundMessage>) -> String {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("reply within deadline")
        .expect("queue open")
        .text
}

#[tokio::test]
async fn test_leader_executes_allowed_command() {
    let mut h = harness(leader_handle().await, false).await;
    h.dispatcher
        .dispatch("alice".into(), "roll".into(), vec!["d20".into()])
        .await;
    assert_eq!(recv_text(&mut h.outbound_rx).await, "@alice rolled a 17");
    assert_eq!(h.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_standby_drops_without_side_effects() {
    let mut h = harness(standby_handle().await, false).await;
    h.dispatcher
        .dispatch("alice".into(), "roll".into(), vec![])
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.outbound_rx.try_recv().is_err(), "standby must stay silent");
    assert_eq!(h.hits.load(Ordering::SeqCst), 0, "service must not be called");
}

#[tokio::test]
async fn test_unknown_verb_is_dropped() {
    let mut h = harness(leader_handle().await, false).await;
    h.dispatcher
        .dispatch("alice".into(), "selfdestruct".into(), vec![])
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(h.outbound_rx.try_recv().is_err());
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_service_failure_yields_apology_reply() {
    let mut h = harness(leader_handle().await, true).await;
    h.dispatcher
        .dispatch("alice".into(), "roll".into(), vec![])
        .await;
    let reply = recv_text(&mut h.outbound_rx).await;
    assert_eq!(reply, "@alice Sorry, the command server seems to be down.");
}

#[tokio::test]
async fn test_commands_meta_verb_lists_definitions() {
    let mut h = harness(leader_handle().await, false).await;
    h.dispatcher
        .dispatch("alice".into(), "commands".into(), vec![])
        .await;

    assert_eq!(
        recv_text(&mut h.outbound_rx).await,
        "@alice Fetching command list from server..."
    );
    assert_eq!(recv_text(&mut h.outbound_rx).await, "--- Available Commands ---");
    let mut definitions = Vec::new();
    loop {
        let line = recv_text(&mut h.outbound_rx).await;
        if line == "--------------------------" {
            break;
        }
        definitions.push(line);
    }
    assert_eq!(definitions.len(), 3);
    assert!(definitions[0].starts_with("!roll"));
    // The meta verb never touches the execution endpoint.
    assert_eq!(h.hits.load(Ordering::SeqCst), 0);
}
