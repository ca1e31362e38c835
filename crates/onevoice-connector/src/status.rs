//! Observability snapshot and the status HTTP server.
//!
//! The snapshot is the only state the page serves; nothing here feeds back
//! into coordination except the allow-list refresh trigger, which is a
//! one-way signal to the supervisor.

use std::collections::VecDeque;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use onevoice_coordination::Transition;

const EVENT_LOG_CAP: usize = 20;

/// Read-only view served by the status page.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub session_id: String,
    pub last_command: String,
    pub last_message_sent: String,
    /// Recent events, newest first.
    pub recent_events: Vec<String>,
}

#[derive(Debug)]
struct StatusInner {
    status: String,
    started_at: DateTime<Utc>,
    session_id: String,
    last_command: String,
    last_message_sent: String,
    events: VecDeque<String>,
}

/// Cloneable handle to the shared snapshot.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    inner: Arc<RwLock<StatusInner>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StatusInner {
                status: "Initializing...".to_string(),
                started_at: Utc::now(),
                session_id: "N/A".to_string(),
                last_command: "None yet.".to_string(),
                last_message_sent: "None yet.".to_string(),
                events: VecDeque::new(),
            })),
        }
    }

    pub async fn set_status(&self, status: impl Into<String>) {
        self.inner.write().await.status = status.into();
    }

    pub async fn set_session_id(&self, id: impl Into<String>) {
        self.inner.write().await.session_id = id.into();
    }

    pub async fn record_command(&self, info: impl Into<String>) {
        self.inner.write().await.last_command = info.into();
    }

    pub async fn record_sent(&self, text: impl Into<String>) {
        self.inner.write().await.last_message_sent = text.into();
    }

    /// Timestamped event log entry, newest first, capped.
    pub async fn push_event(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(event = %message);
        let mut inner = self.inner.write().await;
        let stamped = format!("[{}] {message}", Utc::now().format("%H:%M:%S"));
        inner.events.push_front(stamped);
        inner.events.truncate(EVENT_LOG_CAP);
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read().await;
        StatusSnapshot {
            status: inner.status.clone(),
            started_at: inner.started_at,
            session_id: inner.session_id.clone(),
            last_command: inner.last_command.clone(),
            last_message_sent: inner.last_message_sent.clone(),
            recent_events: inner.events.iter().cloned().collect(),
        }
    }
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Record an election transition in the snapshot and event log.
pub async fn note_transition(status: &StatusHandle, transition: &Transition) {
    for peer in &transition.pruned {
        status
            .push_event(format!("Peer {} timed out.", peer.short()))
            .await;
    }
    let leader_short = transition
        .leader
        .as_ref()
        .map(|l| l.short().to_string())
        .unwrap_or_else(|| "none".to_string());
    if transition.promoted {
        status.push_event("Promoted to leader.").await;
        status.set_status("Leader: Running").await;
    } else if transition.demoted {
        status
            .push_event(format!("Demoted; current leader: {leader_short}."))
            .await;
        status
            .set_status(format!("Standby (leader: {leader_short})"))
            .await;
    } else if !transition.is_leader {
        status
            .set_status(format!("Standby (leader: {leader_short})"))
            .await;
    }
}

#[derive(Clone)]
struct AppState {
    status: StatusHandle,
    refresh_tx: mpsc::Sender<()>,
}

/// Serves the read-only snapshot and the allow-list refresh trigger.
pub struct StatusServer {
    bind_addr: String,
    status: StatusHandle,
    refresh_tx: mpsc::Sender<()>,
}

impl StatusServer {
    pub fn new(bind_addr: String, status: StatusHandle, refresh_tx: mpsc::Sender<()>) -> Self {
        Self {
            bind_addr,
            status,
            refresh_tx,
        }
    }

    pub async fn run(self) -> Result<(), anyhow::Error> {
        let app = Router::new()
            .route("/", get(index))
            .route("/api/status", get(api_status))
            .route("/api/commands/refresh", post(api_refresh))
            .with_state(AppState {
                status: self.status,
                refresh_tx: self.refresh_tx,
            });

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "status server listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn api_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot().await)
}

async fn api_refresh(State(state): State<AppState>) -> StatusCode {
    match state.refresh_tx.try_send(()) {
        // A refresh already pending counts as accepted.
        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => StatusCode::ACCEPTED,
        Err(mpsc::error::TrySendError::Closed(())) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let snap = state.status.snapshot().await;
    let events: String = snap
        .recent_events
        .iter()
        .map(|e| format!("<li>{}</li>", escape(e)))
        .collect();
    Html(format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"10\"><title>onevoice status</title>\
         <style>body{{font-family:monospace;background:#1e1e1e;color:#d4d4d4;padding:20px}}\
         h1{{color:#4ec9b0}}span.label{{color:#9cdcfe}}li{{margin:4px 0}}</style></head>\
         <body><h1>onevoice status</h1>\
         <p><span class=\"label\">Status:</span> {}</p>\
         <p><span class=\"label\">Session:</span> {}</p>\
         <p><span class=\"label\">Last command:</span> {}</p>\
         <p><span class=\"label\">Last message sent:</span> {}</p>\
         <h1>Recent events</h1><ul>{}</ul></body></html>",
        escape(&snap.status),
        escape(&snap.session_id),
        escape(&snap.last_command),
        escape(&snap.last_message_sent),
        events,
    ))
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_log_is_capped_newest_first() {
        let status = StatusHandle::new();
        for i in 0..30 {
            status.push_event(format!("event {i}")).await;
        }
        let snap = status.snapshot().await;
        assert_eq!(snap.recent_events.len(), EVENT_LOG_CAP);
        assert!(snap.recent_events[0].ends_with("event 29"));
        assert!(snap.recent_events[EVENT_LOG_CAP - 1].ends_with("event 10"));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_updates() {
        let status = StatusHandle::new();
        status.set_status("Leader: Running").await;
        status.set_session_id("loopback-1").await;
        status.record_command("!roll d20 (from alice)").await;
        status.record_sent("@alice rolled a 17").await;
        let snap = status.snapshot().await;
        assert_eq!(snap.status, "Leader: Running");
        assert_eq!(snap.session_id, "loopback-1");
        assert_eq!(snap.last_command, "!roll d20 (from alice)");
        assert_eq!(snap.last_message_sent, "@alice rolled a 17");
    }

    #[test]
    fn test_escape_neutralizes_markup() {
        assert_eq!(escape("<b>&"), "&lt;b&gt;&amp;");
    }
}
