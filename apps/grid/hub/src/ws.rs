//! Monitor WebSocket endpoint.
//!
//! `GET /ws/monitor?token=...` upgrades to a session that speaks
//! discriminated JSON messages:
//!
//! Incoming: `subscribe {topics, filters?}`, `heartbeat`,
//! `resync_request {since_timestamp, max_events?}`, `request_snapshot`.
//! Outgoing: every lifecycle event, `heartbeat_ack`, `resync_response`,
//! `full_state_snapshot`.

use crate::broadcast::MonitorFilters;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Messages a monitor sends to the hub.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IncomingMessage {
    Subscribe {
        topics: Vec<String>,
        #[serde(default)]
        filters: Option<MonitorFilters>,
    },
    Heartbeat,
    ResyncRequest {
        since_timestamp: i64,
        #[serde(default)]
        max_events: Option<usize>,
    },
    RequestSnapshot,
}

pub async fn monitor_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    // Token check happens on upgrade, before any socket exists.
    if let Some(expected) = &state.config.monitor_auth_token {
        if params.token.as_deref() != Some(expected.as_str()) {
            warn!("Monitor connection rejected: bad token");
            return axum::http::StatusCode::UNAUTHORIZED.into_response();
        }
    }

    ws.on_upgrade(move |socket| monitor_session(socket, state))
}

async fn monitor_session(socket: WebSocket, state: AppState) {
    let monitor_id = Uuid::new_v4().to_string();
    let mut outbound = state.broadcaster.register(&monitor_id).await;
    let (mut sink, mut stream) = socket.split();

    // Drain the broadcaster queue into the socket.
    let forward_id = monitor_id.clone();
    let mut forward = tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sink.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
        debug!(monitor_id = %forward_id, "Monitor send task finished");
    });

    loop {
        tokio::select! {
            _ = &mut forward => break,
            message = stream.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Text(text) => {
                        handle_incoming(&state, &monitor_id, text.as_str()).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    forward.abort();
    state.broadcaster.unregister(&monitor_id).await;
    info!(monitor_id = %monitor_id, "Monitor session ended");
}

async fn handle_incoming(state: &AppState, monitor_id: &str, raw: &str) {
    let message: IncomingMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(e) => {
            debug!(monitor_id = %monitor_id, error = %e, "Ignoring malformed monitor message");
            return;
        }
    };

    match message {
        IncomingMessage::Subscribe { topics, filters } => {
            state
                .broadcaster
                .subscribe(monitor_id, topics, filters)
                .await;
        }
        IncomingMessage::Heartbeat => {
            state.broadcaster.heartbeat(monitor_id).await;
        }
        IncomingMessage::ResyncRequest {
            since_timestamp,
            max_events,
        } => {
            let response = state
                .broadcaster
                .resync(since_timestamp, max_events)
                .await;
            match serde_json::to_string(&response) {
                Ok(payload) => {
                    state.broadcaster.send_to(monitor_id, payload).await;
                }
                Err(e) => warn!(error = %e, "Failed to serialize resync response"),
            }
        }
        IncomingMessage::RequestSnapshot => match state.snapshot().await {
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(payload) => {
                    state.broadcaster.send_to(monitor_id, payload).await;
                }
                Err(e) => warn!(error = %e, "Failed to serialize snapshot"),
            },
            Err(e) => warn!(error = %e, "Failed to assemble snapshot"),
        },
    }
}
