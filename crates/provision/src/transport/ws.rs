// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/flow`: live flow state for presentation clients.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::error::ApiError;
use crate::flow::FlowSnapshot;
use crate::state::AppState;
use crate::transport::auth;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// First frame on every connection.
#[derive(Debug, Serialize)]
struct SnapshotFrame<'a> {
    event: &'static str,
    snapshot: &'a FlowSnapshot,
}

/// Control messages a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ClientMessage {
    Start,
    Cancel,
    Resend,
}

/// `GET /ws/flow`: WebSocket upgrade for the flow event stream.
pub async fn ws_flow_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if auth::validate_ws_token(query.token.as_deref(), state.config.auth_token.as_deref()).is_err()
    {
        return ApiError::Unauthorized.to_http_response("unauthorized").into_response();
    }
    ws.on_upgrade(move |socket| handle_flow_connection(state, socket)).into_response()
}

async fn handle_flow_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.provisioner.subscribe();

    let snapshot = state.provisioner.snapshot();
    let frame = SnapshotFrame { event: "snapshot", snapshot: &snapshot };
    if let Ok(json) = serde_json::to_string(&frame) {
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = events.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "flow client lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if let Ok(json) = serde_json::to_string(&event) {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_client_message(&state, &text).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
        }
    }
}

async fn handle_client_message(state: &AppState, text: &str) {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(err = %e, "ignoring flow client message");
            return;
        }
    };
    match msg {
        ClientMessage::Start => {
            state.provisioner.start();
        }
        ClientMessage::Cancel => state.provisioner.cancel(),
        ClientMessage::Resend => {
            if let Err(e) = state.provisioner.resend().await {
                tracing::debug!(err = %e, "resend from flow client failed");
            }
        }
    }
}
