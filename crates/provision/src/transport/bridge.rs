// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws/renderer`: hands a confined browsing session to the web view that
//! attaches over WebSocket.
//!
//! The flow calls [`WsRenderer::launch`], which parks the session until a
//! renderer connects or the attach window closes. On connect the renderer
//! gets a `launch` frame, then page events flow in and agent commands flow
//! out as JSON text frames.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::backend::BoxFuture;
use crate::error::ApiError;
use crate::renderer::{
    AgentCommand, PageEvent, Renderer, RendererEnd, RendererLaunch, RendererSession,
};
use crate::state::AppState;
use crate::transport::auth;
use crate::transport::ws::WsQuery;

/// Frames sent to the renderer before page traffic starts.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HelloFrame<'a> {
    Launch {
        #[serde(flatten)]
        launch: &'a RendererLaunch,
    },
    Idle,
}

struct PendingLaunch {
    launch: RendererLaunch,
    end: RendererEnd,
    attached: oneshot::Sender<()>,
}

/// [`Renderer`] backed by a WebSocket client.
pub struct WsRenderer {
    pending: Mutex<Option<PendingLaunch>>,
    attach_timeout: Duration,
}

impl WsRenderer {
    pub fn new(attach_timeout: Duration) -> Self {
        Self { pending: Mutex::new(None), attach_timeout }
    }

    /// A launch is waiting for a renderer to attach.
    pub fn has_pending(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(|p| !p.attached.is_closed())
    }

    /// Claim the parked launch. Launches whose caller gave up are discarded.
    fn take_pending(&self) -> Option<PendingLaunch> {
        self.pending.lock().take().filter(|p| !p.attached.is_closed())
    }
}

impl Renderer for WsRenderer {
    fn launch(&self, launch: RendererLaunch) -> BoxFuture<'_, anyhow::Result<RendererSession>> {
        Box::pin(async move {
            let (session, end) = RendererSession::pair(32);
            let (attached_tx, attached_rx) = oneshot::channel();
            let replaced = self
                .pending
                .lock()
                .replace(PendingLaunch { launch, end, attached: attached_tx })
                .is_some();
            if replaced {
                tracing::debug!("replaced stale renderer launch");
            }
            tracing::info!("waiting for renderer to attach");

            match tokio::time::timeout(self.attach_timeout, attached_rx).await {
                Ok(Ok(())) => Ok(session),
                Ok(Err(_)) => anyhow::bail!("renderer launch abandoned"),
                Err(_) => {
                    self.pending.lock().take();
                    anyhow::bail!("no renderer attached within {:?}", self.attach_timeout)
                }
            }
        })
    }
}

/// `GET /ws/renderer`: WebSocket upgrade for the browsing session.
pub async fn ws_renderer_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if auth::validate_ws_token(query.token.as_deref(), state.config.auth_token.as_deref()).is_err()
    {
        return ApiError::Unauthorized.to_http_response("unauthorized").into_response();
    }
    ws.on_upgrade(move |socket| handle_renderer_connection(state, socket)).into_response()
}

async fn handle_renderer_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut ws_tx, ws_rx) = socket.split();

    let Some(pending) = state.renderer.take_pending() else {
        if let Ok(json) = serde_json::to_string(&HelloFrame::Idle) {
            let _ = ws_tx.send(Message::Text(json.into())).await;
        }
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    };
    let PendingLaunch { launch, end, attached } = pending;
    let RendererEnd { events, mut commands } = end;

    let Ok(json) = serde_json::to_string(&HelloFrame::Launch { launch: &launch }) else {
        return;
    };
    if ws_tx.send(Message::Text(json.into())).await.is_err() {
        return;
    }
    if attached.send(()).is_err() {
        // The flow stopped waiting between claim and hello.
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }
    tracing::info!("renderer attached");

    // Page events are pumped on their own task; commands never wait on the agent.
    let mut inbound = tokio::spawn(pump_page_events(ws_rx, events));
    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                let closing = matches!(cmd, AgentCommand::Close);
                if let Ok(json) = serde_json::to_string(&cmd) {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                if closing {
                    break;
                }
            }
            _ = &mut inbound => break,
        }
    }
    inbound.abort();

    let _ = ws_tx.send(Message::Close(None)).await;
    tracing::info!("renderer detached");
}

/// Decode renderer frames into page events until the socket or the agent
/// goes away. A closed socket is reported as [`PageEvent::Closed`].
async fn pump_page_events<S>(mut ws_rx: S, events: mpsc::Sender<PageEvent>)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<PageEvent>(&text) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                Err(e) => tracing::debug!(err = %e, "ignoring renderer frame"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    let _ = events.send(PageEvent::Closed { reason: Some("renderer disconnected".to_owned()) }).await;
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
