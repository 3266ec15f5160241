// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the control API.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::NetworkMode;
use crate::error::ApiError;
use crate::flow::FlowSnapshot;
use crate::state::AppState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: String,
    pub renderer_waiting: bool,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub started: bool,
    #[serde(flatten)]
    pub snapshot: FlowSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ResendResponse {
    pub resent: bool,
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: NetworkMode,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        state: s.provisioner.state().name().to_owned(),
        renderer_waiting: s.renderer.has_pending(),
    })
}

/// `GET /api/v1/flow`
pub async fn flow_snapshot(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.provisioner.snapshot())
}

/// `POST /api/v1/flow/start`: no-op when a flow is already running.
pub async fn flow_start(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let started = s.provisioner.start();
    if !started {
        tracing::debug!("start ignored, flow already in flight");
    }
    Json(StartResponse { started, snapshot: s.provisioner.snapshot() })
}

/// `POST /api/v1/flow/cancel`
pub async fn flow_cancel(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    s.provisioner.cancel();
    Json(s.provisioner.snapshot())
}

/// `POST /api/v1/flow/resend`: only while waiting for email approval.
pub async fn flow_resend(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    match s.provisioner.resend().await {
        Ok(()) => Json(ResendResponse { resent: true }).into_response(),
        Err(e) => ApiError::Conflict.to_http_response(e.message).into_response(),
    }
}

/// `PUT /api/v1/session/mode`
pub async fn session_mode(
    State(s): State<Arc<AppState>>,
    Json(req): Json<ModeRequest>,
) -> impl IntoResponse {
    s.provisioner.set_mode(req.mode);
    Json(s.provisioner.snapshot())
}

/// `POST /api/v1/session/background`: secrets are wiped before this returns.
pub async fn session_background(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    s.provisioner.background();
    Json(s.provisioner.snapshot())
}

/// `POST /api/v1/session/foreground`
pub async fn session_foreground(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    s.provisioner.foreground();
    Json(s.provisioner.snapshot())
}

/// `POST /api/v1/session/logout`
pub async fn session_logout(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    s.provisioner.logout();
    Json(s.provisioner.snapshot())
}
