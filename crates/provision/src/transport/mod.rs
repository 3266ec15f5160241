// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket control surface for the provisioning daemon.

pub mod auth;
pub mod bridge;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the axum `Router` with all control routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(http::health))
        // Flow
        .route("/api/v1/flow", get(http::flow_snapshot))
        .route("/api/v1/flow/start", post(http::flow_start))
        .route("/api/v1/flow/cancel", post(http::flow_cancel))
        .route("/api/v1/flow/resend", post(http::flow_resend))
        // Session lifecycle
        .route("/api/v1/session/mode", put(http::session_mode))
        .route("/api/v1/session/background", post(http::session_background))
        .route("/api/v1/session/foreground", post(http::session_foreground))
        .route("/api/v1/session/logout", post(http::session_logout))
        // WebSocket
        .route("/ws/flow", get(ws::ws_flow_handler))
        .route("/ws/renderer", get(bridge::ws_renderer_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
