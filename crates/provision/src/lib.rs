// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hublink: remote-access provisioning for a local home hub.
//!
//! Proves the operator with an email step-up, takes a short-lived lease,
//! fetches ephemeral hub credentials, drives a confined browser session on
//! the hub to read its remote URL, then saves and checks that URL.

pub mod backend;
pub mod capture;
pub mod config;
pub mod confine;
pub mod error;
pub mod flow;
pub mod hub;
pub mod lease;
pub mod persist;
pub mod renderer;
pub mod secrets;
pub mod state;
pub mod stepup;
pub mod test_support;
pub mod transport;

use std::sync::{Arc, Once};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::backend::http::HttpBackend;
use crate::config::ProvisionConfig;
use crate::flow::{Collaborators, Provisioner};
use crate::hub::HttpReachability;
use crate::lease::SystemClock;
use crate::state::AppState;
use crate::transport::bridge::WsRenderer;
use crate::transport::build_router;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &ProvisionConfig) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Wire the production collaborators into shared state.
pub fn build_state(config: ProvisionConfig, shutdown: CancellationToken) -> Arc<AppState> {
    let backend = Arc::new(HttpBackend::new(
        config.backend_url.clone(),
        config.backend_token.clone(),
        config.request_timeout(),
    ));
    let reach = Arc::new(HttpReachability::new(
        config.hub_url.clone(),
        config.hub_token.clone(),
        config.hub_probe_timeout(),
        config.url_probe_timeout(),
    ));
    let renderer = Arc::new(WsRenderer::new(config.renderer_attach_timeout()));
    let provisioner = Provisioner::new(
        config.clone(),
        Collaborators {
            backend,
            reach,
            renderer: renderer.clone(),
            clock: Arc::new(SystemClock::new()),
        },
        shutdown.clone(),
    );
    Arc::new(AppState::new(config, provisioner, renderer, shutdown))
}

/// Run the provisioning daemon until Ctrl-C.
pub async fn run(config: ProvisionConfig) -> anyhow::Result<()> {
    ensure_crypto();
    // Fail fast on a hub URL the confinement policy cannot use.
    config.allowed_hosts()?;

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let state = build_state(config, shutdown.clone());
    state.provisioner.watch_home();

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
            }
            shutdown.cancel();
        });
    }

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("hublink listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;

    state.provisioner.logout();
    Ok(())
}
