// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use super::{spawn_reachability_monitor, HttpReachability, Reachability};
use crate::test_support::MockReachability;

async fn spawn_hub(router: Router) -> anyhow::Result<String> {
    crate::ensure_crypto();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

fn probe(url: String, token: Option<&str>) -> HttpReachability {
    HttpReachability::new(
        url,
        token.map(str::to_owned),
        Duration::from_secs(1),
        Duration::from_secs(1),
    )
}

async fn api(headers: HeaderMap) -> StatusCode {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer hub-token") => StatusCode::OK,
        _ => StatusCode::UNAUTHORIZED,
    }
}

#[tokio::test]
async fn hub_answering_counts_even_when_unauthorized() -> anyhow::Result<()> {
    let url = spawn_hub(Router::new().route("/api/", get(api))).await?;
    assert!(probe(url.clone(), Some("hub-token")).hub_reachable().await);
    assert!(probe(url, None).hub_reachable().await);
    Ok(())
}

#[tokio::test]
async fn hub_server_error_is_unreachable() -> anyhow::Result<()> {
    let router = Router::new().route("/api/", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    let url = spawn_hub(router).await?;
    assert!(!probe(url, None).hub_reachable().await);
    Ok(())
}

#[tokio::test]
async fn closed_port_is_unreachable() -> anyhow::Result<()> {
    crate::ensure_crypto();
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let reach = probe(format!("http://127.0.0.1:{port}"), None);
    assert!(!reach.hub_reachable().await);
    assert!(!reach.url_reachable(&format!("http://127.0.0.1:{port}/")).await);
    Ok(())
}

#[tokio::test]
async fn url_probe_treats_relay_errors_as_unverified() -> anyhow::Result<()> {
    let router = Router::new()
        .route("/up", get(|| async { "ok" }))
        .route("/login", get(|| async { StatusCode::UNAUTHORIZED }))
        .route("/down", get(|| async { StatusCode::BAD_GATEWAY }));
    let base = spawn_hub(router).await?;
    let reach = probe(base.clone(), None);
    assert!(reach.url_reachable(&format!("{base}/up")).await);
    assert!(reach.url_reachable(&format!("{base}/login")).await);
    assert!(!reach.url_reachable(&format!("{base}/down")).await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn monitor_reports_until_cancelled() {
    let reach = Arc::new(MockReachability::new(true, true));
    let seen = Arc::new(AtomicU32::new(0));
    let cancel = CancellationToken::new();
    {
        let seen = seen.clone();
        spawn_reachability_monitor(
            reach.clone(),
            Duration::from_secs(1),
            cancel.clone(),
            move |reachable| {
                if reachable {
                    seen.fetch_add(1, Ordering::Relaxed);
                }
            },
        );
    }

    // First tick is immediate, then one per second.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(seen.load(Ordering::Relaxed), 3);

    cancel.cancel();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(seen.load(Ordering::Relaxed), 3);
    assert_eq!(reach.hub_probes.load(Ordering::Relaxed), 3);
}
