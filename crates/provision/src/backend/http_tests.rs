// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::HttpBackend;
use crate::backend::{Backend, BackendError, ChallengeStatus};

fn envelope(code: &str, message: &str) -> Json<Value> {
    Json(json!({ "error": { "code": code, "message": message } }))
}

async fn start(headers: HeaderMap) -> impl IntoResponse {
    let authed = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "Bearer session-token");
    if !authed {
        return (StatusCode::UNAUTHORIZED, envelope("UNAUTHORIZED", "no session")).into_response();
    }
    Json(json!({ "challengeId": "ch-1" })).into_response()
}

async fn status(Path(id): Path<String>) -> impl IntoResponse {
    match id.as_str() {
        "pending" => Json(json!({ "status": "PENDING" })).into_response(),
        "approved" => Json(json!({ "status": "APPROVED" })).into_response(),
        "weird" => Json(json!({ "status": "SOMETHING_NEW" })).into_response(),
        "boom" => (StatusCode::BAD_GATEWAY, "upstream down").into_response(),
        _ => (StatusCode::NOT_FOUND, envelope("NOT_FOUND", "no such challenge")).into_response(),
    }
}

async fn lease() -> impl IntoResponse {
    Json(json!({ "leaseToken": "lt-1", "expiresAt": 1_700_000_300_000u64 }))
}

async fn secrets(Json(body): Json<Value>) -> impl IntoResponse {
    if body["leaseToken"] != "lt-1" {
        return (StatusCode::FORBIDDEN, envelope("STEP_UP_REQUIRED", "lease expired"))
            .into_response();
    }
    Json(json!({ "username": "svc", "password": "pw" })).into_response()
}

async fn cloud_url(Json(body): Json<Value>) -> impl IntoResponse {
    if body["url"] == "https://bad.ui.nabu.casa" {
        return (StatusCode::UNPROCESSABLE_ENTITY, envelope("INVALID_URL", "rejected url"))
            .into_response();
    }
    Json(json!({ "ok": true })).into_response()
}

async fn no_verification() -> impl IntoResponse {
    (StatusCode::FORBIDDEN, envelope("VERIFICATION_REQUIRED", "step up first"))
}

async fn spawn_backend(router: Router) -> anyhow::Result<String> {
    crate::ensure_crypto();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{addr}"))
}

fn full_router() -> Router {
    Router::new()
        .route("/step-up/start", post(start))
        .route("/challenge/{id}", get(status))
        .route("/challenge/{id}/complete", post(|| async { Json(json!({ "ok": true })) }))
        .route("/lease", post(lease))
        .route("/secrets", post(secrets))
        .route("/cloud-url", post(cloud_url))
}

async fn backend() -> anyhow::Result<HttpBackend> {
    let url = spawn_backend(full_router()).await?;
    Ok(HttpBackend::new(url, Some("session-token".into()), Duration::from_secs(2)))
}

#[tokio::test]
async fn start_returns_challenge_id() -> anyhow::Result<()> {
    let backend = backend().await?;
    assert_eq!(backend.start_step_up().await?, "ch-1");
    Ok(())
}

#[tokio::test]
async fn start_without_session_is_rejected() -> anyhow::Result<()> {
    let url = spawn_backend(full_router()).await?;
    let backend = HttpBackend::new(url, None, Duration::from_secs(2));
    let err = backend.start_step_up().await.err();
    assert!(matches!(err, Some(BackendError::Rejected { status: 401, .. })), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn challenge_statuses_parse() -> anyhow::Result<()> {
    let backend = backend().await?;
    assert_eq!(backend.challenge_status("pending").await?, ChallengeStatus::Pending);
    assert_eq!(backend.challenge_status("approved").await?, ChallengeStatus::Approved);
    // Unknown statuses fail closed.
    assert_eq!(backend.challenge_status("weird").await?, ChallengeStatus::NotFound);
    // A 404 is a status, not an error.
    assert_eq!(backend.challenge_status("gone").await?, ChallengeStatus::NotFound);
    Ok(())
}

#[tokio::test]
async fn server_errors_are_transient() -> anyhow::Result<()> {
    let backend = backend().await?;
    let err = backend.challenge_status("boom").await.err();
    assert!(err.as_ref().is_some_and(BackendError::is_transient), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn lease_then_secrets() -> anyhow::Result<()> {
    let backend = backend().await?;
    backend.complete_challenge("approved").await?;
    let grant = backend.mint_lease().await?;
    assert_eq!(grant.token.expose_secret(), "lt-1");
    assert_eq!(grant.expires_at_ms, 1_700_000_300_000);

    let creds = backend.fetch_secrets(&grant.token).await?;
    assert_eq!(creds.username().expose_secret(), "svc");
    assert_eq!(creds.password().expose_secret(), "pw");
    Ok(())
}

#[tokio::test]
async fn stale_lease_maps_to_step_up_required() -> anyhow::Result<()> {
    let backend = backend().await?;
    let stale = SecretString::from("lt-0".to_owned());
    let err = backend.fetch_secrets(&stale).await.err();
    assert_eq!(err, Some(BackendError::StepUpRequired));
    Ok(())
}

#[tokio::test]
async fn verification_required_code_is_recognized() -> anyhow::Result<()> {
    let url = spawn_backend(Router::new().route("/lease", post(no_verification))).await?;
    let backend = HttpBackend::new(url, None, Duration::from_secs(2));
    let err = backend.mint_lease().await.err();
    assert_eq!(err, Some(BackendError::VerificationRequired));
    Ok(())
}

#[tokio::test]
async fn save_cloud_url_surfaces_envelope_message() -> anyhow::Result<()> {
    let backend = backend().await?;
    let token = SecretString::from("lt-1".to_owned());
    backend.save_cloud_url(&token, "https://abc.ui.nabu.casa").await?;

    let err = backend.save_cloud_url(&token, "https://bad.ui.nabu.casa").await.err();
    assert_eq!(
        err,
        Some(BackendError::Rejected { status: 422, message: "rejected url".to_owned() })
    );
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() -> anyhow::Result<()> {
    crate::ensure_crypto();
    // Bind then drop to get a port nothing listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let backend =
        HttpBackend::new(format!("http://127.0.0.1:{port}"), None, Duration::from_secs(2));
    let err = backend.start_step_up().await.err();
    assert!(matches!(err, Some(BackendError::Network(_))), "{err:?}");
    Ok(())
}
