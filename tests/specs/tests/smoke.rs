// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `hublink` binary and exercise
//! its HTTP and WebSocket control surface.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use hublink::flow::{FlowSnapshot, FlowState};
use hublink_specs::HublinkProcess;

const TIMEOUT: Duration = Duration::from_secs(10);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Read the next text frame as JSON.
async fn next_json(ws: &mut WsStream) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("ws stream ended"))??;
        match msg {
            Message::Text(text) => return Ok(serde_json::from_str(&text)?),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => anyhow::bail!("expected text ws message, got: {other:?}"),
        }
    }
}

async fn flow(hublink: &HublinkProcess) -> anyhow::Result<FlowSnapshot> {
    Ok(reqwest::get(format!("{}/api/v1/flow", hublink.base_url())).await?.json().await?)
}

// -- HTTP ---------------------------------------------------------------------

#[tokio::test]
async fn http_health() -> anyhow::Result<()> {
    let hublink = HublinkProcess::start()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", hublink.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert_eq!(resp["state"], "idle");
    assert_eq!(resp["renderer_waiting"], false);
    Ok(())
}

#[tokio::test]
async fn http_flow_starts_idle() -> anyhow::Result<()> {
    let hublink = HublinkProcess::start()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let snap = flow(&hublink).await?;
    assert_eq!(snap.state, FlowState::Idle);
    assert!(!snap.in_flight);
    assert!(!snap.lease_active);
    assert!(!snap.credentials_present);
    Ok(())
}

#[tokio::test]
async fn http_start_blocks_when_hub_unreachable() -> anyhow::Result<()> {
    let hublink = HublinkProcess::start()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let resp: serde_json::Value = client
        .post(format!("{}/api/v1/flow/start", hublink.base_url()))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["started"], true);

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let snap = flow(&hublink).await?;
        if !snap.in_flight {
            assert!(matches!(snap.state, FlowState::Blocked { .. }), "{:?}", snap.state);
            assert!(!snap.home_reachable);
            return Ok(());
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("flow never settled: {:?}", snap.state);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn http_remote_mode_from_flag() -> anyhow::Result<()> {
    let hublink = HublinkProcess::build().mode("remote").spawn()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let snap = flow(&hublink).await?;
    assert_eq!(serde_json::to_value(snap.mode)?, "remote");
    Ok(())
}

#[tokio::test]
async fn http_auth_token_enforced() -> anyhow::Result<()> {
    let hublink = HublinkProcess::build().auth_token("smoke-secret").spawn()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let client = reqwest::Client::new();
    let url = format!("{}/api/v1/flow", hublink.base_url());
    let resp = client.get(&url).send().await?;
    assert_eq!(resp.status().as_u16(), 401);

    let resp = client.get(&url).bearer_auth("smoke-secret").send().await?;
    assert!(resp.status().is_success());
    Ok(())
}

// -- WebSocket ----------------------------------------------------------------

#[tokio::test]
async fn ws_flow_sends_snapshot_then_events() -> anyhow::Result<()> {
    let hublink = HublinkProcess::start()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(hublink.ws_url("/ws/flow")).await?;
    let first = next_json(&mut ws).await?;
    assert_eq!(first["event"], "snapshot");
    let snap: FlowSnapshot = serde_json::from_value(first["snapshot"].clone())?;
    assert_eq!(snap.state, FlowState::Idle);

    ws.send(Message::Text(r#"{"event":"start"}"#.into())).await?;
    loop {
        let event = next_json(&mut ws).await?;
        if event["event"] == "state" && event["state"] == "blocked" {
            assert!(event["flow_id"].is_string());
            break;
        }
    }
    Ok(())
}

#[tokio::test]
async fn ws_flow_requires_token_when_configured() -> anyhow::Result<()> {
    let hublink = HublinkProcess::build().auth_token("smoke-secret").spawn()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let bare = format!("ws://127.0.0.1:{}/ws/flow", hublink.port());
    assert!(tokio_tungstenite::connect_async(bare).await.is_err());

    let (mut ws, _) = tokio_tungstenite::connect_async(hublink.ws_url("/ws/flow")).await?;
    assert_eq!(next_json(&mut ws).await?["event"], "snapshot");
    Ok(())
}

#[tokio::test]
async fn ws_renderer_idle_without_launch() -> anyhow::Result<()> {
    let hublink = HublinkProcess::start()?;
    hublink.wait_healthy(TIMEOUT).await?;

    let (mut ws, _) = tokio_tungstenite::connect_async(hublink.ws_url("/ws/renderer")).await?;
    let frame = next_json(&mut ws).await?;
    assert_eq!(frame, serde_json::json!({ "type": "idle" }));
    Ok(())
}
