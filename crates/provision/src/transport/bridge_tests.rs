// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;

use super::{pump_page_events, HelloFrame, WsRenderer};
use crate::renderer::{PageEvent, Renderer, RendererLaunch};

fn launch() -> RendererLaunch {
    RendererLaunch {
        account_url: "http://hub.local:8123/config/cloud/account".to_owned(),
        allowed_hosts: vec!["hub.local".to_owned()],
    }
}

async fn wait_pending(renderer: &WsRenderer) {
    while !renderer.has_pending() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[test]
fn launch_frame_carries_account_and_hosts() -> anyhow::Result<()> {
    let launch = launch();
    let json = serde_json::to_value(HelloFrame::Launch { launch: &launch })?;
    assert_eq!(json["type"], "launch");
    assert_eq!(json["accountUrl"], "http://hub.local:8123/config/cloud/account");
    assert_eq!(json["allowedHosts"][0], "hub.local");

    let idle = serde_json::to_value(HelloFrame::Idle)?;
    assert_eq!(idle, serde_json::json!({ "type": "idle" }));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn launch_times_out_without_renderer() {
    let renderer = WsRenderer::new(Duration::from_secs(2));
    let started = tokio::time::Instant::now();
    let result = renderer.launch(launch()).await;
    assert!(result.is_err());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(!renderer.has_pending());
}

#[tokio::test(start_paused = true)]
async fn attached_renderer_completes_launch() -> anyhow::Result<()> {
    let renderer = Arc::new(WsRenderer::new(Duration::from_secs(30)));
    let task = {
        let renderer = renderer.clone();
        tokio::spawn(async move { renderer.launch(launch()).await })
    };
    wait_pending(&renderer).await;

    let pending = renderer.take_pending().ok_or_else(|| anyhow::anyhow!("no pending launch"))?;
    assert_eq!(pending.launch.allowed_hosts, vec!["hub.local".to_owned()]);
    assert!(!renderer.has_pending());

    let _ = pending.attached.send(());
    let session = task.await??;
    drop(pending.end);
    drop(session);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn abandoned_launch_is_discarded() -> anyhow::Result<()> {
    let renderer = Arc::new(WsRenderer::new(Duration::from_secs(30)));
    let task = {
        let renderer = renderer.clone();
        tokio::spawn(async move { renderer.launch(launch()).await })
    };
    wait_pending(&renderer).await;

    task.abort();
    let _ = task.await;
    assert!(!renderer.has_pending());
    assert!(renderer.take_pending().is_none());
    Ok(())
}

fn text(json: &str) -> Result<Message, axum::Error> {
    Ok(Message::Text(json.into()))
}

#[tokio::test]
async fn page_events_wait_for_a_slow_agent() -> anyhow::Result<()> {
    let frames = stream::iter(vec![
        text(r#"{"type":"popup_requested","url":"https://a.example"}"#),
        text("not json"),
        text(r#"{"type":"popup_requested","url":"https://b.example"}"#),
        text(r#"{"type":"popup_requested","url":"https://c.example"}"#),
    ]);
    let (tx, mut rx) = mpsc::channel(1);
    let pump = tokio::spawn(pump_page_events(frames, tx));

    // Nothing is dropped while the queue is full.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut urls = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            PageEvent::PopupRequested { url } => urls.push(url),
            PageEvent::Closed { reason } => {
                assert_eq!(reason.as_deref(), Some("renderer disconnected"));
                break;
            }
            other => anyhow::bail!("unexpected event {other:?}"),
        }
    }
    assert_eq!(urls, vec!["https://a.example", "https://b.example", "https://c.example"]);
    pump.await?;
    Ok(())
}

#[tokio::test]
async fn page_pump_stops_when_agent_leaves() -> anyhow::Result<()> {
    let frames = stream::iter(vec![text(r#"{"type":"popup_requested","url":"https://a.example"}"#)])
        .chain(stream::pending());
    let (tx, rx) = mpsc::channel(1);
    drop(rx);

    tokio::time::timeout(Duration::from_secs(1), pump_page_events(frames, tx)).await?;
    Ok(())
}
