// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runs a [`CaptureAgent`] against an attached renderer session with the
//! scan cadence and observation window.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::agent::CaptureAgent;
use crate::config::ProvisionConfig;
use crate::error::FlowError;
use crate::renderer::{AgentCommand, PageEvent, RendererSession};

pub const MSG_CAPTURE_INCOMPLETE: &str =
    "Could not complete remote access setup on the hub. Please try again.";

#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub interval: Duration,
    pub max_scans: u32,
    /// DOM mutations after this window no longer trigger a scan.
    pub observe_window: Duration,
}

impl ScanLimits {
    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self {
            interval: config.capture_scan_interval(),
            max_scans: config.capture_max_scans,
            observe_window: config.capture_observe_window(),
        }
    }
}

/// Drive `agent` until it captures a value.
///
/// The agent is consumed so its credential copy is dropped on every exit
/// path. The renderer is told to close whatever the outcome.
pub async fn run_capture(
    mut agent: CaptureAgent,
    session: RendererSession,
    limits: ScanLimits,
    cancel: &CancellationToken,
) -> Result<String, FlowError> {
    let RendererSession { mut events, commands } = session;

    let result = async {
        for cmd in agent.start() {
            send(&commands, cmd).await?;
        }

        let observe_until = Instant::now() + limits.observe_window;
        let mut ticker = tokio::time::interval_at(Instant::now() + limits.interval, limits.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut scans = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FlowError::cancelled()),
                _ = ticker.tick() => {
                    if scans >= limits.max_scans {
                        tracing::warn!(scans, "capture scan budget exhausted");
                        return Err(FlowError::capture(MSG_CAPTURE_INCOMPLETE));
                    }
                    scans += 1;
                    send(&commands, AgentCommand::RequestSnapshot).await?;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::warn!("renderer session dropped");
                        return Err(FlowError::capture(MSG_CAPTURE_INCOMPLETE));
                    };
                    if matches!(event, PageEvent::Mutated { .. }) && Instant::now() > observe_until {
                        continue;
                    }
                    let step = agent.on_event(event);
                    for cmd in step.commands {
                        send(&commands, cmd).await?;
                    }
                    if let Some(value) = step.captured {
                        agent.wipe_credentials();
                        return Ok(value);
                    }
                    if step.closed {
                        return Err(FlowError::capture(MSG_CAPTURE_INCOMPLETE));
                    }
                }
            }
        }
    }
    .await;

    drop(agent);
    let _ = commands.try_send(AgentCommand::Close);
    result
}

async fn send(
    commands: &tokio::sync::mpsc::Sender<AgentCommand>,
    cmd: AgentCommand,
) -> Result<(), FlowError> {
    commands.send(cmd).await.map_err(|_| {
        tracing::warn!("renderer stopped accepting commands");
        FlowError::capture(MSG_CAPTURE_INCOMPLETE)
    })
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
