// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `hublink` binary as a subprocess and exercises its
//! control API over HTTP and WebSocket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub use hublink::ensure_crypto;

/// Resolve the path to the compiled `hublink` binary.
pub fn hublink_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("hublink")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `hublink` process that is killed on drop.
pub struct HublinkProcess {
    child: Child,
    port: u16,
    auth_token: Option<String>,
}

/// Builder for the daemon's command line.
#[derive(Default)]
pub struct HublinkBuilder {
    auth_token: Option<String>,
    mode: Option<String>,
}

impl HublinkBuilder {
    /// Require a bearer token on the control API (`--auth-token`).
    pub fn auth_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    /// Initial network mode (`--mode`).
    pub fn mode(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_owned());
        self
    }

    /// Spawn hublink. Backend and hub point at a closed port, so any flow
    /// stops at the entry gate.
    pub fn spawn(self) -> anyhow::Result<HublinkProcess> {
        ensure_crypto();
        let binary = hublink_binary();
        anyhow::ensure!(binary.exists(), "hublink binary not found at {}", binary.display());

        let port = free_port()?;
        let dead = format!("http://127.0.0.1:{}", free_port()?);

        let mut args: Vec<String> = vec![
            "--port".into(),
            port.to_string(),
            "--host".into(),
            "127.0.0.1".into(),
            "--backend-url".into(),
            dead.clone(),
            "--hub-url".into(),
            dead,
            "--hub-probe-timeout-ms".into(),
            "500".into(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];
        if let Some(ref token) = self.auth_token {
            args.extend(["--auth-token".into(), token.clone()]);
        }
        if let Some(ref mode) = self.mode {
            args.extend(["--mode".into(), mode.clone()]);
        }

        let child = Command::new(&binary)
            .args(&args)
            .env_remove("HUBLINK_AUTH_TOKEN")
            .env_remove("HUBLINK_BACKEND_TOKEN")
            .env_remove("HUBLINK_HUB_TOKEN")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(HublinkProcess { child, port, auth_token: self.auth_token })
    }
}

impl HublinkProcess {
    /// Create a builder for a custom command line.
    pub fn build() -> HublinkBuilder {
        HublinkBuilder::default()
    }

    /// Spawn hublink with defaults.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// WebSocket URL for `path`, with the token attached when one is set.
    pub fn ws_url(&self, path: &str) -> String {
        match self.auth_token {
            Some(ref token) => format!("ws://127.0.0.1:{}{path}?token={token}", self.port),
            None => format!("ws://127.0.0.1:{}{path}", self.port),
        }
    }

    /// Poll health until responsive.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/health", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("hublink did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for HublinkProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
