// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hub reachability: the entry-gate probe, the saved-URL probe, and the
//! background "home reachable" monitor.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::backend::BoxFuture;

/// Reachability probes. Probes never fail; errors mean "not reachable".
pub trait Reachability: Send + Sync + 'static {
    /// Lightweight authenticated GET against the hub's base API.
    fn hub_reachable(&self) -> BoxFuture<'_, bool>;

    /// Best-effort GET of a saved remote URL.
    fn url_reachable<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool>;
}

pub struct HttpReachability {
    hub_url: String,
    hub_token: Option<String>,
    hub_client: Client,
    url_client: Client,
}

impl HttpReachability {
    pub fn new(
        hub_url: String,
        hub_token: Option<String>,
        hub_timeout: Duration,
        url_timeout: Duration,
    ) -> Self {
        let hub_client = Client::builder().timeout(hub_timeout).build().unwrap_or_default();
        let url_client = Client::builder().timeout(url_timeout).build().unwrap_or_default();
        Self { hub_url: hub_url.trim_end_matches('/').to_owned(), hub_token, hub_client, url_client }
    }
}

impl Reachability for HttpReachability {
    fn hub_reachable(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let mut req = self.hub_client.get(format!("{}/api/", self.hub_url));
            if let Some(ref token) = self.hub_token {
                req = req.bearer_auth(token);
            }
            match req.send().await {
                // 401 still proves the hub answered on this network.
                Ok(resp) => resp.status().is_success() || resp.status() == StatusCode::UNAUTHORIZED,
                Err(e) => {
                    tracing::debug!(err = %e.without_url(), "hub probe failed");
                    false
                }
            }
        })
    }

    fn url_reachable<'a>(&'a self, url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.url_client.get(url).send().await {
                // The relay answers 5xx while the hub is not connected.
                Ok(resp) => !resp.status().is_server_error(),
                Err(e) => {
                    tracing::debug!(err = %e.without_url(), "remote url probe failed");
                    false
                }
            }
        })
    }
}

/// Spawn a task that probes the hub every `interval` and reports each
/// result through `on_result` until `cancel` fires.
pub fn spawn_reachability_monitor<F>(
    reach: std::sync::Arc<dyn Reachability>,
    interval: Duration,
    cancel: CancellationToken,
    on_result: F,
) where
    F: Fn(bool) + Send + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let reachable = tokio::select! {
                _ = cancel.cancelled() => break,
                r = reach.hub_reachable() => r,
            };
            on_result(reachable);
        }
        tracing::debug!("reachability monitor stopped");
    });
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
