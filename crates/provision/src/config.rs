// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the client currently reaches the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// On the same LAN as the hub. Required for provisioning.
    Local,
    /// Reaching the hub through the cloud relay.
    Remote,
}

/// Configuration for the hublink provisioning daemon.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "hublink", about = "Remote-access provisioning for a local home hub")]
pub struct ProvisionConfig {
    /// Host to bind the control API on.
    #[arg(long, default_value = "127.0.0.1", env = "HUBLINK_HOST")]
    pub host: String,

    /// Port to bind the control API on.
    #[arg(long, default_value_t = 9810, env = "HUBLINK_PORT")]
    pub port: u16,

    /// Bearer token for the control API. If unset, auth is disabled.
    #[arg(long, env = "HUBLINK_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Base URL of the account backend (step-up, lease, secrets, cloud-url).
    #[arg(long, env = "HUBLINK_BACKEND_URL")]
    pub backend_url: String,

    /// Session token for the account backend, issued by the app login.
    #[arg(long, env = "HUBLINK_BACKEND_TOKEN")]
    pub backend_token: Option<String>,

    /// Base URL of the hub on the local network.
    #[arg(long, default_value = "http://homeassistant.local:8123", env = "HUBLINK_HUB_URL")]
    pub hub_url: String,

    /// Long-lived access token for the hub reachability probe.
    #[arg(long, env = "HUBLINK_HUB_TOKEN")]
    pub hub_token: Option<String>,

    /// Path of the hub page that reveals the remote URL.
    #[arg(long, default_value = "/config/cloud/account", env = "HUBLINK_ACCOUNT_PATH")]
    pub account_path: String,

    /// Path prefix treated as "reached the account page".
    #[arg(long, default_value = "/config/cloud", env = "HUBLINK_ACCOUNT_PATH_PREFIX")]
    pub account_path_prefix: String,

    /// Path prefixes of the hub's login screens.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "/auth/authorize,/auth/login_flow",
        env = "HUBLINK_AUTH_PATH_PREFIXES"
    )]
    pub auth_path_prefixes: Vec<String>,

    /// Additional hosts the confined browser may visit besides the hub.
    #[arg(long, value_delimiter = ',', env = "HUBLINK_EXTRA_ALLOWED_HOSTS")]
    pub extra_allowed_hosts: Vec<String>,

    /// Host suffix every captured remote URL must carry.
    #[arg(long, default_value = ".ui.nabu.casa", env = "HUBLINK_PROVIDER_SUFFIX")]
    pub provider_suffix: String,

    /// Network mode at startup.
    #[arg(long, value_enum, default_value_t = NetworkMode::Local, env = "HUBLINK_MODE")]
    pub mode: NetworkMode,

    /// Challenge status poll interval in milliseconds.
    #[arg(long, default_value_t = 2000, env = "HUBLINK_CHALLENGE_POLL_MS")]
    pub challenge_poll_ms: u64,

    /// Give up waiting for email approval after this many seconds.
    #[arg(long, default_value_t = 900, env = "HUBLINK_CHALLENGE_MAX_WAIT_SECS")]
    pub challenge_max_wait_secs: u64,

    /// Attempts for the idempotent challenge completion call.
    #[arg(long, default_value_t = 3, env = "HUBLINK_COMPLETE_ATTEMPTS")]
    pub complete_attempts: u32,

    /// Linear backoff step between completion attempts in milliseconds.
    #[arg(long, default_value_t = 1000, env = "HUBLINK_COMPLETE_BACKOFF_MS")]
    pub complete_backoff_ms: u64,

    /// Timeout for backend calls in milliseconds.
    #[arg(long, default_value_t = 10000, env = "HUBLINK_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Hub reachability probe timeout in milliseconds.
    #[arg(long, default_value_t = 2000, env = "HUBLINK_HUB_PROBE_TIMEOUT_MS")]
    pub hub_probe_timeout_ms: u64,

    /// Hub reachability monitor interval in milliseconds.
    #[arg(long, default_value_t = 5000, env = "HUBLINK_REACHABILITY_POLL_MS")]
    pub reachability_poll_ms: u64,

    /// Timeout for probing the saved remote URL in milliseconds.
    #[arg(long, default_value_t = 5000, env = "HUBLINK_URL_PROBE_TIMEOUT_MS")]
    pub url_probe_timeout_ms: u64,

    /// Interval between capture scans in milliseconds.
    #[arg(long, default_value_t = 1000, env = "HUBLINK_CAPTURE_SCAN_MS")]
    pub capture_scan_ms: u64,

    /// Maximum number of capture scans per browsing session.
    #[arg(long, default_value_t = 60, env = "HUBLINK_CAPTURE_MAX_SCANS")]
    pub capture_max_scans: u32,

    /// Window in seconds during which DOM mutations trigger a rescan.
    #[arg(long, default_value_t = 30, env = "HUBLINK_CAPTURE_OBSERVE_SECS")]
    pub capture_observe_secs: u64,

    /// Hard limit on the whole browsing phase in seconds.
    #[arg(long, default_value_t = 120, env = "HUBLINK_BROWSE_TIMEOUT_SECS")]
    pub browse_timeout_secs: u64,

    /// How long to wait for a renderer to attach in seconds.
    #[arg(long, default_value_t = 15, env = "HUBLINK_RENDERER_ATTACH_SECS")]
    pub renderer_attach_secs: u64,

    /// Log format (json or text).
    #[arg(long, default_value = "json", env = "HUBLINK_LOG_FORMAT")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "HUBLINK_LOG_LEVEL")]
    pub log_level: String,
}

impl ProvisionConfig {
    pub fn challenge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.challenge_poll_ms)
    }

    pub fn challenge_max_wait(&self) -> Duration {
        Duration::from_secs(self.challenge_max_wait_secs)
    }

    pub fn complete_backoff(&self) -> Duration {
        Duration::from_millis(self.complete_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn hub_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.hub_probe_timeout_ms)
    }

    pub fn reachability_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reachability_poll_ms)
    }

    pub fn url_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.url_probe_timeout_ms)
    }

    pub fn capture_scan_interval(&self) -> Duration {
        Duration::from_millis(self.capture_scan_ms)
    }

    pub fn capture_observe_window(&self) -> Duration {
        Duration::from_secs(self.capture_observe_secs)
    }

    pub fn browse_timeout(&self) -> Duration {
        Duration::from_secs(self.browse_timeout_secs)
    }

    pub fn renderer_attach_timeout(&self) -> Duration {
        Duration::from_secs(self.renderer_attach_secs)
    }

    /// Full URL of the account page on the hub.
    pub fn account_url(&self) -> String {
        format!("{}{}", self.hub_url.trim_end_matches('/'), self.account_path)
    }

    /// Hosts the confined browser may visit: the hub itself plus any extras.
    pub fn allowed_hosts(&self) -> anyhow::Result<Vec<String>> {
        let hub = url::Url::parse(&self.hub_url)?;
        let host = hub
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("hub url has no host: {}", self.hub_url))?;
        let mut hosts = vec![host.to_ascii_lowercase()];
        for extra in &self.extra_allowed_hosts {
            let extra = extra.trim().to_ascii_lowercase();
            if !extra.is_empty() && !hosts.contains(&extra) {
                hosts.push(extra);
            }
        }
        Ok(hosts)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
