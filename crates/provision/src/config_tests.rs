// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use super::{NetworkMode, ProvisionConfig};

fn parse(args: &[&str]) -> anyhow::Result<ProvisionConfig> {
    let mut argv = vec!["hublink", "--backend-url", "https://backend.test"];
    argv.extend_from_slice(args);
    Ok(ProvisionConfig::try_parse_from(argv)?)
}

#[test]
fn defaults() -> anyhow::Result<()> {
    let config = parse(&[])?;
    assert_eq!(config.port, 9810);
    assert_eq!(config.mode, NetworkMode::Local);
    assert_eq!(config.auth_path_prefixes, vec!["/auth/authorize", "/auth/login_flow"]);
    assert!(config.extra_allowed_hosts.is_empty());
    assert_eq!(config.challenge_poll_interval(), Duration::from_secs(2));
    assert_eq!(config.challenge_max_wait(), Duration::from_secs(900));
    assert_eq!(config.account_url(), "http://homeassistant.local:8123/config/cloud/account");
    Ok(())
}

#[test]
fn backend_url_is_required() {
    assert!(ProvisionConfig::try_parse_from(["hublink"]).is_err());
}

#[yare::parameterized(
    plain = { "http://hub.local:8123", "http://hub.local:8123/config/cloud/account" },
    trailing_slash = { "http://hub.local:8123/", "http://hub.local:8123/config/cloud/account" },
)]
fn account_url(hub: &str, expected: &str) {
    let config = parse(&["--hub-url", hub]);
    assert_eq!(config.map(|c| c.account_url()).ok().as_deref(), Some(expected));
}

#[test]
fn allowed_hosts_start_with_hub_and_dedupe() -> anyhow::Result<()> {
    let config = parse(&[
        "--hub-url",
        "http://Hub.Local:8123",
        "--extra-allowed-hosts",
        "auth.example, hub.local,,AUTH.example",
    ])?;
    assert_eq!(config.allowed_hosts()?, vec!["hub.local", "auth.example"]);
    Ok(())
}

#[test]
fn hub_url_without_host_is_rejected() -> anyhow::Result<()> {
    let config = parse(&["--hub-url", "not a url"])?;
    assert!(config.allowed_hosts().is_err());
    Ok(())
}

#[test]
fn mode_flag_parses() -> anyhow::Result<()> {
    assert_eq!(parse(&["--mode", "remote"])?.mode, NetworkMode::Remote);
    assert!(parse(&["--mode", "cellular"]).is_err());
    Ok(())
}
