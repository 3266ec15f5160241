// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Navigation allow-list for the automated browsing session.
//!
//! A navigation is allowed when its host is listed and its path is either
//! under the account prefix or, until the account page has been reached,
//! under one of the login prefixes. Reaching the account page is a one-way
//! ratchet for the rest of the session.

use std::collections::HashSet;

use url::Url;

#[derive(Debug, Clone)]
pub struct ConfinementPolicy {
    allowed_hosts: HashSet<String>,
    account_path_prefix: String,
    auth_path_prefixes: Vec<String>,
    reached_account: bool,
}

impl ConfinementPolicy {
    pub fn new(
        allowed_hosts: impl IntoIterator<Item = String>,
        account_path_prefix: impl Into<String>,
        auth_path_prefixes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            allowed_hosts: allowed_hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            account_path_prefix: account_path_prefix.into(),
            auth_path_prefixes: auth_path_prefixes.into_iter().collect(),
            reached_account: false,
        }
    }

    pub fn reached_account(&self) -> bool {
        self.reached_account
    }

    pub fn allowed_hosts(&self) -> impl Iterator<Item = &str> {
        self.allowed_hosts.iter().map(String::as_str)
    }

    /// Pure allow predicate over an already-split host and path.
    pub fn allows(&self, host: &str, path: &str) -> bool {
        if !self.allowed_hosts.contains(&host.to_ascii_lowercase()) {
            return false;
        }
        if path_has_prefix(path, &self.account_path_prefix) {
            return true;
        }
        !self.reached_account && self.is_auth_path(path)
    }

    pub fn is_auth_path(&self, path: &str) -> bool {
        self.auth_path_prefixes.iter().any(|p| path_has_prefix(path, p))
    }

    pub fn is_account_path(&self, path: &str) -> bool {
        path_has_prefix(path, &self.account_path_prefix)
    }

    /// Gate a navigation to `url`, advancing the ratchet when it lands on
    /// the account page. Unparseable and non-web URLs are denied.
    pub fn check(&mut self, url: &str) -> bool {
        let Some((host, path)) = split_url(url) else {
            return false;
        };
        let allowed = self.allows(&host, &path);
        if allowed && self.is_account_path(&path) {
            self.reached_account = true;
        }
        allowed
    }

    /// Whether `url` is an allowed login page right now.
    pub fn on_auth_page(&self, url: &str) -> bool {
        match split_url(url) {
            Some((host, path)) => {
                !self.reached_account && self.allows(&host, &path) && self.is_auth_path(&path)
            }
            None => false,
        }
    }
}

/// Lower-cased host and normalized path of an http(s) URL.
pub fn split_url(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some((host, parsed.path().to_owned()))
}

/// Segment-aware prefix test: `/config/cloud` covers `/config/cloud` and
/// `/config/cloud/account` but not `/config/cloudy`.
fn path_has_prefix(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
#[path = "confine_tests.rs"]
mod tests;
