// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Capture agent: fills the hub login, harvests the remote URL exactly once,
//! and redacts it in place.

pub mod agent;
pub mod dom;
pub mod driver;

use url::Url;

/// Value written over a captured field.
pub const REDACTED_PLACEHOLDER: &str = "••••••••";

const MASK_CHARS: &[char] = &['•', '●', '*', '·', '∙', '◦'];

/// Looks like a password-dot or asterisk placeholder rather than real text.
pub fn is_masked(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().all(|c| MASK_CHARS.contains(&c) || c.is_whitespace()) {
        return true;
    }
    // A run of three mask characters inside otherwise real text, e.g.
    // `https://•••.ui.nabu.casa`.
    let mut run = 0;
    for c in trimmed.chars() {
        if MASK_CHARS.contains(&c) {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

fn dotted(suffix: &str) -> String {
    let suffix = suffix.trim().to_ascii_lowercase();
    if suffix.starts_with('.') {
        suffix
    } else {
        format!(".{suffix}")
    }
}

/// Cheap pre-filter applied while scanning fields.
pub fn mentions_provider(value: &str, suffix: &str) -> bool {
    let needle = dotted(suffix);
    value.to_ascii_lowercase().contains(needle.trim_start_matches('.'))
}

/// Validate a captured value and normalize it.
///
/// Valid iff `https`, host strictly under `suffix`, no embedded userinfo, and
/// not masked. Surrounding whitespace and trailing slashes are trimmed.
pub fn normalize_cloud_url(raw: &str, suffix: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() || is_masked(value) {
        return None;
    }
    let parsed = Url::parse(value).ok()?;
    if parsed.scheme() != "https" || !parsed.username().is_empty() || parsed.password().is_some()
    {
        return None;
    }
    let host = parsed.host_str()?.to_ascii_lowercase();
    let suffix = dotted(suffix);
    if !host.ends_with(&suffix) || host.len() <= suffix.len() {
        return None;
    }
    let normalized = value.trim_end_matches('/');
    Some(normalized.to_owned())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
