// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Saving the captured remote URL and checking that it answers.

use crate::backend::Backend;
use crate::error::FlowError;
use crate::hub::Reachability;
use crate::lease::Lease;

pub const MSG_ENABLED: &str = "Remote access enabled.";
pub const MSG_UNVERIFIED: &str =
    "Remote access saved but could not be verified from this network.";

/// Outcome of probing a saved URL. Either way the save stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Reachable,
    Unverified,
}

impl Verification {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Reachable => MSG_ENABLED,
            Self::Unverified => MSG_UNVERIFIED,
        }
    }
}

/// Persist `url` under `lease`.
pub async fn save(backend: &dyn Backend, lease: &Lease, url: &str) -> Result<(), FlowError> {
    backend.save_cloud_url(lease.token(), url).await.map_err(|e| {
        tracing::warn!(err = %e, "saving remote url failed");
        FlowError::persistence(format!("Could not save the remote access URL ({e})."))
    })
}

pub async fn probe(reach: &dyn Reachability, url: &str) -> Verification {
    if reach.url_reachable(url).await {
        Verification::Reachable
    } else {
        Verification::Unverified
    }
}
