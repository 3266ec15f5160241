// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provisioning orchestrator.
//!
//! One [`Provisioner`] per user session sequences step-up, lease, credential
//! fetch, confined browsing, save, and verification. Presentation layers only
//! read [`FlowState`]; every transition happens here.

mod provisioner;
mod run;

pub use provisioner::{Collaborators, Provisioner};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::NetworkMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    Blocked { reason: String },
    SendingChallenge,
    WaitingApproval,
    Leasing,
    FetchingCredentials,
    Browsing,
    Saving,
    Testing,
    Done { message: String },
    Error { message: String },
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Blocked { .. } => "blocked",
            Self::SendingChallenge => "sending_challenge",
            Self::WaitingApproval => "waiting_approval",
            Self::Leasing => "leasing",
            Self::FetchingCredentials => "fetching_credentials",
            Self::Browsing => "browsing",
            Self::Saving => "saving",
            Self::Testing => "testing",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// Events broadcast to presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    State {
        #[serde(skip_serializing_if = "Option::is_none")]
        flow_id: Option<Uuid>,
        #[serde(flatten)]
        state: FlowState,
    },
    HomeReachable { reachable: bool },
    SecretsWiped { reason: String },
}

/// Point-in-time view of the orchestrator. Never carries secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<Uuid>,
    #[serde(flatten)]
    pub state: FlowState,
    pub in_flight: bool,
    pub lease_active: bool,
    pub credentials_present: bool,
    pub home_reachable: bool,
    pub mode: NetworkMode,
}
