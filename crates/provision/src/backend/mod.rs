// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Account backend: step-up challenges, leases, ephemeral secrets, and the
//! cloud URL store.
//!
//! [`Backend`] is object-safe so the flow can run against [`http::HttpBackend`]
//! in production and an in-memory fake in tests.

pub mod http;

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::secrets::HubCredentials;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Server-side status of a step-up challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    Pending,
    Approved,
    Consumed,
    Expired,
    NotFound,
}

impl ChallengeStatus {
    /// Parse a wire status. Unknown values fail closed as `NotFound`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "APPROVED" => Self::Approved,
            "CONSUMED" => Self::Consumed,
            "EXPIRED" => Self::Expired,
            _ => Self::NotFound,
        }
    }

    /// The operator approved the email; the flow may proceed.
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved | Self::Consumed)
    }
}

/// A freshly minted lease as returned by the backend.
#[derive(Debug)]
pub struct LeaseGrant {
    pub token: SecretString,
    /// Expiry as epoch milliseconds.
    pub expires_at_ms: u64,
}

/// Backend call failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The lease was rejected; a new step-up is needed before secrets.
    StepUpRequired,
    /// No approved step-up backs this request.
    VerificationRequired,
    NotFound,
    Rejected { status: u16, message: String },
    Timeout,
    Network(String),
}

impl BackendError {
    /// Transport-level failure that may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepUpRequired => f.write_str("step-up required"),
            Self::VerificationRequired => f.write_str("verification required"),
            Self::NotFound => f.write_str("not found"),
            Self::Rejected { status, message } => write!(f, "rejected ({status}): {message}"),
            Self::Timeout => f.write_str("request timed out"),
            Self::Network(e) => write!(f, "network error: {e}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Account backend operations used by the provisioning flow.
pub trait Backend: Send + Sync + 'static {
    /// `POST step-up/start`: send a verification email, returning the challenge id.
    fn start_step_up(&self) -> BoxFuture<'_, Result<String, BackendError>>;

    /// `GET challenge/{id}`.
    fn challenge_status<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ChallengeStatus, BackendError>>;

    /// `POST challenge/{id}/complete`. Idempotent.
    fn complete_challenge<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), BackendError>>;

    /// `POST challenge/{id}/resend`.
    fn resend_challenge<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), BackendError>>;

    /// `POST lease`.
    fn mint_lease(&self) -> BoxFuture<'_, Result<LeaseGrant, BackendError>>;

    /// `POST secrets`: exchange a lease token for hub credentials.
    fn fetch_secrets<'a>(
        &'a self,
        lease_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<HubCredentials, BackendError>>;

    /// `POST cloud-url`: persist the captured remote URL.
    fn save_cloud_url<'a>(
        &'a self,
        lease_token: &'a SecretString,
        url: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>>;
}
