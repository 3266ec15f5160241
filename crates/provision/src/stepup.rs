// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Email step-up verification: start a challenge, poll until the operator
//! approves it, then complete it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError, ChallengeStatus};
use crate::config::ProvisionConfig;
use crate::error::FlowError;

/// Consecutive transient poll failures tolerated before giving up.
const MAX_POLL_FAILURES: u32 = 3;

pub const MSG_CHALLENGE_EXPIRED: &str =
    "The verification email expired. Send a new one and try again.";
pub const MSG_CHALLENGE_NOT_FOUND: &str =
    "The verification request was not found. Send a new email and try again.";
pub const MSG_CHALLENGE_TIMEOUT: &str =
    "Timed out waiting for email approval. Send a new email and try again.";

pub struct StepUpClient {
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
    max_wait: Duration,
    complete_attempts: u32,
    complete_backoff: Duration,
}

impl StepUpClient {
    pub fn new(backend: Arc<dyn Backend>, config: &ProvisionConfig) -> Self {
        Self {
            backend,
            poll_interval: config.challenge_poll_interval(),
            max_wait: config.challenge_max_wait(),
            complete_attempts: config.complete_attempts.max(1),
            complete_backoff: config.complete_backoff(),
        }
    }

    /// Send a verification email, returning the challenge id.
    pub async fn start(&self) -> Result<String, FlowError> {
        self.backend.start_step_up().await.map_err(|e| {
            tracing::warn!(err = %e, "step-up start failed");
            FlowError::verification(format!("Could not send the verification email ({e})."))
        })
    }

    pub async fn poll(&self, id: &str) -> Result<ChallengeStatus, BackendError> {
        self.backend.challenge_status(id).await
    }

    /// Poll `id` on a fixed cadence until it is approved.
    ///
    /// Stops on EXPIRED/NOT_FOUND with a resend instruction, on too many
    /// consecutive transient failures, on the overall wait limit, or when
    /// `cancel` fires.
    pub async fn wait_for_approval(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChallengeStatus, FlowError> {
        let deadline = tokio::time::Instant::now() + self.max_wait;
        let mut failures = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(FlowError::cancelled()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(FlowError::verification(MSG_CHALLENGE_TIMEOUT));
            }

            let status = tokio::select! {
                _ = cancel.cancelled() => return Err(FlowError::cancelled()),
                status = self.poll(id) => status,
            };

            match status {
                Ok(status) if status.is_approved() => return Ok(status),
                Ok(ChallengeStatus::Expired) => {
                    return Err(FlowError::verification(MSG_CHALLENGE_EXPIRED));
                }
                Ok(ChallengeStatus::NotFound) => {
                    return Err(FlowError::verification(MSG_CHALLENGE_NOT_FOUND));
                }
                Ok(_) => failures = 0,
                Err(e) if e.is_transient() && failures + 1 < MAX_POLL_FAILURES => {
                    failures += 1;
                    tracing::debug!(failures, err = %e, "challenge poll failed, retrying");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "challenge poll failed");
                    return Err(FlowError::verification(format!(
                        "Could not check the verification status ({e})."
                    )));
                }
            }
        }
    }

    /// Complete an approved challenge, retrying with linear backoff.
    ///
    /// Approval can take a moment to propagate, so early failures are
    /// expected; the call is idempotent.
    pub async fn complete(&self, id: &str) -> Result<(), FlowError> {
        let mut last = None;
        for attempt in 1..=self.complete_attempts {
            match self.backend.complete_challenge(id).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::debug!(attempt, err = %e, "challenge completion failed");
                    last = Some(e);
                    if attempt < self.complete_attempts {
                        tokio::time::sleep(self.complete_backoff * attempt).await;
                    }
                }
            }
        }
        let detail = last.map(|e| e.to_string()).unwrap_or_default();
        tracing::warn!(err = %detail, "challenge completion exhausted retries");
        Err(FlowError::verification(format!("Could not complete verification ({detail}).")))
    }

    /// Ask the backend to send the verification email again.
    pub async fn resend(&self, id: &str) -> Result<(), FlowError> {
        self.backend.resend_challenge(id).await.map_err(|e| {
            FlowError::verification(format!("Could not resend the verification email ({e})."))
        })
    }
}

#[cfg(test)]
#[path = "stepup_tests.rs"]
mod tests;
