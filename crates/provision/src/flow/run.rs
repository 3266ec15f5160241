// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::future::Future;
use std::sync::Arc;

use super::provisioner::FlowRun;
use super::{FlowState, Provisioner};
use crate::backend::BackendError;
use crate::capture::agent::CaptureAgent;
use crate::capture::driver::{run_capture, ScanLimits, MSG_CAPTURE_INCOMPLETE};
use crate::capture::normalize_cloud_url;
use crate::config::NetworkMode;
use crate::confine::ConfinementPolicy;
use crate::error::FlowError;
use crate::lease::Lease;
use crate::persist;
use crate::renderer::RendererLaunch;

const MSG_NOT_LOCAL: &str = "Connect to your home network to set up remote access.";
const MSG_HUB_UNREACHABLE: &str =
    "Your hub is not reachable from this network. Connect to your home network and try again.";
const MSG_INVALID_URL: &str =
    "The remote access address found on the hub is invalid. Please try again.";
const MSG_VERIFY_AGAIN: &str = "Verification is required again. Start over to send a new email.";

/// Race `fut` against the run's cancellation.
async fn guarded<F: Future>(run: &FlowRun, fut: F) -> Result<F::Output, FlowError> {
    tokio::select! {
        _ = run.cancel.cancelled() => Err(FlowError::cancelled()),
        out = fut => Ok(out),
    }
}

impl Provisioner {
    pub(super) async fn run_flow(self: &Arc<Self>, run: &FlowRun) -> Result<String, FlowError> {
        self.check_entry(run).await?;
        self.acquire_credentials(run).await?;

        let raw = self.browse(run).await?;
        let url = normalize_cloud_url(&raw, &self.config.provider_suffix).ok_or_else(|| {
            tracing::warn!(flow = %run.id, "captured remote url rejected");
            FlowError::capture(MSG_INVALID_URL)
        })?;
        drop(raw);

        let lease = match self.leases.current() {
            Some(lease) => lease,
            None => {
                tracing::info!(flow = %run.id, "lease expired after capture, minting a fresh one");
                self.mint(run).await?
            }
        };
        self.use_lease(run, Some(lease.serial()));
        self.transition(run, FlowState::Saving)?;
        guarded(run, persist::save(self.backend.as_ref(), &lease, &url)).await??;
        self.use_lease(run, None);
        drop(lease);

        self.transition(run, FlowState::Testing)?;
        let verification = guarded(run, persist::probe(self.reach.as_ref(), &url)).await?;
        tracing::info!(flow = %run.id, ?verification, "remote url saved");
        Ok(verification.message().to_owned())
    }

    /// Local network and a hub that answers.
    async fn check_entry(&self, run: &FlowRun) -> Result<(), FlowError> {
        if self.mode() != NetworkMode::Local {
            return Err(FlowError::blocked(MSG_NOT_LOCAL));
        }
        let probe = tokio::time::timeout(self.config.hub_probe_timeout(), self.reach.hub_reachable());
        let reachable = guarded(run, probe).await?.unwrap_or(false);
        self.set_home_reachable(reachable);
        if !reachable {
            return Err(FlowError::blocked(MSG_HUB_UNREACHABLE));
        }
        Ok(())
    }

    /// Reuse an unexpired lease or verify and mint one, then fetch hub
    /// credentials into the slot. A lease the backend no longer honors is
    /// dropped and the step-up repeated once.
    async fn acquire_credentials(self: &Arc<Self>, run: &FlowRun) -> Result<(), FlowError> {
        let mut step_up_retried = false;
        loop {
            let lease = match self.leases.current() {
                Some(lease) => {
                    tracing::info!(flow = %run.id, lease = lease.serial(), "reusing lease");
                    lease
                }
                None => {
                    self.verify(run).await?;
                    self.mint(run).await?
                }
            };
            self.use_lease(run, Some(lease.serial()));

            self.transition(run, FlowState::FetchingCredentials)?;
            match guarded(run, self.fetcher.fetch(&self.leases, &lease)).await? {
                Ok(creds) => {
                    self.credentials.store(creds);
                    return Ok(());
                }
                Err(BackendError::StepUpRequired) if !step_up_retried => {
                    step_up_retried = true;
                    tracing::info!(flow = %run.id, "lease rejected, verifying again");
                    self.leases.wipe();
                }
                Err(e) => {
                    tracing::warn!(flow = %run.id, err = %e, "credential fetch failed");
                    return Err(FlowError::lease(format!(
                        "Could not fetch hub credentials ({e})."
                    )));
                }
            }
        }
    }

    async fn verify(&self, run: &FlowRun) -> Result<(), FlowError> {
        self.transition(run, FlowState::SendingChallenge)?;
        let id = guarded(run, self.stepup.start()).await??;
        self.set_challenge(run, &id);

        self.transition(run, FlowState::WaitingApproval)?;
        self.stepup.wait_for_approval(&id, &run.cancel).await?;
        guarded(run, self.stepup.complete(&id)).await??;
        tracing::info!(flow = %run.id, "step-up verified");
        Ok(())
    }

    async fn mint(self: &Arc<Self>, run: &FlowRun) -> Result<Lease, FlowError> {
        self.transition(run, FlowState::Leasing)?;
        let lease = guarded(run, self.leases.mint()).await?.map_err(|e| match e {
            BackendError::VerificationRequired | BackendError::StepUpRequired => {
                FlowError::verification(MSG_VERIFY_AGAIN)
            }
            e => FlowError::lease(format!("Could not obtain a lease ({e}).")),
        })?;
        self.arm_expiry(&lease);
        Ok(lease)
    }

    /// Confined browsing until the agent captures a value. Credentials are
    /// wiped from the slot whatever the outcome, and the run stops depending
    /// on its lease until it saves.
    async fn browse(&self, run: &FlowRun) -> Result<String, FlowError> {
        let allowed_hosts = self.config.allowed_hosts().map_err(|e| {
            tracing::warn!(err = %e, "bad hub url");
            FlowError::capture(MSG_CAPTURE_INCOMPLETE)
        })?;
        let account_url = self.config.account_url();
        let creds = self
            .credentials
            .duplicate()
            .ok_or_else(|| FlowError::lease("Hub credentials are no longer available."))?;

        self.transition(run, FlowState::Browsing)?;
        let policy = ConfinementPolicy::new(
            allowed_hosts.clone(),
            self.config.account_path_prefix.clone(),
            self.config.auth_path_prefixes.clone(),
        );
        let agent = CaptureAgent::new(
            policy,
            account_url.clone(),
            self.config.provider_suffix.clone(),
            creds,
        );
        let launch = RendererLaunch { account_url, allowed_hosts };
        let limits = ScanLimits::from_config(&self.config);

        let attempt = async {
            let session = self.renderer.launch(launch).await.map_err(|e| {
                tracing::warn!(err = %e, "renderer launch failed");
                FlowError::capture(MSG_CAPTURE_INCOMPLETE)
            })?;
            run_capture(agent, session, limits, &run.cancel).await
        };

        let result = match guarded(run, tokio::time::timeout(self.config.browse_timeout(), attempt))
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                tracing::warn!(flow = %run.id, "browsing timed out");
                Err(FlowError::capture(MSG_CAPTURE_INCOMPLETE))
            }
            Err(cancelled) => Err(cancelled),
        };
        self.credentials.wipe();
        self.use_lease(run, None);
        result
    }
}
