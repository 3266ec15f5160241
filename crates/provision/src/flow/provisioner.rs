// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator ownership, lifecycle, and teardown.
//!
//! All state lives behind one synchronous lock. Each flow run carries a
//! generation number; a run whose generation is stale can no longer publish
//! state, so teardown never races with a late transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{FlowEvent, FlowSnapshot, FlowState};
use crate::backend::Backend;
use crate::config::{NetworkMode, ProvisionConfig};
use crate::error::{ErrorKind, FlowError};
use crate::hub::{spawn_reachability_monitor, Reachability};
use crate::lease::{Clock, Lease, LeaseManager};
use crate::renderer::Renderer;
use crate::secrets::{CredentialFetcher, CredentialSlot};
use crate::stepup::StepUpClient;

const MSG_INTERNAL: &str = "Something went wrong while setting up remote access.";
const MSG_NO_PENDING_CHALLENGE: &str = "No verification email is pending.";

/// External collaborators the orchestrator drives.
pub struct Collaborators {
    pub backend: Arc<dyn Backend>,
    pub reach: Arc<dyn Reachability>,
    pub renderer: Arc<dyn Renderer>,
    pub clock: Arc<dyn Clock>,
}

pub struct Provisioner {
    pub(super) config: ProvisionConfig,
    pub(super) backend: Arc<dyn Backend>,
    pub(super) reach: Arc<dyn Reachability>,
    pub(super) renderer: Arc<dyn Renderer>,
    pub(super) stepup: StepUpClient,
    pub(super) leases: LeaseManager,
    pub(super) fetcher: CredentialFetcher,
    pub(super) credentials: CredentialSlot,
    inner: Mutex<Inner>,
    event_tx: broadcast::Sender<FlowEvent>,
    home_reachable: AtomicBool,
    shutdown: CancellationToken,
}

struct Inner {
    state: FlowState,
    mode: NetworkMode,
    generation: u64,
    active: Option<ActiveFlow>,
    last_flow_id: Option<Uuid>,
    monitor: Option<CancellationToken>,
}

struct ActiveFlow {
    id: Uuid,
    cancel: CancellationToken,
    challenge_id: Option<String>,
    /// Serial of the lease the run is currently spending, if any.
    lease_in_use: Option<u64>,
}

/// Identity of one spawned flow run.
pub(super) struct FlowRun {
    pub id: Uuid,
    pub generation: u64,
    pub cancel: CancellationToken,
}

impl Provisioner {
    pub fn new(
        config: ProvisionConfig,
        collab: Collaborators,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(64);
        let Collaborators { backend, reach, renderer, clock } = collab;
        Arc::new(Self {
            stepup: StepUpClient::new(Arc::clone(&backend), &config),
            leases: LeaseManager::new(Arc::clone(&backend), clock),
            fetcher: CredentialFetcher::new(Arc::clone(&backend)),
            credentials: CredentialSlot::new(),
            inner: Mutex::new(Inner {
                state: FlowState::Idle,
                mode: config.mode,
                generation: 0,
                active: None,
                last_flow_id: None,
                monitor: None,
            }),
            event_tx,
            home_reachable: AtomicBool::new(false),
            shutdown,
            config,
            backend,
            reach,
            renderer,
        })
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> FlowState {
        self.inner.lock().state.clone()
    }

    pub fn mode(&self) -> NetworkMode {
        self.inner.lock().mode
    }

    pub fn home_reachable(&self) -> bool {
        self.home_reachable.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        let inner = self.inner.lock();
        FlowSnapshot {
            flow_id: inner.active.as_ref().map(|a| a.id).or(inner.last_flow_id),
            state: inner.state.clone(),
            in_flight: inner.active.is_some(),
            lease_active: self.leases.current().is_some(),
            credentials_present: self.credentials.is_present(),
            home_reachable: self.home_reachable(),
            mode: inner.mode,
        }
    }

    /// Start a flow. Returns false (and does nothing) if one is in flight.
    pub fn start(self: &Arc<Self>) -> bool {
        let run = {
            let mut inner = self.inner.lock();
            if inner.active.is_some() {
                return false;
            }
            inner.generation += 1;
            let run = FlowRun {
                id: Uuid::new_v4(),
                generation: inner.generation,
                cancel: self.shutdown.child_token(),
            };
            inner.active =
                Some(ActiveFlow {
                id: run.id,
                cancel: run.cancel.clone(),
                challenge_id: None,
                lease_in_use: None,
            });
            inner.last_flow_id = Some(run.id);
            run
        };
        tracing::info!(flow = %run.id, "provisioning flow started");
        self.watch_home();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(this.run_flow(&run))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    tracing::error!(flow = %run.id, "provisioning flow panicked");
                    Err(FlowError::new(ErrorKind::Capture, MSG_INTERNAL))
                });
            this.finish(&run, result);
        });
        true
    }

    /// Abort any flow, wipe secrets, stop background work, return to idle.
    pub fn cancel(&self) {
        self.teardown("cancelled");
    }

    /// App moved to the background. Secrets are gone when this returns.
    pub fn background(&self) {
        self.teardown("backgrounded");
    }

    pub fn foreground(self: &Arc<Self>) {
        self.watch_home();
    }

    pub fn logout(&self) {
        self.teardown("logout");
    }

    pub fn set_mode(&self, mode: NetworkMode) {
        let running = {
            let mut inner = self.inner.lock();
            inner.mode = mode;
            inner.active.is_some()
        };
        tracing::info!(?mode, "network mode changed");
        if mode == NetworkMode::Remote && running {
            self.teardown("left local network");
        }
    }

    /// Resend the verification email for the pending challenge.
    pub async fn resend(&self) -> Result<(), FlowError> {
        let id = {
            let inner = self.inner.lock();
            let pending = inner.active.as_ref().and_then(|a| a.challenge_id.clone());
            match (&inner.state, pending) {
                (FlowState::WaitingApproval, Some(id)) => id,
                _ => return Err(FlowError::verification(MSG_NO_PENDING_CHALLENGE)),
            }
        };
        self.stepup.resend(&id).await?;
        tracing::info!("verification email resent");
        Ok(())
    }

    /// Start the reachability monitor unless it is already running.
    pub fn watch_home(self: &Arc<Self>) {
        let cancel = {
            let mut inner = self.inner.lock();
            if inner.monitor.is_some() {
                return;
            }
            let cancel = self.shutdown.child_token();
            inner.monitor = Some(cancel.clone());
            cancel
        };
        let weak = Arc::downgrade(self);
        spawn_reachability_monitor(
            Arc::clone(&self.reach),
            self.config.reachability_poll_interval(),
            cancel,
            move |reachable| {
                if let Some(p) = weak.upgrade() {
                    p.set_home_reachable(reachable);
                }
            },
        );
    }

    pub(super) fn set_home_reachable(&self, reachable: bool) {
        let prev = self.home_reachable.swap(reachable, Ordering::Relaxed);
        if prev != reachable {
            tracing::debug!(reachable, "home reachability changed");
            let _ = self.event_tx.send(FlowEvent::HomeReachable { reachable });
        }
    }

    /// Publish `next` if `run` is still the live flow.
    pub(super) fn transition(&self, run: &FlowRun, next: FlowState) -> Result<(), FlowError> {
        let mut inner = self.inner.lock();
        if inner.generation != run.generation || run.cancel.is_cancelled() {
            return Err(FlowError::cancelled());
        }
        tracing::info!(flow = %run.id, state = next.name(), "flow transition");
        self.set_state_locked(&mut inner, Some(run.id), next);
        Ok(())
    }

    pub(super) fn set_challenge(&self, run: &FlowRun, id: &str) {
        let mut inner = self.inner.lock();
        if inner.generation != run.generation {
            return;
        }
        if let Some(active) = inner.active.as_mut() {
            active.challenge_id = Some(id.to_owned());
        }
    }

    /// Record which lease `run` depends on. Expiry of that lease aborts it.
    pub(super) fn use_lease(&self, run: &FlowRun, serial: Option<u64>) {
        let mut inner = self.inner.lock();
        if inner.generation != run.generation {
            return;
        }
        if let Some(active) = inner.active.as_mut() {
            active.lease_in_use = serial;
        }
    }

    /// Arm the wipe timer for a freshly minted lease.
    pub(super) fn arm_expiry(self: &Arc<Self>, lease: &Lease) {
        let weak = Arc::downgrade(self);
        self.leases.schedule_expiry_wipe(lease, move |serial| {
            if let Some(p) = weak.upgrade() {
                p.on_lease_expired(serial);
            }
        });
    }

    fn on_lease_expired(&self, serial: u64) {
        let mut inner = self.inner.lock();
        if !self.leases.expire(serial) {
            return;
        }
        self.credentials.wipe();
        tracing::info!(lease = serial, "lease expired, secrets wiped");
        let _ = self.event_tx.send(FlowEvent::SecretsWiped { reason: "lease expired".to_owned() });

        match inner.active.as_ref().map(|a| a.lease_in_use) {
            // A run between leases re-mints when it next needs one.
            Some(in_use) if in_use != Some(serial) => return,
            Some(_) => Self::abort_active(&mut inner),
            None => {}
        }
        if inner.state != FlowState::Idle {
            self.set_state_locked(&mut inner, None, FlowState::Idle);
        }
    }

    fn finish(&self, run: &FlowRun, result: Result<String, FlowError>) {
        let mut inner = self.inner.lock();
        if inner.generation != run.generation || inner.active.is_none() {
            // Torn down while the run was unwinding.
            return;
        }
        Self::abort_active(&mut inner);
        self.credentials.wipe();
        if let Some(monitor) = inner.monitor.take() {
            monitor.cancel();
        }

        let next = match result {
            Ok(message) => {
                // Nothing left to do with the lease.
                self.leases.wipe();
                tracing::info!(flow = %run.id, "provisioning flow done");
                FlowState::Done { message }
            }
            Err(e) if e.is_cancelled() => FlowState::Idle,
            Err(e) if e.kind == ErrorKind::Blocked => {
                tracing::info!(flow = %run.id, reason = %e.message, "provisioning blocked");
                FlowState::Blocked { reason: e.message }
            }
            Err(e) => {
                tracing::warn!(flow = %run.id, err = %e, "provisioning flow failed");
                FlowState::Error { message: e.message }
            }
        };
        self.set_state_locked(&mut inner, Some(run.id), next);
    }

    fn teardown(&self, reason: &str) {
        let mut inner = self.inner.lock();
        Self::abort_active(&mut inner);
        if let Some(monitor) = inner.monitor.take() {
            monitor.cancel();
        }
        let had_lease = self.leases.wipe();
        let had_creds = self.credentials.wipe();
        if had_lease || had_creds {
            let _ = self.event_tx.send(FlowEvent::SecretsWiped { reason: reason.to_owned() });
        }
        tracing::info!(reason, "provisioning torn down");
        if inner.state != FlowState::Idle {
            self.set_state_locked(&mut inner, None, FlowState::Idle);
        }
    }

    /// Cancel the live run (if any) and invalidate its generation.
    fn abort_active(inner: &mut Inner) {
        if let Some(active) = inner.active.take() {
            active.cancel.cancel();
        }
        inner.generation += 1;
    }

    fn set_state_locked(&self, inner: &mut Inner, flow_id: Option<Uuid>, state: FlowState) {
        inner.state = state.clone();
        let _ = self.event_tx.send(FlowEvent::State { flow_id, state });
    }
}
