// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ephemeral hub credentials: fetched with a lease, held in memory only,
//! zeroized on drop.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};

use crate::backend::{Backend, BackendError};
use crate::lease::{Lease, LeaseManager};

/// Hub login credentials scoped to a single lease.
///
/// Not `Clone`: every copy is explicit via [`HubCredentials::duplicate`].
pub struct HubCredentials {
    username: SecretString,
    password: SecretString,
}

impl HubCredentials {
    pub fn new(username: String, password: String) -> Self {
        Self { username: SecretString::from(username), password: SecretString::from(password) }
    }

    pub fn username(&self) -> &SecretString {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    pub fn duplicate(&self) -> Self {
        Self::new(
            self.username.expose_secret().to_owned(),
            self.password.expose_secret().to_owned(),
        )
    }
}

impl fmt::Debug for HubCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HubCredentials([REDACTED])")
    }
}

/// Volatile holder for the credentials of the live lease.
///
/// Uses a synchronous lock so that backgrounding can wipe without awaiting.
#[derive(Default)]
pub struct CredentialSlot {
    inner: Mutex<Option<HubCredentials>>,
}

impl CredentialSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, creds: HubCredentials) {
        *self.inner.lock() = Some(creds);
    }

    /// Drop any held credentials. Returns true if something was wiped.
    pub fn wipe(&self) -> bool {
        self.inner.lock().take().is_some()
    }

    /// A copy for handing to the capture agent.
    pub fn duplicate(&self) -> Option<HubCredentials> {
        self.inner.lock().as_ref().map(HubCredentials::duplicate)
    }

    pub fn is_present(&self) -> bool {
        self.inner.lock().is_some()
    }
}

/// Exchanges a live lease for hub credentials.
pub struct CredentialFetcher {
    backend: Arc<dyn Backend>,
}

impl CredentialFetcher {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Fetch credentials for `lease`.
    ///
    /// A lease that is already expired locally is reported as
    /// [`BackendError::StepUpRequired`] without a network call.
    pub async fn fetch(
        &self,
        leases: &LeaseManager,
        lease: &Lease,
    ) -> Result<HubCredentials, BackendError> {
        if !leases.is_active(lease) {
            return Err(BackendError::StepUpRequired);
        }
        self.backend.fetch_secrets(lease.token()).await
    }
}

#[cfg(test)]
#[path = "secrets_tests.rs"]
mod tests;
