// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Short-lived leases and the wipe-on-expiry timer.
//!
//! At most one lease is tracked at a time. Minting replaces the previous
//! lease; the expiry timer is re-armed for the new one and aborted when the
//! flow tears down. Expiry is judged through a [`Clock`] so tests can drive
//! it with tokio's paused time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;

use crate::backend::{Backend, BackendError};

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> u64;
}

/// Wall clock anchored once at construction and advanced by tokio's
/// monotonic clock, so it follows paused time in tests.
pub struct SystemClock {
    anchor_ms: u64,
    anchor: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self { anchor_ms, anchor: tokio::time::Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as u64
    }
}

/// A lease token with its expiry.
#[derive(Debug)]
pub struct Lease {
    serial: u64,
    token: SecretString,
    expires_at_ms: u64,
}

impl Lease {
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    pub fn expires_at_ms(&self) -> u64 {
        self.expires_at_ms
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn duplicate(&self) -> Self {
        Self {
            serial: self.serial,
            token: SecretString::from(self.token.expose_secret().to_owned()),
            expires_at_ms: self.expires_at_ms,
        }
    }
}

/// Aborts the timer task when dropped.
struct WipeTimer {
    serial: u64,
    handle: JoinHandle<()>,
}

impl Drop for WipeTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct LeaseManager {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Lease>>,
    timer: Mutex<Option<WipeTimer>>,
    next_serial: AtomicU64,
}

impl LeaseManager {
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            current: Mutex::new(None),
            timer: Mutex::new(None),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Mint a new lease and make it the tracked one.
    ///
    /// The returned copy is for the caller's immediate use; the tracked copy
    /// is the one the expiry timer wipes.
    pub async fn mint(&self) -> Result<Lease, BackendError> {
        let grant = self.backend.mint_lease().await?;
        let lease = Lease {
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            token: grant.token,
            expires_at_ms: grant.expires_at_ms,
        };
        *self.current.lock() = Some(lease.duplicate());
        tracing::debug!(
            lease = lease.serial,
            expires_in_ms = self.remaining(&lease).as_millis() as u64,
            "lease minted"
        );
        Ok(lease)
    }

    /// Token present and not yet expired.
    pub fn is_active(&self, lease: &Lease) -> bool {
        !lease.token.expose_secret().is_empty() && self.clock.now_ms() < lease.expires_at_ms
    }

    /// Time left before `lease` expires.
    pub fn remaining(&self, lease: &Lease) -> Duration {
        Duration::from_millis(lease.expires_at_ms.saturating_sub(self.clock.now_ms()))
    }

    /// A copy of the tracked lease, only if it is still active.
    pub fn current(&self) -> Option<Lease> {
        let current = self.current.lock();
        current.as_ref().filter(|l| self.is_active(l)).map(Lease::duplicate)
    }

    /// Arm the wipe timer for `lease`, replacing any previous timer.
    ///
    /// `on_expire` runs once, no later than the lease's expiry.
    pub fn schedule_expiry_wipe<F>(&self, lease: &Lease, on_expire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let delay = self.remaining(lease);
        let serial = lease.serial;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_expire(serial);
        });
        // Replacing drops (and aborts) the previous timer.
        *self.timer.lock() = Some(WipeTimer { serial, handle });
    }

    pub fn cancel_expiry_wipe(&self) {
        self.timer.lock().take();
    }

    /// Serial of the lease the wipe timer is armed for.
    pub fn armed_serial(&self) -> Option<u64> {
        self.timer.lock().as_ref().map(|t| t.serial)
    }

    /// Called when the timer for `serial` fires: drop that lease and its
    /// timer. A lease minted since then is left alone.
    pub fn expire(&self, serial: u64) -> bool {
        {
            let mut timer = self.timer.lock();
            // Aborting the task that runs this call is harmless: it has no
            // await point left.
            if timer.as_ref().is_some_and(|t| t.serial == serial) {
                timer.take();
            }
        }
        let mut current = self.current.lock();
        if current.as_ref().is_some_and(|l| l.serial == serial) {
            current.take();
            return true;
        }
        false
    }

    /// Drop the tracked lease and its timer. Returns true if a lease was held.
    pub fn wipe(&self) -> bool {
        self.cancel_expiry_wipe();
        self.current.lock().take().is_some()
    }

    pub fn is_held(&self) -> bool {
        self.current.lock().is_some()
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
