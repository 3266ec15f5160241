// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ProvisionConfig;
use crate::flow::Provisioner;
use crate::transport::bridge::WsRenderer;

/// Shared state behind the control API.
pub struct AppState {
    pub config: ProvisionConfig,
    pub provisioner: Arc<Provisioner>,
    /// Hands browsing sessions to the renderer attached on `/ws/renderer`.
    pub renderer: Arc<WsRenderer>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: ProvisionConfig,
        provisioner: Arc<Provisioner>,
        renderer: Arc<WsRenderer>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { config, provisioner, renderer, shutdown }
    }
}
