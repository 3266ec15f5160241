// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol between the capture agent and the external web renderer.
//!
//! The renderer reports [`PageEvent`]s and executes [`AgentCommand`]s. It
//! never receives credentials except inside [`AgentCommand::Fill`], and it
//! must cancel any navigation it has not been told to allow.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use tokio::sync::mpsc;

use crate::backend::BoxFuture;
use crate::capture::dom::DomNode;

/// Parameters for opening a confined browsing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RendererLaunch {
    pub account_url: String,
    pub allowed_hosts: Vec<String>,
}

/// How a navigation was initiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationKind {
    #[default]
    Link,
    Redirect,
    /// Same-document history change (`pushState`, hash change).
    History,
    /// Back/forward button or `history.back()`.
    Back,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    /// The page wants to navigate. Held until allowed or denied.
    NavigationRequested {
        request_id: u64,
        url: String,
        #[serde(default)]
        kind: NavigationKind,
    },
    /// The page tried to open a new window.
    PopupRequested { url: String },
    /// A document finished loading.
    Loaded { url: String, dom: DomNode },
    /// The DOM changed after load.
    Mutated { dom: DomNode },
    /// Reply to [`AgentCommand::RequestSnapshot`].
    Snapshot { dom: DomNode },
    /// The renderer went away.
    Closed {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// A value typed into a field. Serialized in clear for the renderer only;
/// never shown by `Debug`.
pub struct FillValue(SecretString);

impl FillValue {
    pub fn new(secret: &SecretString) -> Self {
        Self(SecretString::from(secret.expose_secret().to_owned()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for FillValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Serialize for FillValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.expose_secret())
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentCommand {
    AllowNavigation { request_id: u64 },
    DenyNavigation { request_id: u64 },
    /// Force the top-level document to `url`.
    Load { url: String },
    BlockPopup { url: String },
    Fill { element: String, value: FillValue },
    /// Submit the form owning `element`.
    Submit { element: String },
    /// Replace the field's value with `placeholder`, make it read-only and
    /// password-typed.
    Redact { element: String, placeholder: String },
    RequestSnapshot,
    Close,
}

/// Channels of an attached browsing session.
pub struct RendererSession {
    pub events: mpsc::Receiver<PageEvent>,
    pub commands: mpsc::Sender<AgentCommand>,
}

impl RendererSession {
    /// Create a connected pair: the session half for the agent and the
    /// renderer half for whatever drives the page.
    pub fn pair(buffer: usize) -> (Self, RendererEnd) {
        let (event_tx, event_rx) = mpsc::channel(buffer);
        let (command_tx, command_rx) = mpsc::channel(buffer);
        (
            Self { events: event_rx, commands: command_tx },
            RendererEnd { events: event_tx, commands: command_rx },
        )
    }
}

/// The renderer-facing half of a [`RendererSession`].
pub struct RendererEnd {
    pub events: mpsc::Sender<PageEvent>,
    pub commands: mpsc::Receiver<AgentCommand>,
}

/// Something that can host a confined browsing session.
pub trait Renderer: Send + Sync + 'static {
    fn launch(&self, launch: RendererLaunch) -> BoxFuture<'_, anyhow::Result<RendererSession>>;
}
