// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The capture agent as a pure state machine: page events in, renderer
//! commands out. Timing lives in [`super::driver`].

use crate::capture::dom::DomNode;
use crate::capture::{is_masked, mentions_provider, REDACTED_PLACEHOLDER};
use crate::confine::ConfinementPolicy;
use crate::renderer::{AgentCommand, FillValue, NavigationKind, PageEvent};
use crate::secrets::HubCredentials;

/// Result of feeding one event to the agent.
#[derive(Debug, Default)]
pub struct Step {
    pub commands: Vec<AgentCommand>,
    /// Raw captured value. Set at most once per agent.
    pub captured: Option<String>,
    /// The renderer closed; no capture will follow.
    pub closed: bool,
}

pub struct CaptureAgent {
    policy: ConfinementPolicy,
    account_url: String,
    provider_suffix: String,
    credentials: Option<HubCredentials>,
    current_url: Option<String>,
    filled_this_load: bool,
    captured: bool,
}

impl CaptureAgent {
    pub fn new(
        policy: ConfinementPolicy,
        account_url: impl Into<String>,
        provider_suffix: impl Into<String>,
        credentials: HubCredentials,
    ) -> Self {
        Self {
            policy,
            account_url: account_url.into(),
            provider_suffix: provider_suffix.into(),
            credentials: Some(credentials),
            current_url: None,
            filled_this_load: false,
            captured: false,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn has_captured(&self) -> bool {
        self.captured
    }

    pub fn wipe_credentials(&mut self) {
        self.credentials = None;
    }

    /// Commands that open the session.
    pub fn start(&self) -> Vec<AgentCommand> {
        vec![AgentCommand::Load { url: self.account_url.clone() }]
    }

    pub fn on_event(&mut self, event: PageEvent) -> Step {
        let mut step = Step::default();
        match event {
            PageEvent::NavigationRequested { request_id, url, kind } => {
                self.on_navigation(request_id, &url, kind, &mut step);
            }
            PageEvent::PopupRequested { url } => {
                tracing::debug!("popup blocked");
                step.commands.push(AgentCommand::BlockPopup { url });
            }
            PageEvent::Loaded { url, dom } => {
                self.filled_this_load = false;
                // Loads the gate never saw (server redirects) are re-checked.
                if !self.policy.check(&url) {
                    tracing::debug!("loaded page outside confinement, returning to account");
                    step.commands.push(self.reload_account());
                    return step;
                }
                self.current_url = Some(url);
                self.on_dom(&dom, &mut step);
            }
            PageEvent::Mutated { dom } | PageEvent::Snapshot { dom } => {
                self.on_dom(&dom, &mut step);
            }
            PageEvent::Closed { reason } => {
                tracing::debug!(reason = reason.as_deref().unwrap_or(""), "renderer closed");
                step.closed = true;
            }
        }
        step
    }

    fn reload_account(&self) -> AgentCommand {
        AgentCommand::Load { url: self.account_url.clone() }
    }

    fn on_navigation(&mut self, request_id: u64, url: &str, kind: NavigationKind, step: &mut Step) {
        let locked = self.captured || self.policy.reached_account();
        let allowed = if kind == NavigationKind::Back && locked {
            false
        } else {
            self.policy.check(url)
        };
        if allowed {
            step.commands.push(AgentCommand::AllowNavigation { request_id });
        } else {
            tracing::debug!(?kind, "navigation denied");
            step.commands.push(AgentCommand::DenyNavigation { request_id });
            step.commands.push(self.reload_account());
        }
    }

    fn on_dom(&mut self, dom: &DomNode, step: &mut Step) {
        self.try_autofill(dom, step);
        if let Some(value) = self.try_capture(dom, step) {
            step.captured = Some(value);
        }
    }

    /// Fill and submit the login form once per page load, only on a login
    /// page and only before the account page has been reached.
    fn try_autofill(&mut self, dom: &DomNode, step: &mut Step) {
        if self.filled_this_load || self.captured {
            return;
        }
        let on_auth = self.current_url.as_deref().is_some_and(|u| self.policy.on_auth_page(u));
        if !on_auth {
            return;
        }
        let Some(creds) = self.credentials.as_ref() else {
            return;
        };
        let Some(password) = dom.find_input(|n| n.is_password() && !n.read_only) else {
            return;
        };
        let username = dom
            .find_input(|n| {
                n.is_username_like()
                    && [n.name.as_deref(), n.autocomplete.as_deref()]
                        .iter()
                        .flatten()
                        .any(|a| {
                            let a = a.to_ascii_lowercase();
                            a.contains("user") || a.contains("email")
                        })
            })
            .or_else(|| dom.find_input(DomNode::is_username_like));
        let Some(username) = username else {
            return;
        };

        step.commands.push(AgentCommand::Fill {
            element: username.id.clone(),
            value: FillValue::new(creds.username()),
        });
        step.commands.push(AgentCommand::Fill {
            element: password.id.clone(),
            value: FillValue::new(creds.password()),
        });
        step.commands.push(AgentCommand::Submit { element: password.id.clone() });
        self.filled_this_load = true;
        tracing::debug!("login form filled");
    }

    fn try_capture(&mut self, dom: &DomNode, step: &mut Step) -> Option<String> {
        if self.captured {
            return None;
        }
        let suffix = &self.provider_suffix;
        let field = dom.find_input(|n| {
            !n.is_password()
                && n.value.as_deref().is_some_and(|v| mentions_provider(v, suffix) && !is_masked(v))
        })?;
        let value = field.value.clone()?;
        self.captured = true;
        step.commands.push(AgentCommand::Redact {
            element: field.id.clone(),
            placeholder: REDACTED_PLACEHOLDER.to_owned(),
        });
        tracing::info!("remote url captured and redacted");
        Some(value)
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
