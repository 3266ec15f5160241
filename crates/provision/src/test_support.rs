// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: config, in-memory backend, scripted hub
//! pages, and a clock that can jump ahead of tokio's timers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendError, BoxFuture, ChallengeStatus, LeaseGrant};
use crate::capture::dom::DomNode;
use crate::config::{NetworkMode, ProvisionConfig};
use crate::flow::{Collaborators, Provisioner};
use crate::hub::Reachability;
use crate::lease::{Clock, SystemClock};
use crate::renderer::{
    AgentCommand, NavigationKind, PageEvent, Renderer, RendererEnd, RendererLaunch,
    RendererSession,
};
use crate::secrets::HubCredentials;

pub const HUB_URL: &str = "http://hub.local:8123";
pub const HUB_USERNAME: &str = "svc-remote";
pub const HUB_PASSWORD: &str = "hunter2-ephemeral";
pub const REMOTE_URL: &str = "https://abc123.ui.nabu.casa";

/// Config with short timings for tests.
pub fn test_config() -> ProvisionConfig {
    ProvisionConfig {
        host: "127.0.0.1".into(),
        port: 0,
        auth_token: None,
        backend_url: "http://backend.test".into(),
        backend_token: Some("session".into()),
        hub_url: HUB_URL.into(),
        hub_token: None,
        account_path: "/config/cloud/account".into(),
        account_path_prefix: "/config/cloud".into(),
        auth_path_prefixes: vec!["/auth/authorize".into(), "/auth/login_flow".into()],
        extra_allowed_hosts: vec![],
        provider_suffix: ".ui.nabu.casa".into(),
        mode: NetworkMode::Local,
        challenge_poll_ms: 10,
        challenge_max_wait_secs: 5,
        complete_attempts: 3,
        complete_backoff_ms: 5,
        request_timeout_ms: 1000,
        hub_probe_timeout_ms: 100,
        reachability_poll_ms: 1000,
        url_probe_timeout_ms: 100,
        capture_scan_ms: 50,
        capture_max_scans: 20,
        capture_observe_secs: 5,
        browse_timeout_secs: 10,
        renderer_attach_secs: 2,
        log_format: "text".into(),
        log_level: "warn".into(),
    }
}

/// Wall clock that follows tokio time and can be pushed ahead of it, so a
/// lease reads as expired before its wipe timer fires.
#[derive(Default)]
pub struct SkewClock {
    base: SystemClock,
    skew_ms: AtomicU64,
}

impl SkewClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.skew_ms.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Clock for SkewClock {
    fn now_ms(&self) -> u64 {
        self.base.now_ms() + self.skew_ms.load(Ordering::Relaxed)
    }
}

/// In-memory account backend.
pub struct MockBackend {
    clock: Arc<dyn Clock>,
    lease_ttl: Mutex<Duration>,
    /// Statuses returned by successive polls; the last one repeats.
    statuses: Mutex<VecDeque<Result<ChallengeStatus, BackendError>>>,
    fallback_status: Mutex<ChallengeStatus>,
    complete_failures: AtomicU32,
    secrets_rejections: AtomicU32,
    mint_error: Mutex<Option<BackendError>>,
    save_error: Mutex<Option<BackendError>>,
    save_delay: Mutex<Duration>,
    saved: Mutex<Vec<(String, String)>>,
    pub step_up_starts: AtomicU32,
    pub polls: AtomicU32,
    pub complete_calls: AtomicU32,
    pub resend_calls: AtomicU32,
    pub lease_mints: AtomicU32,
    pub secrets_calls: AtomicU32,
}

impl MockBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            lease_ttl: Mutex::new(Duration::from_secs(300)),
            statuses: Mutex::new(VecDeque::new()),
            fallback_status: Mutex::new(ChallengeStatus::Approved),
            complete_failures: AtomicU32::new(0),
            secrets_rejections: AtomicU32::new(0),
            mint_error: Mutex::new(None),
            save_error: Mutex::new(None),
            save_delay: Mutex::new(Duration::ZERO),
            saved: Mutex::new(Vec::new()),
            step_up_starts: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            complete_calls: AtomicU32::new(0),
            resend_calls: AtomicU32::new(0),
            lease_mints: AtomicU32::new(0),
            secrets_calls: AtomicU32::new(0),
        }
    }

    pub fn lease_ttl(self, ttl: Duration) -> Self {
        *self.lease_ttl.lock() = ttl;
        self
    }

    /// Script the poll results; once drained the last status repeats.
    pub fn statuses(self, statuses: Vec<Result<ChallengeStatus, BackendError>>) -> Self {
        if let Some(Ok(last)) = statuses.last() {
            *self.fallback_status.lock() = *last;
        }
        *self.statuses.lock() = statuses.into();
        self
    }

    /// Fail the first `n` completion calls.
    pub fn complete_failures(self, n: u32) -> Self {
        self.complete_failures.store(n, Ordering::Relaxed);
        self
    }

    /// Reject the first `n` secrets calls with `StepUpRequired`.
    pub fn secrets_rejections(self, n: u32) -> Self {
        self.secrets_rejections.store(n, Ordering::Relaxed);
        self
    }

    pub fn mint_error(self, e: BackendError) -> Self {
        *self.mint_error.lock() = Some(e);
        self
    }

    pub fn save_error(self, e: BackendError) -> Self {
        *self.save_error.lock() = Some(e);
        self
    }

    /// Hold every save for `delay` before answering.
    pub fn save_delay(self, delay: Duration) -> Self {
        *self.save_delay.lock() = delay;
        self
    }

    /// `(lease token, url)` pairs saved so far.
    pub fn saved(&self) -> Vec<(String, String)> {
        self.saved.lock().clone()
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::Relaxed)
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1)).is_ok()
    }
}

impl Backend for MockBackend {
    fn start_step_up(&self) -> BoxFuture<'_, Result<String, BackendError>> {
        Box::pin(async move {
            let n = self.step_up_starts.fetch_add(1, Ordering::Relaxed) + 1;
            Ok(format!("challenge-{n}"))
        })
    }

    fn challenge_status<'a>(
        &'a self,
        _id: &'a str,
    ) -> BoxFuture<'a, Result<ChallengeStatus, BackendError>> {
        Box::pin(async move {
            self.polls.fetch_add(1, Ordering::Relaxed);
            match self.statuses.lock().pop_front() {
                Some(result) => result,
                None => Ok(*self.fallback_status.lock()),
            }
        })
    }

    fn complete_challenge<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            self.complete_calls.fetch_add(1, Ordering::Relaxed);
            if Self::take_one(&self.complete_failures) {
                return Err(BackendError::Rejected {
                    status: 409,
                    message: "approval not yet visible".into(),
                });
            }
            Ok(())
        })
    }

    fn resend_challenge<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            self.resend_calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn mint_lease(&self) -> BoxFuture<'_, Result<LeaseGrant, BackendError>> {
        Box::pin(async move {
            if let Some(e) = self.mint_error.lock().clone() {
                return Err(e);
            }
            let n = self.lease_mints.fetch_add(1, Ordering::Relaxed) + 1;
            let ttl = *self.lease_ttl.lock();
            Ok(LeaseGrant {
                token: SecretString::from(format!("lease-{n}")),
                expires_at_ms: self.clock.now_ms() + ttl.as_millis() as u64,
            })
        })
    }

    fn fetch_secrets<'a>(
        &'a self,
        _lease_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<HubCredentials, BackendError>> {
        Box::pin(async move {
            self.secrets_calls.fetch_add(1, Ordering::Relaxed);
            if Self::take_one(&self.secrets_rejections) {
                return Err(BackendError::StepUpRequired);
            }
            Ok(HubCredentials::new(HUB_USERNAME.into(), HUB_PASSWORD.into()))
        })
    }

    fn save_cloud_url<'a>(
        &'a self,
        lease_token: &'a SecretString,
        url: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let delay = *self.save_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some(e) = self.save_error.lock().clone() {
                return Err(e);
            }
            self.saved.lock().push((lease_token.expose_secret().to_owned(), url.to_owned()));
            Ok(())
        })
    }
}

/// Reachability with switchable answers.
pub struct MockReachability {
    hub: AtomicBool,
    url: AtomicBool,
    url_delay: Mutex<Duration>,
    pub hub_probes: AtomicU32,
}

impl MockReachability {
    pub fn new(hub: bool, url: bool) -> Self {
        Self {
            hub: AtomicBool::new(hub),
            url: AtomicBool::new(url),
            url_delay: Mutex::new(Duration::ZERO),
            hub_probes: AtomicU32::new(0),
        }
    }

    /// Answer remote URL checks only after `delay`.
    pub fn url_delay(self, delay: Duration) -> Self {
        *self.url_delay.lock() = delay;
        self
    }

    pub fn set_hub(&self, reachable: bool) {
        self.hub.store(reachable, Ordering::Relaxed);
    }
}

impl Reachability for MockReachability {
    fn hub_reachable(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.hub_probes.fetch_add(1, Ordering::Relaxed);
            self.hub.load(Ordering::Relaxed)
        })
    }

    fn url_reachable<'a>(&'a self, _url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let delay = *self.url_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.url.load(Ordering::Relaxed)
        })
    }
}

/// How the scripted hub behaves once a session is launched.
#[derive(Debug, Clone)]
pub enum HubScript {
    /// Redirect to login, accept the filled form, then show the account
    /// page with `remote_url` inside a shadow root.
    Login { remote_url: String },
    /// Already signed in: the account page shows `remote_url` directly.
    SignedIn { remote_url: String },
    /// Account page that never shows a remote URL.
    NoRemoteUrl,
    /// Close the page right after it loads.
    CloseAfterLoad,
    /// Accept the session but never answer.
    Silent,
    /// Refuse to launch.
    FailLaunch,
}

/// What a [`ScriptedRenderer`] saw.
#[derive(Default)]
pub struct RendererLog {
    pub launches: Mutex<Vec<RendererLaunch>>,
    /// `(element, value)` pairs typed into the page.
    pub fills: Mutex<Vec<(String, String)>>,
    pub redactions: Mutex<Vec<String>>,
    pub denied: AtomicU32,
    pub closed: AtomicBool,
}

type PageHook = Arc<dyn Fn() + Send + Sync>;

/// Renderer that simulates the hub's pages in-process.
pub struct ScriptedRenderer {
    script: HubScript,
    pub log: Arc<RendererLog>,
    on_account_page: Option<PageHook>,
}

impl ScriptedRenderer {
    pub fn new(script: HubScript) -> Self {
        Self { script, log: Arc::new(RendererLog::default()), on_account_page: None }
    }

    /// Run `hook` just before the account page is reported to the agent.
    pub fn on_account_page(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_account_page = Some(Arc::new(hook));
        self
    }
}

impl Renderer for ScriptedRenderer {
    fn launch(&self, launch: RendererLaunch) -> BoxFuture<'_, anyhow::Result<RendererSession>> {
        Box::pin(async move {
            if matches!(self.script, HubScript::FailLaunch) {
                anyhow::bail!("renderer unavailable");
            }
            let account_url = launch.account_url.clone();
            self.log.launches.lock().push(launch);
            let (session, end) = RendererSession::pair(32);
            let page = HubPage {
                script: self.script.clone(),
                account_url,
                log: Arc::clone(&self.log),
                on_account_page: self.on_account_page.clone(),
                dom: DomNode::element("root", "html"),
                signed_in: false,
                next_request: 1,
            };
            tokio::spawn(page.serve(end));
            Ok(session)
        })
    }
}

struct HubPage {
    script: HubScript,
    account_url: String,
    log: Arc<RendererLog>,
    on_account_page: Option<PageHook>,
    dom: DomNode,
    signed_in: bool,
    next_request: u64,
}

impl HubPage {
    async fn serve(mut self, end: RendererEnd) {
        let RendererEnd { events, mut commands } = end;
        if matches!(self.script, HubScript::Silent) {
            // Hold the channels open until the agent gives up.
            while commands.recv().await.is_some() {}
            return;
        }
        while let Some(cmd) = commands.recv().await {
            let mut out = Vec::new();
            match cmd {
                AgentCommand::Load { .. } => out.push(self.load_account()),
                AgentCommand::AllowNavigation { .. } => out.push(self.load_account()),
                AgentCommand::DenyNavigation { .. } => {
                    self.log.denied.fetch_add(1, Ordering::Relaxed);
                }
                AgentCommand::Fill { element, value } => {
                    let value = value.expose().to_owned();
                    if let Some(node) = self.dom.find_by_id_mut(&element) {
                        node.value = Some(value.clone());
                    }
                    self.log.fills.lock().push((element, value));
                }
                AgentCommand::Submit { .. } => {
                    self.signed_in = true;
                    let request_id = self.next_request;
                    self.next_request += 1;
                    out.push(PageEvent::NavigationRequested {
                        request_id,
                        url: self.account_url.clone(),
                        kind: NavigationKind::Redirect,
                    });
                }
                AgentCommand::Redact { element, placeholder } => {
                    if let Some(node) = self.dom.find_by_id_mut(&element) {
                        node.value = Some(placeholder);
                        node.read_only = true;
                        node.input_type = Some("password".into());
                    }
                    self.log.redactions.lock().push(element);
                }
                AgentCommand::RequestSnapshot => {
                    out.push(PageEvent::Snapshot { dom: self.dom.clone() });
                }
                AgentCommand::BlockPopup { .. } => {}
                AgentCommand::Close => {
                    self.log.closed.store(true, Ordering::Relaxed);
                    return;
                }
            }
            if matches!(self.script, HubScript::CloseAfterLoad)
                && out.iter().any(|e| matches!(e, PageEvent::Loaded { .. }))
            {
                out.push(PageEvent::Closed { reason: Some("user closed".into()) });
            }
            for event in out {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }
    }

    fn load_account(&mut self) -> PageEvent {
        let needs_login = matches!(self.script, HubScript::Login { .. }) && !self.signed_in;
        if needs_login {
            self.dom = login_dom();
            let base = self.account_url.split("/config").next().unwrap_or_default().to_owned();
            return PageEvent::Loaded {
                url: format!("{base}/auth/authorize?redirect_uri=%2Fconfig%2Fcloud%2Faccount"),
                dom: self.dom.clone(),
            };
        }
        self.dom = match self.script {
            HubScript::Login { ref remote_url } | HubScript::SignedIn { ref remote_url } => {
                account_dom(Some(remote_url))
            }
            _ => account_dom(None),
        };
        if let Some(ref hook) = self.on_account_page {
            hook();
        }
        PageEvent::Loaded { url: self.account_url.clone(), dom: self.dom.clone() }
    }
}

/// The hub's login form.
pub fn login_dom() -> DomNode {
    DomNode::element("root", "html").with_children(vec![DomNode::element("form", "ha-auth-flow")
        .with_shadow(vec![
            DomNode::input("user", "text").with_name("username"),
            DomNode::input("pass", "password").with_name("password"),
        ])])
}

/// The account page; the remote URL sits in a read-only field inside a
/// shadow root.
pub fn account_dom(remote_url: Option<&str>) -> DomNode {
    let mut field = DomNode::input("remote-url", "text").with_name("remote_url");
    field.read_only = true;
    if let Some(url) = remote_url {
        field = field.with_value(url);
    }
    DomNode::element("root", "html").with_children(vec![
        DomNode::element("nav", "nav"),
        DomNode::element("card", "ha-card").with_shadow(vec![field]),
    ])
}

/// A provisioner wired to the given fakes.
pub fn provisioner(
    config: ProvisionConfig,
    backend: Arc<MockBackend>,
    reach: Arc<MockReachability>,
    renderer: Arc<ScriptedRenderer>,
    clock: Arc<dyn Clock>,
) -> Arc<Provisioner> {
    Provisioner::new(
        config,
        Collaborators { backend, reach, renderer, clock },
        CancellationToken::new(),
    )
}
