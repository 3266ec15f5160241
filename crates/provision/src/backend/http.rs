// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the account backend.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{Backend, BackendError, BoxFuture, ChallengeStatus, LeaseGrant};
use crate::error::ErrorResponse;
use crate::secrets::HubCredentials;

const STEP_UP_REQUIRED: &str = "STEP_UP_REQUIRED";
const VERIFICATION_REQUIRED: &str = "VERIFICATION_REQUIRED";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    challenge_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseResponse {
    lease_token: String,
    expires_at: u64,
}

#[derive(Deserialize)]
struct SecretsResponse {
    username: String,
    password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaseRequest<'a> {
    lease_token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CloudUrlRequest<'a> {
    lease_token: &'a str,
    url: &'a str,
}

/// reqwest-backed [`Backend`].
pub struct HttpBackend {
    base_url: String,
    session_token: Option<String>,
    client: Client,
}

impl HttpBackend {
    pub fn new(base_url: String, session_token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), session_token, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.session_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Response, BackendError> {
        let resp = self.apply_auth(req).send().await.map_err(transport_error)?;
        check_status(resp).await
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Network(e.without_url().to_string())
    }
}

/// Map a non-success response onto [`BackendError`] using the error envelope.
async fn check_status(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let envelope = serde_json::from_str::<ErrorResponse>(&text).ok();
    match envelope.as_ref().map(|e| e.error.code.as_str()) {
        Some(STEP_UP_REQUIRED) => return Err(BackendError::StepUpRequired),
        Some(VERIFICATION_REQUIRED) => return Err(BackendError::VerificationRequired),
        _ => {}
    }
    if status == StatusCode::NOT_FOUND {
        return Err(BackendError::NotFound);
    }
    let message = envelope.map(|e| e.error.message).unwrap_or(text);
    Err(BackendError::Rejected { status: status.as_u16(), message })
}

async fn json<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, BackendError> {
    resp.json().await.map_err(|e| BackendError::Network(e.without_url().to_string()))
}

impl Backend for HttpBackend {
    fn start_step_up(&self) -> BoxFuture<'_, Result<String, BackendError>> {
        Box::pin(async move {
            let req = self.client.post(self.url("/step-up/start")).json(&serde_json::json!({}));
            let body: StartResponse = json(self.send(req).await?).await?;
            Ok(body.challenge_id)
        })
    }

    fn challenge_status<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ChallengeStatus, BackendError>> {
        Box::pin(async move {
            let req = self.client.get(self.url(&format!("/challenge/{id}")));
            match self.send(req).await {
                Ok(resp) => {
                    let body: StatusResponse = json(resp).await?;
                    Ok(ChallengeStatus::parse(&body.status))
                }
                Err(BackendError::NotFound) => Ok(ChallengeStatus::NotFound),
                Err(e) => Err(e),
            }
        })
    }

    fn complete_challenge<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let req = self.client.post(self.url(&format!("/challenge/{id}/complete")));
            // Body is `{ok}` or `{stepUpApproved}`; both mean the step-up is satisfied.
            self.send(req).await?;
            Ok(())
        })
    }

    fn resend_challenge<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let req = self.client.post(self.url(&format!("/challenge/{id}/resend")));
            self.send(req).await?;
            Ok(())
        })
    }

    fn mint_lease(&self) -> BoxFuture<'_, Result<LeaseGrant, BackendError>> {
        Box::pin(async move {
            let req = self.client.post(self.url("/lease"));
            let body: LeaseResponse = json(self.send(req).await?).await?;
            Ok(LeaseGrant {
                token: SecretString::from(body.lease_token),
                expires_at_ms: body.expires_at,
            })
        })
    }

    fn fetch_secrets<'a>(
        &'a self,
        lease_token: &'a SecretString,
    ) -> BoxFuture<'a, Result<HubCredentials, BackendError>> {
        Box::pin(async move {
            let body = LeaseRequest { lease_token: lease_token.expose_secret() };
            let req = self.client.post(self.url("/secrets")).json(&body);
            let body: SecretsResponse = json(self.send(req).await?).await?;
            Ok(HubCredentials::new(body.username, body.password))
        })
    }

    fn save_cloud_url<'a>(
        &'a self,
        lease_token: &'a SecretString,
        url: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let body = CloudUrlRequest { lease_token: lease_token.expose_secret(), url };
            let req = self.client.post(self.url("/cloud-url")).json(&body);
            self.send(req).await?;
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
