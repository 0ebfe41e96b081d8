//! Low-level panel HTTP client.
//!
//! Only the endpoint the live layer needs: minting a per-server agent JWT.
//! Returns the wire envelope; conversion into [`crate::auth::ChannelToken`]
//! happens in the auth layer.

use crate::auth::JwtEnvelope;
use crate::error::HttpError;
use crate::http::retry::{RetryConfig, RetryPolicy};

use async_lock::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// How requests authenticate against the panel.
#[derive(Clone)]
pub enum Credential {
    /// `Authorization: Bearer <api key>`.
    Bearer(String),
    /// Raw `Cookie` header from an existing browser session.
    Cookie(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Cookie(_) => f.write_str("Cookie(<redacted>)"),
        }
    }
}

/// Low-level HTTP client for the FeatherPanel REST API.
#[derive(Clone)]
pub struct PanelHttp {
    base_url: String,
    client: Client,
    /// NEVER exposed publicly.
    credential: Arc<RwLock<Option<Credential>>>,
}

impl PanelHttp {
    pub fn new(base_url: &str) -> Result<Self, HttpError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credential: Arc::new(RwLock::new(None)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn set_credential(&self, credential: Option<Credential>) {
        *self.credential.write().await = credential;
    }

    pub async fn has_credential(&self) -> bool {
        self.credential.read().await.is_some()
    }

    // ── Servers ──────────────────────────────────────────────────────────

    /// `POST /api/user/servers/{uuid}/jwt`
    pub async fn server_jwt(
        &self,
        server_uuid: &str,
        retry: RetryPolicy,
    ) -> Result<JwtEnvelope, HttpError> {
        let url = format!(
            "{}/api/user/servers/{}/jwt",
            self.base_url,
            urlencoding::encode(server_uuid)
        );
        self.post(&url, &serde_json::json!({}), retry).await
    }

    // ── Internal HTTP methods ────────────────────────────────────────────

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
        retry: RetryPolicy,
    ) -> Result<T, HttpError> {
        self.request_with_retry(reqwest::Method::POST, url, Some(body), retry)
            .await
    }

    async fn request_with_retry<T: DeserializeOwned, B: Serialize>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&B>,
        retry: RetryPolicy,
    ) -> Result<T, HttpError> {
        let config = match &retry {
            RetryPolicy::None => {
                return self.do_request(&method, url, body).await;
            }
            RetryPolicy::Idempotent => RetryConfig::idempotent(),
            RetryPolicy::Custom(c) => c.clone(),
        };

        let mut last_error = None;

        for attempt in 0..=config.max_retries {
            match self.do_request::<T, B>(&method, url, body).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if should_retry(&e, &config).await && attempt < config.max_retries {
                        let delay = config.delay_for_attempt(attempt);
                        tracing::debug!(
                            attempt = attempt + 1,
                            max = config.max_retries,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying request to {}",
                            url
                        );
                        futures_timer::Delay::new(delay).await;
                        last_error = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }

        Err(HttpError::MaxRetriesExceeded {
            attempts: config.max_retries + 1,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    async fn do_request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: &reqwest::Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<T, HttpError> {
        let mut req = self
            .client
            .request(method.clone(), url)
            .header("Accept", "application/json");

        match self.credential.read().await.as_ref() {
            Some(Credential::Bearer(key)) => {
                req = req.header("Authorization", format!("Bearer {}", key));
            }
            Some(Credential::Cookie(cookie)) => {
                req = req.header("Cookie", cookie.as_str());
            }
            None => {}
        }

        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await?;
        let status = resp.status();

        if status.is_success() {
            let parsed = resp.json::<T>().await?;
            return Ok(parsed);
        }

        let status_code = status.as_u16();
        let retry_after_ms = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body_text = resp.text().await.unwrap_or_default();

        Err(classify_status(status_code, body_text, retry_after_ms))
    }
}

/// Whether a failed request is worth another attempt; sleeps out a
/// server-provided `Retry-After` first.
async fn should_retry(err: &HttpError, config: &RetryConfig) -> bool {
    match err {
        HttpError::ServerError { status, .. } => config.retryable_statuses.contains(status),
        HttpError::RateLimited { retry_after_ms } => {
            if let Some(ms) = retry_after_ms {
                futures_timer::Delay::new(Duration::from_millis(*ms)).await;
            }
            config.retryable_statuses.contains(&429)
        }
        HttpError::Timeout => true,
        HttpError::Reqwest(re) => re.is_connect() || re.is_timeout() || re.is_request(),
        _ => false,
    }
}

fn classify_status(status: u16, body: String, retry_after_ms: Option<u64>) -> HttpError {
    match status {
        401 | 403 => HttpError::Unauthorized,
        404 => HttpError::NotFound(body),
        429 => HttpError::RateLimited { retry_after_ms },
        400..=499 => HttpError::BadRequest(body),
        _ => HttpError::ServerError { status, body },
    }
}
