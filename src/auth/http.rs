//! Token provider backed by the panel REST API.

use async_trait::async_trait;

use crate::auth::{ChannelToken, TokenProvider};
use crate::error::{HttpError, TokenError};
use crate::http::{Credential, PanelHttp, RetryPolicy};

/// Fetches channel tokens from `POST /api/user/servers/{uuid}/jwt`.
#[derive(Clone)]
pub struct HttpTokenProvider {
    http: PanelHttp,
    retry: RetryPolicy,
}

impl HttpTokenProvider {
    pub fn new(base_url: &str) -> Result<Self, HttpError> {
        Ok(Self::from_http(PanelHttp::new(base_url)?))
    }

    pub fn from_http(http: PanelHttp) -> Self {
        Self {
            http,
            retry: RetryPolicy::None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Authenticate with an API key.
    pub async fn with_api_key(self, key: impl Into<String>) -> Self {
        self.http
            .set_credential(Some(Credential::Bearer(key.into())))
            .await;
        self
    }

    /// Authenticate with an existing session cookie header.
    pub async fn with_session_cookie(self, cookie: impl Into<String>) -> Self {
        self.http
            .set_credential(Some(Credential::Cookie(cookie.into())))
            .await;
        self
    }

    pub fn http(&self) -> &PanelHttp {
        &self.http
    }
}

#[async_trait]
impl TokenProvider for HttpTokenProvider {
    async fn fetch_token(&self, entity_id: &str) -> Result<ChannelToken, TokenError> {
        let envelope = self.http.server_jwt(entity_id, self.retry.clone()).await?;
        let token = ChannelToken::try_from(envelope)?;
        tracing::debug!(
            server = %entity_id,
            expires_at = token.expires_at,
            "channel token minted"
        );
        Ok(token)
    }
}
