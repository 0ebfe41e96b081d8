//! Channel tokens: short-lived JWTs that authorize one agent socket.
//!
//! ## Model
//!
//! - The panel mints a token per server via `POST /api/user/servers/{uuid}/jwt`.
//!   The response carries the token, its absolute expiry (unix seconds) and the
//!   agent endpoint (`connection_string`) the socket must be opened against.
//! - Tokens are held inside the live manager only. Snapshots expose the expiry,
//!   never the token itself.
//! - Anything that can mint a token implements [`TokenProvider`]; the
//!   reqwest-backed [`http::HttpTokenProvider`] talks to a real panel.

#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Credential authorizing one channel to one agent.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelToken {
    pub token: String,
    /// Absolute expiry, unix seconds.
    pub expires_at: i64,
    /// Agent WebSocket URL.
    pub endpoint: String,
}

impl ChannelToken {
    pub fn new(token: impl Into<String>, expires_at: i64, endpoint: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at,
            endpoint: endpoint.into(),
        }
    }

    /// Expiry as a UTC timestamp; `None` if out of chrono's range.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }
}

impl std::fmt::Debug for ChannelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Mints channel tokens for entities.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self, entity_id: &str) -> Result<ChannelToken, TokenError>;
}

// ============================================================================
// Wire types
// ============================================================================

/// Response envelope of the JWT endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<JwtData>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtData {
    pub token: String,
    pub expires_at: i64,
    #[serde(default)]
    pub server_uuid: Option<String>,
    #[serde(default)]
    pub user_uuid: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub connection_string: String,
}

impl TryFrom<JwtEnvelope> for ChannelToken {
    type Error = TokenError;

    fn try_from(envelope: JwtEnvelope) -> Result<Self, Self::Error> {
        if !envelope.success {
            return Err(TokenError::Rejected {
                code: envelope.error_code,
                message: envelope
                    .error_message
                    .or(envelope.message)
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        let data = envelope
            .data
            .ok_or_else(|| TokenError::Invalid("missing data".into()))?;
        if data.token.is_empty() {
            return Err(TokenError::Invalid("empty token".into()));
        }
        if data.connection_string.is_empty() {
            return Err(TokenError::Invalid("empty connection_string".into()));
        }
        Ok(ChannelToken {
            token: data.token,
            expires_at: data.expires_at,
            endpoint: data.connection_string,
        })
    }
}
