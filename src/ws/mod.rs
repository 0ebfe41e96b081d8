//! Agent channel layer: wire frames and the transport seam.
//!
//! Every frame on the wire is a JSON object `{ "event": ..., "args": [...] }`.
//! The transport itself is pluggable through [`Connector`]:
//! - `ws-native` feature → `tokio-tungstenite` ([`native::NativeConnector`])
//! - anything else implementing [`Connector`] (in-memory channels in tests)

pub mod stats;

#[cfg(feature = "ws-native")]
pub mod native;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::WsError;

pub use stats::{AgentStats, NetworkStats};

// ─── Frames ──────────────────────────────────────────────────────────────────

/// Raw frame exchanged with the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    /// Agents send `args: null` as readily as omitting the field.
    #[serde(default)]
    pub args: Option<Vec<Value>>,
}

// ─── Outbound messages ───────────────────────────────────────────────────────

/// Messages sent from the panel to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOut {
    /// First frame after the socket opens.
    Auth { token: String },
    /// Ask for one stats snapshot.
    SendStats,
}

impl MessageOut {
    pub fn auth(token: impl Into<String>) -> Self {
        Self::Auth {
            token: token.into(),
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::SendStats => "send stats",
        }
    }

    /// Serialize into the JSON text sent over the socket.
    pub fn to_frame(&self) -> Result<String, WsError> {
        let args = match self {
            Self::Auth { token } => vec![Value::String(token.clone())],
            Self::SendStats => Vec::new(),
        };
        let frame = Frame {
            event: self.event().to_string(),
            args: Some(args),
        };
        serde_json::to_string(&frame).map_err(|e| WsError::SendFailed(e.to_string()))
    }
}

// ─── Inbound messages ────────────────────────────────────────────────────────

/// Inbound agent events the live manager understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    AuthSuccess,
    AuthError,
    /// Runtime state changed (`running`, `starting`, `stopping`, `offline`, ...).
    Status(Option<String>),
    /// Stats snapshot; the argument is usually a JSON-encoded string.
    Stats(Option<Value>),
    TokenExpiring,
    TokenExpired,
    DaemonError(Option<String>),
    /// Anything else (console output, install progress, ...).
    Other(String),
}

impl Inbound {
    /// Decode a text frame. Fails only when the text is not a frame at all.
    pub fn decode(text: &str) -> Result<Self, WsError> {
        let frame: Frame = serde_json::from_str(text)
            .map_err(|e| WsError::DeserializationError(e.to_string()))?;
        Ok(Self::from(frame))
    }
}

impl From<Frame> for Inbound {
    fn from(frame: Frame) -> Self {
        let mut args = frame.args.unwrap_or_default().into_iter();
        match frame.event.as_str() {
            "auth success" => Self::AuthSuccess,
            "auth_error" | "auth error" => Self::AuthError,
            "status" => Self::Status(first_string(args.next())),
            "stats" => Self::Stats(args.next()),
            "token expiring" => Self::TokenExpiring,
            "token expired" | "jwt error" => Self::TokenExpired,
            "daemon error" => Self::DaemonError(first_string(args.next())),
            _ => Self::Other(frame.event),
        }
    }
}

fn first_string(arg: Option<Value>) -> Option<String> {
    match arg {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

// ─── Transport seam ──────────────────────────────────────────────────────────

/// Events surfaced by a transport for one open socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame.
    Frame(String),
    /// The peer closed the socket.
    Closed { code: Option<u16>, reason: String },
    /// Transport-level failure; the socket is gone.
    Error(String),
}

/// An open socket to one agent.
///
/// Dropping `outbound` closes the socket. `inbound` ending is equivalent to
/// a close without a frame.
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

/// Opens sockets to agent endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Channel, WsError>;
}
