//! # FeatherPanel live telemetry
//!
//! Keeps one authenticated agent channel open per managed server and turns
//! its traffic into a queryable live view (runtime state + resource stats).
//!
//! ## Architecture
//!
//! The crate is organized in layers:
//!
//! 1. **Core** — error types (always available)
//! 2. **Auth** — channel tokens and the `TokenProvider` seam
//! 3. **HTTP API** — `PanelHttp` with retry policies, `HttpTokenProvider`
//! 4. **Channel** — agent frame protocol and the `Connector` seam
//!    (`tokio-tungstenite` behind `ws-native`)
//! 5. **Live** — `LiveManager`: connection lifecycle, token refresh,
//!    reconnects, stats polling, live data store
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use featherpanel_live::prelude::*;
//!
//! let provider = HttpTokenProvider::new("https://panel.example.com")?
//!     .with_api_key(std::env::var("PANEL_API_KEY")?)
//!     .await;
//! let live = LiveManager::new(Arc::new(provider), Arc::new(NativeConnector::new()));
//!
//! for (server, result) in live.connect_many(["uuid-a", "uuid-b"]).await {
//!     println!("{server}: {result:?}");
//! }
//! ```

// ── Layer 1: Core ────────────────────────────────────────────────────────────

/// Unified error types.
pub mod error;

// ── Layer 2: Auth ────────────────────────────────────────────────────────────

/// Channel tokens and token providers.
pub mod auth;

// ── Layer 3: HTTP API ────────────────────────────────────────────────────────

/// HTTP client with retry policies.
#[cfg(feature = "http")]
pub mod http;

// ── Layer 4: Channel ─────────────────────────────────────────────────────────

/// Agent channel: frames, stats payload, connectors.
pub mod ws;

// ── Layer 5: Live manager ────────────────────────────────────────────────────

/// `LiveManager`, the primary entry point.
pub mod live;

// ── Prelude ──────────────────────────────────────────────────────────────────

pub mod prelude {
    // Errors
    pub use crate::error::{HttpError, LiveError, LiveResult, TokenError, WsError};

    // Auth
    pub use crate::auth::{ChannelToken, TokenProvider};
    #[cfg(feature = "http")]
    pub use crate::auth::http::HttpTokenProvider;

    // HTTP client
    #[cfg(feature = "http")]
    pub use crate::http::{Credential, PanelHttp, RetryConfig, RetryPolicy};

    // Channel
    pub use crate::ws::{AgentStats, Channel, ChannelEvent, Connector, Inbound, MessageOut};
    #[cfg(feature = "ws-native")]
    pub use crate::ws::native::NativeConnector;

    // Live manager
    pub use crate::live::{
        ConnectionSnapshot, ConnectionStatus, Health, LiveConfig, LiveManager, ServerLiveData,
        ServerStats,
    };
}
