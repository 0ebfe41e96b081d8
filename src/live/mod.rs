//! Live telemetry core — one authenticated agent channel per server.
//!
//! ## Flow
//!
//! 1. [`LiveManager::connect`] fetches a channel token from the
//!    [`TokenProvider`](crate::auth::TokenProvider) and opens a socket through
//!    the [`Connector`](crate::ws::Connector).
//! 2. The first frame is `auth`; the attempt resolves on `auth success`,
//!    `auth_error`, socket loss, or the auth timeout.
//! 3. While connected, inbound frames feed the live data store, the stats
//!    poller runs while the agent is `running`/`starting`, and the token is
//!    refreshed shortly before it expires.
//! 4. Unexpected socket loss triggers a bounded, linearly backed-off
//!    reconnect. A planned token refresh never does.
//!
//! Every entity has its own record and lock; nothing one entity does can
//! block or fail another.

mod config;
mod manager;
mod poller;
mod reconnect;
mod registry;
mod router;
mod state;
mod store;
mod token;

pub use config::LiveConfig;
pub use manager::LiveManager;
pub use poller::{is_active_agent_state, ACTIVE_AGENT_STATES};
pub use reconnect::backoff_delay;
pub use state::{ConnectionSnapshot, ConnectionStatus, Health};
pub use store::{ServerLiveData, ServerStats};
pub use token::refresh_delay;
