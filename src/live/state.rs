//! Per-entity connection record.

use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::ChannelToken;
use crate::error::{LiveResult, WsError};

// ─── Status / health ─────────────────────────────────────────────────────────

/// Connection lifecycle of one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    /// Legal moves: `Disconnected → Connecting → Connected → Disconnected`,
    /// plus `Connecting → Disconnected` for a failed attempt.
    pub fn can_transition_to(self, next: ConnectionStatus) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }

    /// Connecting or connected.
    pub fn is_active(self) -> bool {
        self != ConnectionStatus::Disconnected
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse liveness signal, independent of [`ConnectionStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Health {
    #[default]
    Unknown,
    Healthy,
    Error,
}

// ─── Socket ownership ────────────────────────────────────────────────────────

/// The one open socket of an entity. Dropping it closes the socket and stops
/// its reader.
pub(crate) struct Socket {
    outbound: mpsc::Sender<String>,
    reader: JoinHandle<()>,
}

impl Socket {
    pub(crate) fn new(outbound: mpsc::Sender<String>, reader: JoinHandle<()>) -> Self {
        Self { outbound, reader }
    }

    /// Queue a frame without waiting.
    pub(crate) fn send(&self, text: String) -> Result<(), WsError> {
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WsError::SendFailed("Outbound queue full".into()),
            mpsc::error::TrySendError::Closed(_) => WsError::NotConnected,
        })
    }

    pub(crate) fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// ─── Timer slots ─────────────────────────────────────────────────────────────

/// Holds at most one pending timer task. Arming replaces (and aborts) the
/// previous one; dropping the slot aborts whatever is pending.
#[derive(Default)]
pub(crate) struct TimerSlot {
    pending: Option<(u64, JoinHandle<()>)>,
    next_id: u64,
}

impl TimerSlot {
    /// Cancel the current timer and install the one built by `spawn`, which
    /// receives the id it must later pass to [`TimerSlot::release`].
    pub(crate) fn arm(&mut self, spawn: impl FnOnce(u64) -> JoinHandle<()>) {
        self.cancel();
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        self.pending = Some((id, spawn(id)));
    }

    pub(crate) fn cancel(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }

    /// Called by a firing timer before it acts, so that re-arming from inside
    /// the action cannot abort it. Returns false if the timer was superseded.
    pub(crate) fn release(&mut self, id: u64) -> bool {
        match &self.pending {
            Some((current, _)) if *current == id => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ─── Connection state ────────────────────────────────────────────────────────

/// Mutable record behind each registry entry.
#[derive(Default)]
pub(crate) struct ConnectionState {
    pub entity_id: String,
    pub status: ConnectionStatus,
    pub health: Health,
    pub socket: Option<Socket>,
    pub token: Option<ChannelToken>,
    pub reconnect_attempts: u32,
    pub refreshing_token: bool,
    /// Last runtime state reported by the agent.
    pub agent_status: Option<String>,
    /// Bumped on every attempt and on reset; continuations carrying an older
    /// value are stale.
    pub attempt: u64,
    /// Resolves the `connect()` call awaiting the auth verdict.
    pub pending_auth: Option<oneshot::Sender<LiveResult<()>>>,
    pub token_refresh_at: Option<Instant>,
    pub reconnect_timer: TimerSlot,
    pub token_timer: TimerSlot,
    pub stats_timer: TimerSlot,
    pub auth_timer: TimerSlot,
}

impl ConnectionState {
    pub(crate) fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            ..Default::default()
        }
    }

    /// Apply a status change if legal. Same-state moves are accepted no-ops.
    pub(crate) fn transition(&mut self, next: ConnectionStatus) -> bool {
        if self.status == next {
            return true;
        }
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                server = %self.entity_id,
                from = %self.status,
                to = %next,
                "illegal status transition rejected"
            );
            return false;
        }
        tracing::debug!(server = %self.entity_id, from = %self.status, to = %next, "status");
        self.status = next;
        true
    }

    /// Start a new attempt unless one is already active.
    pub(crate) fn begin_attempt(&mut self) -> Option<u64> {
        if self.status.is_active() {
            return None;
        }
        self.reconnect_timer.cancel();
        self.transition(ConnectionStatus::Connecting);
        self.attempt += 1;
        Some(self.attempt)
    }

    /// `attempt` is still the current attempt and has not resolved yet.
    pub(crate) fn is_attempt(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.status == ConnectionStatus::Connecting
    }

    /// `attempt` is still the current attempt and its socket may be live.
    pub(crate) fn is_live(&self, attempt: u64) -> bool {
        self.attempt == attempt && self.status.is_active()
    }

    pub(crate) fn mark_connected(&mut self) {
        self.transition(ConnectionStatus::Connected);
        self.reconnect_attempts = 0;
        self.refreshing_token = false;
        self.health = Health::Healthy;
        self.auth_timer.cancel();
        if let Some(waiter) = self.pending_auth.take() {
            let _ = waiter.send(Ok(()));
        }
    }

    /// Drop the socket and every timer bound to it.
    pub(crate) fn close_socket(&mut self) {
        self.socket = None;
        self.stats_timer.cancel();
        self.auth_timer.cancel();
    }

    /// Socket went away while connected.
    pub(crate) fn mark_disconnected(&mut self) {
        self.close_socket();
        self.token_timer.cancel();
        self.token_refresh_at = None;
        self.transition(ConnectionStatus::Disconnected);
    }

    /// Attempt or connection failed.
    pub(crate) fn mark_failed(&mut self) {
        self.mark_disconnected();
        self.health = Health::Error;
    }

    /// Back to the clean baseline; pending continuations become stale.
    pub(crate) fn reset(&mut self) {
        self.reconnect_timer.cancel();
        self.token_timer.cancel();
        self.stats_timer.cancel();
        self.auth_timer.cancel();
        self.socket = None;
        self.pending_auth = None;
        self.token_refresh_at = None;
        self.status = ConnectionStatus::Disconnected;
        self.health = Health::Unknown;
        self.reconnect_attempts = 0;
        self.refreshing_token = false;
        self.attempt += 1;
    }

    pub(crate) fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            entity_id: self.entity_id.clone(),
            status: self.status,
            health: self.health,
            reconnect_attempts: self.reconnect_attempts,
            refreshing_token: self.refreshing_token,
            socket_open: self.socket.as_ref().is_some_and(Socket::is_open),
            token_expires_at: self.token.as_ref().map(|t| t.expires_at),
            endpoint: self.token.as_ref().map(|t| t.endpoint.clone()),
            agent_status: self.agent_status.clone(),
            reconnect_pending: self.reconnect_timer.is_armed(),
            token_refresh_pending: self.token_timer.is_armed(),
            token_refresh_at: self.token_refresh_at,
            stats_polling: self.stats_timer.is_armed(),
            awaiting_auth: self.auth_timer.is_armed(),
        }
    }
}

/// Read-only copy of one entity's connection record. Never carries the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub entity_id: String,
    pub status: ConnectionStatus,
    pub health: Health,
    pub reconnect_attempts: u32,
    pub refreshing_token: bool,
    pub socket_open: bool,
    pub token_expires_at: Option<i64>,
    pub endpoint: Option<String>,
    pub agent_status: Option<String>,
    pub reconnect_pending: bool,
    pub token_refresh_pending: bool,
    /// When the armed token refresh fires.
    pub token_refresh_at: Option<Instant>,
    pub stats_polling: bool,
    pub awaiting_auth: bool,
}
