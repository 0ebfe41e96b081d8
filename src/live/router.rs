//! Per-socket reader and inbound frame routing.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{LiveError, WsError};
use crate::live::manager::Shared;
use crate::live::poller::send_stats_request;
use crate::live::registry::lock;
use crate::live::state::{ConnectionState, ConnectionStatus, Health};
use crate::live::store::ServerStats;
use crate::ws::{AgentStats, ChannelEvent, Inbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Drain one socket's events in order. Exits on close, on error, when the
/// socket is superseded, or when the manager is gone.
pub(crate) async fn read_channel(
    shared: Weak<Shared>,
    id: String,
    attempt: u64,
    mut inbound: mpsc::Receiver<ChannelEvent>,
) {
    loop {
        let event = inbound.recv().await.unwrap_or_else(|| ChannelEvent::Closed {
            code: None,
            reason: "Channel ended".into(),
        });
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.on_channel_event(&id, attempt, event) == Flow::Stop {
            return;
        }
    }
}

impl Shared {
    pub(crate) fn on_channel_event(
        self: &Arc<Self>,
        id: &str,
        attempt: u64,
        event: ChannelEvent,
    ) -> Flow {
        let Some(entry) = self.registry.find(id) else {
            return Flow::Stop;
        };
        let mut state = lock(&entry);
        if !state.is_live(attempt) || state.socket.is_none() {
            tracing::trace!(server = %id, attempt, "event from stale socket dropped");
            return Flow::Stop;
        }

        match event {
            ChannelEvent::Frame(text) => {
                self.route_frame(&mut state, attempt, &text);
                if state.is_live(attempt) && state.socket.is_some() {
                    Flow::Continue
                } else {
                    Flow::Stop
                }
            }
            ChannelEvent::Closed { code, reason } => {
                self.on_socket_closed(&mut state, WsError::Closed { code, reason });
                Flow::Stop
            }
            ChannelEvent::Error(reason) => {
                self.on_socket_closed(&mut state, WsError::ConnectionFailed(reason));
                Flow::Stop
            }
        }
    }

    fn route_frame(self: &Arc<Self>, state: &mut ConnectionState, attempt: u64, text: &str) {
        let message = match Inbound::decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(server = %state.entity_id, error = %e, "undecodable frame ignored");
                return;
            }
        };

        match message {
            Inbound::AuthSuccess => self.on_auth_success(state),
            Inbound::AuthError => {
                tracing::warn!(server = %state.entity_id, "agent rejected channel token");
                self.fail_pending(state, LiveError::AuthRejected);
            }
            Inbound::Status(status) => self.on_status(state, status),
            Inbound::Stats(payload) => self.on_stats(state, payload.as_ref()),
            Inbound::TokenExpiring | Inbound::TokenExpired => {
                tracing::info!(server = %state.entity_id, "agent reports token expiry");
                self.spawn_token_refresh(&state.entity_id, attempt);
            }
            Inbound::DaemonError(message) => {
                tracing::warn!(
                    server = %state.entity_id,
                    message = message.as_deref().unwrap_or(""),
                    "daemon error"
                );
                state.health = Health::Error;
            }
            Inbound::Other(event) => {
                tracing::trace!(server = %state.entity_id, event = %event, "unhandled event");
            }
        }
    }

    fn on_auth_success(self: &Arc<Self>, state: &mut ConnectionState) {
        if state.status != ConnectionStatus::Connecting {
            tracing::debug!(server = %state.entity_id, "auth success while {} ignored", state.status);
            return;
        }
        state.mark_connected();
        tracing::debug!(server = %state.entity_id, "authenticated");
        send_stats_request(state);
        self.sync_poller(state);
    }

    fn on_status(self: &Arc<Self>, state: &mut ConnectionState, status: Option<String>) {
        let entering_running = status.as_deref() == Some("running")
            && state.agent_status.as_deref() != Some("running");
        tracing::debug!(
            server = %state.entity_id,
            status = status.as_deref().unwrap_or(""),
            "agent status"
        );
        state.agent_status = status.clone();
        self.store.update_status(&state.entity_id, status);
        state.health = Health::Healthy;
        self.sync_poller(state);
        if entering_running {
            send_stats_request(state);
        }
    }

    fn on_stats(self: &Arc<Self>, state: &mut ConnectionState, payload: Option<&Value>) {
        let stats = match AgentStats::parse(payload) {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(server = %state.entity_id, error = %e, "malformed stats frame ignored");
                return;
            }
        };
        let reported = stats.reported_state().map(str::to_string);
        if reported.is_some() {
            state.agent_status = reported.clone();
        }
        self.store
            .update_stats(&state.entity_id, ServerStats::from(&stats), reported);
        state.health = Health::Healthy;
        self.sync_poller(state);
    }

    fn on_socket_closed(self: &Arc<Self>, state: &mut ConnectionState, err: WsError) {
        match state.status {
            ConnectionStatus::Connecting => {
                tracing::warn!(server = %state.entity_id, error = %err, "socket lost before auth");
                self.fail_pending(state, LiveError::Ws(err));
            }
            ConnectionStatus::Connected => {
                tracing::warn!(server = %state.entity_id, error = %err, "socket lost");
                state.mark_disconnected();
                self.schedule_reconnect(state);
            }
            ConnectionStatus::Disconnected => {}
        }
    }

    /// Fail the current attempt or connection. A waiting `connect()` gets the
    /// error and schedules the reconnect itself; otherwise it happens here.
    pub(crate) fn fail_pending(self: &Arc<Self>, state: &mut ConnectionState, err: LiveError) {
        state.mark_failed();
        let unclaimed = match state.pending_auth.take() {
            Some(waiter) => waiter.send(Err(err)).is_err(),
            None => true,
        };
        if !unclaimed {
            return;
        }
        if state.refreshing_token {
            state.refreshing_token = false;
        } else {
            self.schedule_reconnect(state);
        }
    }

    /// Arm the auth-verdict deadline for `attempt`.
    pub(crate) fn arm_auth_timeout(self: &Arc<Self>, state: &mut ConnectionState, attempt: u64) {
        let shared = self.downgrade();
        let id = state.entity_id.clone();
        let timeout = self.config.auth_timeout;
        state.auth_timer.arm(|slot| {
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(shared) = shared.upgrade() {
                    shared.on_auth_timeout(&id, attempt, slot);
                }
            })
        });
    }

    fn on_auth_timeout(self: &Arc<Self>, id: &str, attempt: u64, slot: u64) {
        let Some(entry) = self.registry.find(id) else {
            return;
        };
        let mut state = lock(&entry);
        if !state.auth_timer.release(slot) || !state.is_attempt(attempt) {
            return;
        }
        tracing::warn!(
            server = %id,
            timeout_ms = self.config.auth_timeout.as_millis() as u64,
            "no auth verdict"
        );
        self.fail_pending(&mut state, LiveError::AuthTimeout(self.config.auth_timeout));
    }
}
