//! Periodic `send stats` requests while the agent is active.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::error::WsError;
use crate::live::manager::Shared;
use crate::live::state::{ConnectionState, ConnectionStatus};
use crate::ws::MessageOut;

/// Agent states during which stats are polled.
pub const ACTIVE_AGENT_STATES: [&str; 2] = ["running", "starting"];

pub fn is_active_agent_state(state: Option<&str>) -> bool {
    state.is_some_and(|s| ACTIVE_AGENT_STATES.contains(&s))
}

/// Queue one `send stats` frame on the entity's socket.
pub(crate) fn request_stats(state: &ConnectionState) -> Result<(), WsError> {
    let socket = state.socket.as_ref().ok_or(WsError::NotConnected)?;
    socket.send(MessageOut::SendStats.to_frame()?)
}

/// Like [`request_stats`], but a socket that is going away is expected here.
pub(crate) fn send_stats_request(state: &ConnectionState) {
    if let Err(e) = request_stats(state) {
        tracing::debug!(server = %state.entity_id, error = %e, "stats request dropped");
    }
}

fn should_poll(state: &ConnectionState) -> bool {
    state.status == ConnectionStatus::Connected
        && is_active_agent_state(state.agent_status.as_deref())
}

impl Shared {
    /// Arm the poller iff connected with an active agent; disarm otherwise.
    pub(crate) fn sync_poller(self: &Arc<Self>, state: &mut ConnectionState) {
        if !should_poll(state) {
            if state.stats_timer.is_armed() {
                tracing::debug!(server = %state.entity_id, "stats polling stopped");
            }
            state.stats_timer.cancel();
            return;
        }
        if state.stats_timer.is_armed() {
            return;
        }

        let shared = self.downgrade();
        let id = state.entity_id.clone();
        let period = self.config.stats_interval;
        state.stats_timer.arm(|_| {
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.reset(); // first request one period from now

                loop {
                    ticker.tick().await;
                    let Some(shared) = shared.upgrade() else {
                        return;
                    };
                    if !shared.poll_stats(&id) {
                        return;
                    }
                }
            })
        });
        tracing::debug!(
            server = %state.entity_id,
            interval_ms = period.as_millis() as u64,
            "stats polling started"
        );
    }

    /// One poller tick. Returns false once polling should stop.
    fn poll_stats(&self, id: &str) -> bool {
        self.registry
            .inspect(id, |state| {
                let keep = should_poll(state);
                if keep {
                    send_stats_request(state);
                }
                keep
            })
            .unwrap_or(false)
    }
}
