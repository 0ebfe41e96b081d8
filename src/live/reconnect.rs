//! Bounded reconnect with linear backoff.

use std::sync::Arc;
use std::time::Duration;

use crate::live::config::LiveConfig;
use crate::live::manager::Shared;
use crate::live::registry::lock;
use crate::live::state::ConnectionState;

/// Delay before reconnect number `attempt` (1-based): `base × attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

/// Count the next reconnect and return its delay, or `None` when a token
/// refresh owns the socket or the attempt budget is spent.
pub(crate) fn plan_reconnect(state: &mut ConnectionState, config: &LiveConfig) -> Option<Duration> {
    if state.refreshing_token || state.reconnect_attempts >= config.max_reconnect_attempts {
        return None;
    }
    state.reconnect_attempts += 1;
    Some(backoff_delay(
        config.reconnect_base_delay,
        state.reconnect_attempts,
    ))
}

impl Shared {
    pub(crate) fn schedule_reconnect(self: &Arc<Self>, state: &mut ConnectionState) {
        let Some(delay) = plan_reconnect(state, &self.config) else {
            if state.refreshing_token {
                tracing::debug!(server = %state.entity_id, "reconnect suppressed during token refresh");
            } else {
                tracing::warn!(
                    server = %state.entity_id,
                    attempts = state.reconnect_attempts,
                    "giving up; call connect() to retry"
                );
            }
            return;
        };

        tracing::info!(
            server = %state.entity_id,
            attempt = state.reconnect_attempts,
            max = self.config.max_reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );

        let shared = self.downgrade();
        let id = state.entity_id.clone();
        state.reconnect_timer.arm(|slot| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let released = shared
                    .registry
                    .find(&id)
                    .is_some_and(|entry| {
                        let mut state = lock(&entry);
                        state.reconnect_timer.release(slot)
                    });
                if !released {
                    return;
                }
                if let Err(e) = shared.connect(&id).await {
                    tracing::debug!(server = %id, error = %e, "reconnect attempt failed");
                }
            })
        });
    }
}
