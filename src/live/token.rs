//! Channel token lifecycle: refresh shortly before expiry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::live::manager::Shared;
use crate::live::registry::lock;
use crate::live::state::{ConnectionState, ConnectionStatus};

/// How long to wait before refreshing a token expiring at `expires_at`
/// (unix seconds): `lead` ahead of expiry, never sooner than `floor`.
pub fn refresh_delay(expires_at: i64, now: i64, lead: Duration, floor: Duration) -> Duration {
    let lead = i64::try_from(lead.as_secs()).unwrap_or(i64::MAX);
    let remaining = expires_at.saturating_sub(now).saturating_sub(lead);
    let delay = u64::try_from(remaining).map_or(Duration::ZERO, Duration::from_secs);
    delay.max(floor)
}

impl Shared {
    /// Arm (or re-arm) the refresh timer for a token expiring at `expires_at`.
    pub(crate) fn arm_token_refresh(self: &Arc<Self>, state: &mut ConnectionState, expires_at: i64) {
        let delay = refresh_delay(
            expires_at,
            Utc::now().timestamp(),
            self.config.token_refresh_lead,
            self.config.token_refresh_floor,
        );
        state.token_refresh_at = Some(Instant::now() + delay);

        let shared = self.downgrade();
        let id = state.entity_id.clone();
        state.token_timer.arm(|slot| {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(shared) = shared.upgrade() {
                    shared.refresh_token(&id, Some(slot)).await;
                }
            })
        });
        tracing::debug!(
            server = %state.entity_id,
            delay_ms = delay.as_millis() as u64,
            "token refresh armed"
        );
    }

    /// Refresh triggered by the agent rather than the timer.
    pub(crate) fn spawn_token_refresh(self: &Arc<Self>, id: &str, attempt: u64) {
        let shared = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            let current = shared.registry.inspect(&id, |state| state.is_live(attempt));
            if current == Some(true) {
                shared.refresh_token(&id, None).await;
            }
        });
    }

    /// Swap the connection onto a fresh token.
    ///
    /// Only acts while connected. The old socket is closed with
    /// `refreshing_token` set, so its loss never schedules a reconnect; a
    /// failed refresh leaves the entity `Disconnected`/`Error` without one.
    pub(crate) async fn refresh_token(self: &Arc<Self>, id: &str, slot: Option<u64>) {
        let Some(entry) = self.registry.find(id) else {
            return;
        };
        let attempt = {
            let mut state = lock(&entry);
            if let Some(slot) = slot {
                if !state.token_timer.release(slot) {
                    return;
                }
                state.token_refresh_at = None;
            }
            if state.status != ConnectionStatus::Connected {
                tracing::debug!(server = %id, status = %state.status, "token refresh skipped");
                return;
            }
            tracing::info!(server = %id, "refreshing channel token");
            state.refreshing_token = true;
            state.mark_disconnected();
            match state.begin_attempt() {
                Some(attempt) => attempt,
                None => return,
            }
        };

        let result = self.establish(id, attempt).await;

        let mut state = lock(&entry);
        if state.attempt != attempt {
            return;
        }
        state.refreshing_token = false;
        match result {
            Ok(()) => tracing::info!(server = %id, "channel token refreshed"),
            Err(e) => {
                tracing::error!(server = %id, error = %e, "token refresh failed");
                state.mark_failed();
            }
        }
    }
}
