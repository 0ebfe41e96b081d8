//! Externally visible projection of agent telemetry.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ws::AgentStats;

/// Latest metrics for one server, normalized for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Percent of one core, rounded to the nearest integer.
    pub cpu_usage: u64,
    pub memory_bytes: u64,
    pub memory_limit_bytes: u64,
    pub disk_bytes: u64,
    pub disk_limit_bytes: u64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub state: String,
    /// Milliseconds, as reported.
    pub uptime: u64,
}

impl From<&AgentStats> for ServerStats {
    fn from(stats: &AgentStats) -> Self {
        Self {
            cpu_usage: round_cpu(stats.cpu_absolute.unwrap_or(0.0)),
            memory_bytes: stats.memory_bytes.unwrap_or(0),
            memory_limit_bytes: stats.memory_limit_bytes.unwrap_or(0),
            disk_bytes: stats.disk_bytes.unwrap_or(0),
            disk_limit_bytes: stats.disk_limit_bytes.unwrap_or(0),
            network_rx: stats.rx_bytes(),
            network_tx: stats.tx_bytes(),
            state: stats.state.clone().unwrap_or_default(),
            uptime: stats.uptime.unwrap_or(0),
        }
    }
}

fn round_cpu(cpu: f64) -> u64 {
    if cpu.is_finite() && cpu > 0.0 {
        cpu.round() as u64
    } else {
        0
    }
}

/// One server's live entry, as returned by
/// [`LiveManager::live_data`](crate::live::LiveManager::live_data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerLiveData {
    /// Agent-reported runtime state (`running`, `offline`, ...).
    pub status: Option<String>,
    pub stats: Option<ServerStats>,
    pub last_update: DateTime<Utc>,
}

/// Entries appear on the first status or stats frame and are never removed.
/// Read through [`LiveManager::live_data`](crate::live::LiveManager::live_data);
/// only the router writes to it.
#[derive(Debug, Default)]
pub(crate) struct LiveDataStore {
    entries: RwLock<HashMap<String, ServerLiveData>>,
}

impl LiveDataStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: &str) -> Option<ServerLiveData> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Record a `status` frame.
    pub(crate) fn update_status(&self, id: &str, status: Option<String>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        entries
            .entry(id.to_string())
            .and_modify(|entry| {
                entry.status = status.clone();
                entry.last_update = now;
            })
            .or_insert_with(|| ServerLiveData {
                status,
                stats: None,
                last_update: now,
            });
    }

    /// Record a `stats` frame. `status` replaces the stored runtime state
    /// when present.
    pub(crate) fn update_stats(&self, id: &str, stats: ServerStats, status: Option<String>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        match entries.get_mut(id) {
            Some(entry) => {
                if status.is_some() {
                    entry.status = status;
                }
                entry.stats = Some(stats);
                entry.last_update = now;
            }
            None => {
                entries.insert(
                    id.to_string(),
                    ServerLiveData {
                        status,
                        stats: Some(stats),
                        last_update: now,
                    },
                );
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
