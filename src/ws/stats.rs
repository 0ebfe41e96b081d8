//! Stats payload reported by the agent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WsError;

/// Resource usage snapshot as sent in a `stats` frame.
///
/// The agent omits fields freely, so every counter is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    #[serde(default)]
    pub memory_bytes: Option<u64>,
    #[serde(default)]
    pub memory_limit_bytes: Option<u64>,
    #[serde(default)]
    pub cpu_absolute: Option<f64>,
    #[serde(default)]
    pub disk_bytes: Option<u64>,
    #[serde(default)]
    pub disk_limit_bytes: Option<u64>,
    #[serde(default)]
    pub network: Option<NetworkStats>,
    #[serde(default)]
    pub network_rx_bytes: Option<u64>,
    #[serde(default)]
    pub network_tx_bytes: Option<u64>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub rx_bytes: Option<u64>,
    #[serde(default)]
    pub tx_bytes: Option<u64>,
}

impl AgentStats {
    /// Parse the first argument of a `stats` frame.
    ///
    /// The agent sends the payload as a JSON-encoded string; an inline object
    /// is accepted too. A missing argument yields an empty snapshot.
    pub fn parse(arg: Option<&Value>) -> Result<Self, WsError> {
        let parsed = match arg {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::String(raw)) => serde_json::from_str(raw),
            Some(obj @ Value::Object(_)) => serde_json::from_value(obj.clone()),
            Some(other) => {
                return Err(WsError::DeserializationError(format!(
                    "unexpected stats payload: {}",
                    other
                )))
            }
        };
        parsed.map_err(|e| WsError::DeserializationError(e.to_string()))
    }

    /// Received bytes, preferring the nested `network` object.
    pub fn rx_bytes(&self) -> u64 {
        self.network
            .as_ref()
            .and_then(|n| n.rx_bytes)
            .or(self.network_rx_bytes)
            .unwrap_or(0)
    }

    /// Transmitted bytes, preferring the nested `network` object.
    pub fn tx_bytes(&self) -> u64 {
        self.network
            .as_ref()
            .and_then(|n| n.tx_bytes)
            .or(self.network_tx_bytes)
            .unwrap_or(0)
    }

    /// Runtime state carried in the snapshot, if non-empty.
    pub fn reported_state(&self) -> Option<&str> {
        self.state.as_deref().filter(|s| !s.is_empty())
    }
}
