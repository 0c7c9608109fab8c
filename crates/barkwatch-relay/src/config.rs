use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shared configuration for both relay roles. The server reads the bind
/// fields and timeout; clients read the heartbeat interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub port: u16,
    /// Silence after which the server evicts a client.
    pub client_timeout_s: f64,
    /// Idle time after which a client sends a heartbeat.
    pub heartbeat_interval_s: f64,
    /// Socket poll cadence of the relay threads.
    pub poll_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 19912,
            client_timeout_s: 10.0,
            heartbeat_interval_s: 1.0,
            poll_interval_ms: 5,
        }
    }
}

impl RelayConfig {
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.client_timeout_s)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval_s)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
