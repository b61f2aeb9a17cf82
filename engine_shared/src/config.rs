//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Maximum simultaneous connection slots the server allocates.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Ticks of inactivity before a connected client is dropped.
    #[serde(default = "default_client_timeout_ticks")]
    pub client_timeout_ticks: u64,
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_max_clients() -> usize {
    4
}

fn default_client_timeout_ticks() -> u64 {
    crate::net::TICK_RATE * 30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 64,
            player_name: default_player_name(),
            max_clients: default_max_clients(),
            client_timeout_ticks: default_client_timeout_ticks(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
