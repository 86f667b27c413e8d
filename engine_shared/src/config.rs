//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

use crate::net::NetworkMode;

/// Root configuration for a host process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Role of this process.
    #[serde(default)]
    pub network_mode: NetworkMode,
    /// Event system settings.
    #[serde(default)]
    pub events: EventSystemConfig,
}

/// What to do when an event id or type is registered twice with a different
/// counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateEventPolicy {
    /// Keep the first mapping and report an error.
    #[default]
    Reject,
    /// Overwrite the previous mapping with a warning.
    Replace,
}

/// Event system settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSystemConfig {
    /// No local player or display. Handlers filtered to `Client` are skipped.
    #[serde(default)]
    pub headless: bool,
    #[serde(default)]
    pub duplicate_events: DuplicateEventPolicy,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            network_mode: NetworkMode::default(),
            events: EventSystemConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
