//! Wire-level payload shapes shared across components (spec §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ts, values}` — the one envelope shape every telemetry publish uses,
/// whether it originated from the controller, the log pipeline, or the
/// watchdog's auxiliary metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEnvelope {
    pub ts: i64,
    pub values: Value,
}

impl TelemetryEnvelope {
    pub fn new(ts: i64, values: Value) -> Self {
        Self { ts, values }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// OTA lifecycle states published as telemetry on every transition (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwState {
    Downloading,
    Downloaded,
    Updating,
    Updated,
    Failed,
}

impl SwState {
    pub fn as_str(self) -> &'static str {
        match self {
            SwState::Downloading => "DOWNLOADING",
            SwState::Downloaded => "DOWNLOADED",
            SwState::Updating => "UPDATING",
            SwState::Updated => "UPDATED",
            SwState::Failed => "FAILED",
        }
    }
}

/// Flat OTA state object published to `v1/devices/me/telemetry`.
#[derive(Debug, Clone, Serialize)]
pub struct SwStateReport<'a> {
    pub current_sw_title: &'a str,
    pub current_sw_version: &'a str,
    pub sw_state: &'static str,
    pub sw_error: &'a str,
}

/// An inbound MQTT message, parsed into JSON and queued FIFO for the main
/// loop (spec §3, "Inbound Message Envelope").
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub topic: String,
    pub payload: Value,
}
