//! FILES-definition handler (spec §4.8.2): installs a new file definition
//! set published by the backend and kicks off reconciliation.

use crate::files::{definition, FileEngine};
use crate::mqtt::MqttTransport;
use serde_json::Value;
use tracing::warn;

pub async fn handle(payload: &Value, files: &FileEngine, mqtt: &MqttTransport) -> bool {
    let raw = payload
        .get("FILES")
        .or_else(|| payload.get("shared").and_then(|s| s.get("FILES")))
        .and_then(Value::as_object);
    let Some(raw) = raw else { return false };

    let (parsed, errors) = definition::parse_definitions(raw);
    for err in errors {
        warn!(error = %err, "rejected malformed file definition entry");
    }
    files.set_definitions(parsed);
    mqtt.request_attributes("FILE_HASHES").await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recognizes_files_under_shared() {
        let payload = json!({"shared": {"FILES": {"cfg": {"path": "/tmp/cfg"}}}});
        let raw = payload.get("FILES").or_else(|| payload.get("shared").and_then(|s| s.get("FILES")));
        assert!(raw.is_some());
    }
}
