//! OTA handler (spec §4.8.1): recognizes a requested controller version in
//! an inbound attribute message and brings the running container in line
//! with it.

use crate::container::version;
use crate::container::ContainerManager;
use serde_json::Value;
use std::path::Path;

fn extract_str<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        if let Some(v) = payload.get(key).and_then(Value::as_str) {
            return Some(v);
        }
        if let Some(v) = payload.get("shared").and_then(|s| s.get(key)).and_then(Value::as_str) {
            return Some(v);
        }
    }
    None
}

/// Matches on `sw_version` (or the legacy `sf_sw_version`) under the top
/// level or `shared.*`. Returns whether the message was recognized as an
/// OTA directive at all, regardless of whether a restart was triggered.
pub async fn handle(payload: &Value, container: &ContainerManager, last_launched_path: &Path) -> bool {
    let Some(version) = extract_str(payload, &["sw_version", "sf_sw_version"]) else {
        return false;
    };

    let running = container.running_version().await.ok().flatten();
    if running.as_deref() == Some(version) {
        let _ = version::write_last_launched(last_launched_path, version);
    } else {
        container.start_safely(version, last_launched_path).await;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_version_from_shared_and_legacy_keys() {
        let payload = json!({"shared": {"sw_version": "v1.2.3"}});
        assert_eq!(extract_str(&payload, &["sw_version", "sf_sw_version"]), Some("v1.2.3"));

        let legacy = json!({"sf_sw_version": "v9.9.9"});
        assert_eq!(extract_str(&legacy, &["sw_version", "sf_sw_version"]), Some("v9.9.9"));

        let none = json!({"unrelated": true});
        assert_eq!(extract_str(&none, &["sw_version", "sf_sw_version"]), None);
    }
}
