//! FILE_CONTENT_`<key>` handler (spec §4.8.4): applies an incoming write
//! to the matching managed file and mirrors the result back to the
//! backend.

use super::file_hashes::republish_hash_table;
use crate::config::GatewayConfig;
use crate::container::ContainerManager;
use crate::files::{encoding, FileEngine, RemoteHashEntry};
use crate::mqtt::MqttTransport;
use serde_json::{json, Value};
use std::path::Path;
use tracing::error;

const PREFIX: &str = "FILE_CONTENT_";

/// Finds the first `FILE_CONTENT_`-prefixed key under the top level or
/// `payload["shared"]`, mirroring `ota::extract_str` and
/// `files_handler::handle`'s search order.
fn find_entry(payload: &Value) -> Option<(&str, &Value)> {
    let top = payload.as_object().into_iter().flatten();
    let shared = payload.get("shared").and_then(Value::as_object).into_iter().flatten();
    top.chain(shared)
        .find(|(k, _)| k.starts_with(PREFIX))
        .map(|(k, v)| (k.as_str(), v))
}

pub async fn handle(
    payload: &Value,
    files: &FileEngine,
    mqtt: &MqttTransport,
    container: &ContainerManager,
    last_launched_path: &Path,
    config: &GatewayConfig,
) -> bool {
    let Some((full_key, value)) = find_entry(payload) else {
        return false;
    };
    let key = &full_key[PREFIX.len()..];

    let Some(def) = files.definition(key) else {
        error!(key, "FILE_CONTENT update for a key with no known definition");
        return true;
    };
    let path = config.expand_data_path(&def.path);

    if !Path::new(&path).exists() && !def.create_if_not_exist {
        error!(key, path, "refusing to create file: create_if_not_exist is false");
        return true;
    }

    let bytes = match encoding::decode_content(value, def.encoding) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(key, error = %e, "failed to decode FILE_CONTENT payload");
            return true;
        }
    };
    if let Some(parent) = Path::new(&path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(&path, &bytes) {
        error!(key, error = %e, "failed to write file content to disk");
        return true;
    }

    let new_hash = FileEngine::hash(&path);
    let previous_hash = files.remote_hash(key).map(|e| e.hash);
    files.set_remote_hash(
        key,
        RemoteHashEntry { hash: new_hash.clone(), write_version: def.write_version.clone() },
    );
    republish_hash_table(files, mqtt).await;

    if previous_hash.as_deref() != Some(new_hash.as_str()) {
        if let Some(content) = FileEngine::read(&path, def.encoding) {
            mqtt.publish_attribute(json!({ format!("FILE_READ_{key}"): content }).to_string()).await;
        }
        if def.restart_controller_on_change {
            let _ = container.stop(last_launched_path).await;
        }
    }

    mqtt.request_attributes("FILES").await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_prefix_to_recover_the_file_key() {
        let full_key = format!("{PREFIX}cfg");
        assert_eq!(&full_key[PREFIX.len()..], "cfg");
    }

    #[test]
    fn finds_entry_nested_under_shared() {
        let payload = json!({"shared": {"FILE_CONTENT_cfg": "aGVsbG8="}});
        let (key, value) = find_entry(&payload).expect("entry should be found under shared");
        assert_eq!(key, "FILE_CONTENT_cfg");
        assert_eq!(value, "aGVsbG8=");
    }

    #[test]
    fn finds_entry_at_top_level() {
        let payload = json!({"FILE_CONTENT_cfg": "aGVsbG8="});
        let (key, _) = find_entry(&payload).expect("entry should be found at top level");
        assert_eq!(key, "FILE_CONTENT_cfg");
    }
}
