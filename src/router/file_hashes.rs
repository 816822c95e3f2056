//! FILE_HASHES handler (spec §4.8.3): the core of the three-way
//! reconciliation between on-disk bytes, the local hash cache, and the
//! backend's hash mirror.

use crate::config::GatewayConfig;
use crate::files::{FileEngine, RemoteHashEntry, NO_FILE_SENTINEL};
use crate::mqtt::MqttTransport;
use serde_json::{json, Value};

pub async fn handle(
    payload: &Value,
    files: &FileEngine,
    mqtt: &MqttTransport,
    config: &GatewayConfig,
) -> bool {
    let raw = payload.get("client").and_then(|c| c.get("FILE_HASHES")).and_then(Value::as_object);
    let Some(raw) = raw else { return false };

    for (key, entry) in raw {
        let hash = entry.get("hash").and_then(Value::as_str).unwrap_or(NO_FILE_SENTINEL).to_string();
        let write_version = entry.get("write_version").and_then(Value::as_str).map(str::to_string);
        files.set_remote_hash(key, RemoteHashEntry { hash, write_version });
    }

    let definitions = files.definitions();

    // Tombstone keys the backend still has a hash for but that no longer
    // appear in the current definition set.
    for key in files.remote_hash_keys() {
        if !definitions.contains_key(&key) {
            mqtt.publish_attribute(json!({ format!("FILE_READ_{key}"): "" }).to_string()).await;
            files.forget_remote_hash(&key);
        }
    }

    for (key, def) in &definitions {
        let path = config.expand_data_path(&def.path);
        let local_hash = FileEngine::hash(&path);
        let missing = local_hash == NO_FILE_SENTINEL;
        let drifted = files.did_file_change(&path);
        let remote_write_version = files.remote_hash(key).and_then(|e| e.write_version);

        if missing && def.create_if_not_exist {
            mqtt.request_attributes(&format!("FILE_CONTENT_{key}")).await;
        } else if drifted {
            if let Some(content) = FileEngine::read(&path, def.encoding) {
                mqtt.publish_attribute(json!({ format!("FILE_READ_{key}"): content }).to_string()).await;
            }
            mqtt.request_attributes(&format!("FILE_CONTENT_{key}")).await;
        } else if def.write_version != remote_write_version {
            mqtt.request_attributes(&format!("FILE_CONTENT_{key}")).await;
        }

        files.set_remote_hash(
            key,
            RemoteHashEntry { hash: local_hash, write_version: def.write_version.clone() },
        );
    }

    republish_hash_table(files, mqtt).await;
    true
}

/// Publishes the freshly computed hash mirror as a client attribute (the
/// final step of spec §4.8.3, reused by the FILE_CONTENT handler in
/// spec §4.8.4 after a single key's hash changes).
pub(crate) async fn republish_hash_table(files: &FileEngine, mqtt: &MqttTransport) {
    let mut table = serde_json::Map::new();
    for key in files.remote_hash_keys() {
        if let Some(entry) = files.remote_hash(&key) {
            table.insert(
                key,
                json!({ "hash": entry.hash, "write_version": entry.write_version }),
            );
        }
    }
    mqtt.publish_attribute(json!({ "FILE_HASHES": table }).to_string()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::definition::{Encoding, FileDefinition};
    use std::collections::BTreeMap;

    #[test]
    fn tombstone_predicate_matches_keys_absent_from_definitions() {
        let files = FileEngine::new();
        files.set_remote_hash("stale", RemoteHashEntry { hash: "abc".into(), write_version: None });
        let mut defs = BTreeMap::new();
        defs.insert(
            "kept".to_string(),
            FileDefinition {
                path: "/tmp/kept".into(),
                encoding: Encoding::Text,
                create_if_not_exist: false,
                restart_controller_on_change: false,
                write_version: None,
            },
        );
        files.set_definitions(defs.clone());
        let stale_keys: Vec<_> =
            files.remote_hash_keys().into_iter().filter(|k| !defs.contains_key(k)).collect();
        assert_eq!(stale_keys, vec!["stale".to_string()]);
    }
}
