//! The file definition set — the backend's authoritative list of which
//! files the gateway should manage (spec §4.7 / §4.8.2).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Text,
    Json,
    Base64,
}

impl Encoding {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw {
            None => Some(Encoding::Text),
            Some("text") => Some(Encoding::Text),
            Some("json") => Some(Encoding::Json),
            Some("base64") => Some(Encoding::Base64),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileDefinition {
    pub path: String,
    pub encoding: Encoding,
    pub create_if_not_exist: bool,
    pub restart_controller_on_change: bool,
    pub write_version: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("file definition {0:?} is missing a string \"path\"")]
    MissingPath(String),
    #[error("file definition {0:?} has an unknown encoding {1:?}")]
    UnknownEncoding(String, String),
}

/// Parses the raw `FILES` JSON object into a validated definition set
/// (spec §4.8.2). A malformed individual entry is rejected without
/// aborting the rest of the set — the caller logs it and moves on.
pub fn parse_definitions(
    raw: &serde_json::Map<String, serde_json::Value>,
) -> (BTreeMap<String, FileDefinition>, Vec<DefinitionError>) {
    let mut parsed = BTreeMap::new();
    let mut errors = Vec::new();

    for (key, value) in raw {
        let obj = value.as_object();
        let path = obj.and_then(|o| o.get("path")).and_then(|v| v.as_str());
        let Some(path) = path else {
            errors.push(DefinitionError::MissingPath(key.clone()));
            continue;
        };

        let encoding_raw = obj.and_then(|o| o.get("encoding")).and_then(|v| v.as_str());
        let Some(encoding) = Encoding::parse(encoding_raw) else {
            errors.push(DefinitionError::UnknownEncoding(
                key.clone(),
                encoding_raw.unwrap_or("").to_string(),
            ));
            continue;
        };

        let create_if_not_exist =
            obj.and_then(|o| o.get("create_if_not_exist")).and_then(|v| v.as_bool()).unwrap_or(false);
        let restart_controller_on_change = obj
            .and_then(|o| o.get("restart_controller_on_change"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let write_version = obj
            .and_then(|o| o.get("write_version"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        parsed.insert(
            key.clone(),
            FileDefinition { path: path.to_string(), encoding, create_if_not_exist, restart_controller_on_change, write_version },
        );
    }

    (parsed, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_entry_parses_with_defaults() {
        let raw = json!({
            "cfg": {"path": "$DATA_PATH/cfg.json", "encoding": "json", "create_if_not_exist": true}
        });
        let (parsed, errors) = parse_definitions(raw.as_object().unwrap());
        assert!(errors.is_empty());
        let def = &parsed["cfg"];
        assert_eq!(def.encoding, Encoding::Json);
        assert!(def.create_if_not_exist);
        assert!(!def.restart_controller_on_change);
    }

    #[test]
    fn missing_path_is_rejected_without_aborting_other_entries() {
        let raw = json!({
            "bad": {"encoding": "text"},
            "good": {"path": "/tmp/x"},
        });
        let (parsed, errors) = parse_definitions(raw.as_object().unwrap());
        assert_eq!(errors.len(), 1);
        assert!(parsed.contains_key("good"));
        assert!(!parsed.contains_key("bad"));
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let raw = json!({"x": {"path": "/tmp/x", "encoding": "yaml"}});
        let (parsed, errors) = parse_definitions(raw.as_object().unwrap());
        assert!(parsed.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
