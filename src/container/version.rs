//! Persisted record of the last controller version the gateway launched
//! (spec §3, "Controller Version State"). Read on startup so the watchdog
//! can restart the controller after a gateway restart without waiting for
//! an explicit instruction from the backend.

use std::path::Path;

/// A version is either a `v*.*.*`-style tag or a 40-character commit hash
/// (spec §4.6).
pub fn looks_like_version(candidate: &str) -> bool {
    candidate.starts_with('v') || candidate.len() == 40
}

pub fn read_last_launched(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn write_last_launched(path: &Path, version: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_versions_and_full_hashes_are_recognized() {
        assert!(looks_like_version("v1.2.3"));
        assert!(looks_like_version(&"a".repeat(40)));
        assert!(!looks_like_version("unknown"));
        assert!(!looks_like_version(&"a".repeat(39)));
    }
}
