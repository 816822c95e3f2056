//! # Git/Image Client (C6)
//!
//! ## Why This Module Exists
//! Container builds (C7) need a reproducible source checkout: given a tag
//! or a commit hash, reset the local working tree to exactly that state.
//! This module wraps the `git` binary the same way the original
//! implementation does — a thin subprocess shim, not a libgit2 binding —
//! since every operation here is a one-shot CLI invocation with no need
//! for in-process repository state (spec §4.5).
//!
//! ## Design Rationale
//! All errors return negative results (`None`/`false`/`Err`); the caller
//! (C7) decides whether to abort an update. Nothing here panics on a
//! failed git invocation — a stale source tree during an OTA update is an
//! "Operational non-fatal" error (spec §7), not a crash.

use std::path::{Path, PathBuf};
use std::process::Output;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),
}

pub struct GitClient {
    /// The directory `git` commands run in — the parent of the configured
    /// git path, matching `dirname(GATEWAY_GIT_PATH)` in the original.
    working_dir: PathBuf,
}

impl GitClient {
    pub fn new(git_path: impl AsRef<Path>) -> Self {
        let working_dir = git_path
            .as_ref()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| git_path.as_ref().to_path_buf());
        Self { working_dir }
    }

    fn run(&self, args: &[&str]) -> Result<Output, GitError> {
        Ok(std::process::Command::new("git").args(args).current_dir(&self.working_dir).output()?)
    }

    /// Resolves a tag to its commit hash, falling back to verifying
    /// `hash_or_tag` is itself a valid commit/tag object.
    pub fn resolve_commit(&self, hash_or_tag: &str) -> Option<String> {
        if let Some(commit) = self.commit_for_tag(hash_or_tag) {
            return Some(commit);
        }
        if self.object_exists(hash_or_tag) {
            return Some(hash_or_tag.to_string());
        }
        None
    }

    pub fn current_commit(&self) -> Option<String> {
        let output = self.run(&["rev-parse", "HEAD"]).ok()?;
        if !output.status.success() {
            error!("git rev-parse HEAD failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn commit_for_tag(&self, tag: &str) -> Option<String> {
        let refname = format!("tags/{tag}");
        let output = self.run(&["rev-list", "-n", "1", &refname]).ok()?;
        if !output.status.success() {
            return None;
        }
        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            None
        } else {
            Some(commit)
        }
    }

    fn object_exists(&self, commit_hash: &str) -> bool {
        match self.run(&["cat-file", "-t", commit_hash]) {
            Ok(output) => {
                output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "commit"
            }
            Err(_) => false,
        }
    }

    pub fn fetch(&self) -> bool {
        matches!(self.run(&["fetch"]), Ok(output) if output.status.success())
    }

    /// `checkout -f` then `reset --hard` then `clean -f -d`, all-or-nothing
    /// (spec §4.5).
    pub fn reset_to(&self, commit_hash: &str) -> bool {
        let steps: [&[&str]; 3] =
            [&["checkout", "-f", commit_hash], &["reset", "--hard", "HEAD"], &["clean", "-f", "-d"]];
        for step in steps {
            match self.run(step) {
                Ok(output) if output.status.success() => continue,
                _ => {
                    error!(?step, "git reset step failed");
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_dir_is_the_parent_of_the_git_path() {
        let client = GitClient::new("/srv/controller-src/.git");
        assert_eq!(client.working_dir, PathBuf::from("/srv/controller-src"));
    }
}
