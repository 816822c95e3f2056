//! # Container Manager (C7)
//!
//! ## Why This Module Exists
//! The controller is a separate process the gateway runs as a container;
//! this module is the only thing that talks to the Docker daemon, and the
//! only thing that decides which version of the controller should be
//! running at any given moment (spec §4.6).
//!
//! ## Design Rationale
//! Container lifecycle (list/inspect/run/stop/prune) goes through
//! `bollard`'s async API, matching the teacher's tokio-first style.
//! Building an image from a Dockerfile is a one-shot, long-running,
//! stream-free operation better expressed as a `docker build` subprocess
//! than as a hand-built tar context for `bollard::image::build_image`, so
//! this module shells out for that single step — the same pragmatic split
//! the original Python client draws between `docker.containers.run` (the
//! SDK) and shelling out to `git` (C6) for the source checkout.

pub mod version;

use crate::config::GatewayConfig;
use crate::git_client::GitClient;
use crate::mqtt::MqttTransport;
use crate::telemetry::{SwState, SwStateReport};
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, PruneContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const CONTAINER_NAME: &str = "teg_controller";
pub const IMAGE_PREFIX: &str = "teg-controller-";

#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("unable to resolve commit for version {0}")]
    UnresolvedVersion(String),
    #[error("git reset to commit {0} failed")]
    ResetFailed(String),
    #[error("docker build failed: {0}")]
    BuildFailed(String),
    #[error("no previous version known, cannot start without an explicit version")]
    NoKnownVersion,
}

pub struct ContainerManager {
    docker: Docker,
    git: GitClient,
    mqtt: Arc<MqttTransport>,
    data_path: PathBuf,
    logs_path: PathBuf,
    dockercontext_path: PathBuf,
    dockerfile_path: PathBuf,
}

fn image_tag(version: &str) -> String {
    format!("{IMAGE_PREFIX}{version}:latest")
}

/// Parses a version out of a running container's image tag: split on `-`,
/// take the last component, strip a trailing `:latest`. Valid versions
/// start with `v` or are a 40-character hash (spec §4.6, grounded in
/// `docker_client.py::get_edge_version`).
fn version_from_image_tag(image: &str) -> Option<String> {
    let last = image.rsplit('-').next()?;
    let stripped = last.strip_suffix(":latest").unwrap_or(last);
    if version::looks_like_version(stripped) {
        Some(stripped.to_string())
    } else {
        None
    }
}

/// Parses Docker's `StartedAt` RFC3339 timestamp into milliseconds since
/// epoch.
fn parse_started_at(started_at: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(started_at).ok().map(|dt| dt.timestamp_millis())
}

impl ContainerManager {
    pub fn new(docker: Docker, config: &GatewayConfig, mqtt: Arc<MqttTransport>) -> Self {
        Self {
            docker,
            git: GitClient::new(&config.controller_git_path),
            mqtt,
            data_path: config.controller_data_path.clone(),
            logs_path: config.controller_logs_path.clone(),
            dockercontext_path: config.controller_dockercontext_path.clone(),
            dockerfile_path: config.controller_dockerfile_path.clone(),
        }
    }

    async fn find_container(&self) -> Result<Option<bollard::models::ContainerSummary>, ContainerError> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![CONTAINER_NAME.to_string()]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions { all: true, filters, ..Default::default() }))
            .await?;
        Ok(containers.into_iter().find(|c| {
            c.names.as_ref().is_some_and(|names| names.iter().any(|n| n.trim_start_matches('/') == CONTAINER_NAME))
        }))
    }

    pub async fn is_running(&self) -> Result<bool, ContainerError> {
        Ok(self
            .find_container()
            .await?
            .and_then(|c| c.state)
            .map(|state| state == bollard::models::ContainerSummaryStateEnum::RUNNING)
            .unwrap_or(false))
    }

    pub async fn running_version(&self) -> Result<Option<String>, ContainerError> {
        let Some(container) = self.find_container().await? else { return Ok(None) };
        if container.state != Some(bollard::models::ContainerSummaryStateEnum::RUNNING) {
            return Ok(None);
        }
        Ok(container.image.as_deref().and_then(version_from_image_tag))
    }

    pub async fn startup_timestamp_ms(&self) -> Result<Option<i64>, ContainerError> {
        let Some(summary) = self.find_container().await? else { return Ok(None) };
        let Some(id) = summary.id else { return Ok(None) };
        let details =
            self.docker.inspect_container(&id, None::<bollard::query_parameters::InspectContainerOptions>).await?;
        Ok(details.state.and_then(|s| s.started_at).and_then(|ts| parse_started_at(&ts)))
    }

    /// Stops the controller gracefully (60s timeout), persisting the
    /// running version as `last_launched` first so a subsequent watchdog
    /// restart reuses it (spec §4.6).
    pub async fn stop(&self, last_launched_path: &std::path::Path) -> Result<(), ContainerError> {
        if !self.is_running().await? {
            info!("controller container is not running, nothing to stop");
            return Ok(());
        }
        if let Some(version) = self.running_version().await? {
            let _ = version::write_last_launched(last_launched_path, &version);
        }
        self.docker
            .stop_container(CONTAINER_NAME, Some(StopContainerOptions { t: 60 }))
            .await?;
        info!("stopped controller container");
        Ok(())
    }

    pub async fn prune_containers(&self) -> Result<(), ContainerError> {
        self.docker.prune_containers(None::<PruneContainersOptions<String>>).await?;
        Ok(())
    }

    async fn is_image_available(&self, tag: &str) -> Result<bool, ContainerError> {
        let images = self.docker.list_images(None::<bollard::query_parameters::ListImagesOptions>).await?;
        Ok(images.iter().any(|img| img.repo_tags.iter().any(|t| t == tag)))
    }

    async fn publish_sw_state(&self, title: &str, version: &str, state: SwState, message: &str) {
        let report = SwStateReport {
            current_sw_title: title,
            current_sw_version: version,
            sw_state: state.as_str(),
            sw_error: message,
        };
        let body = serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string());
        let _ = self.mqtt.publish_telemetry(body).await;
    }

    /// Builds `teg-controller-<version>:latest` from the resolved commit.
    /// Mirrors `docker_client.py::start_controller`'s download path: fetch,
    /// resolve the version to a commit, reset the source tree, then build.
    async fn build_image(&self, version: &str) -> Result<(), ContainerError> {
        self.publish_sw_state("controller", version, SwState::Downloading, "").await;
        self.git.fetch();

        let commit = self
            .git
            .resolve_commit(version)
            .ok_or_else(|| ContainerError::UnresolvedVersion(version.to_string()))?;

        if !self.git.reset_to(&commit) || self.git.current_commit().as_deref() != Some(commit.as_str()) {
            return Err(ContainerError::ResetFailed(commit));
        }
        self.publish_sw_state("controller", version, SwState::Downloaded, "").await;

        let tag = image_tag(version);
        let status = tokio::process::Command::new("docker")
            .arg("build")
            .arg("-f")
            .arg(&self.dockerfile_path)
            .arg("-t")
            .arg(&tag)
            .arg(&self.dockercontext_path)
            .status()
            .await
            .map_err(|e| ContainerError::BuildFailed(e.to_string()))?;

        if !status.success() {
            return Err(ContainerError::BuildFailed(format!("docker build exited with {status}")));
        }
        info!(commit, tag, "built controller image");
        Ok(())
    }

    fn host_config(&self) -> HostConfig {
        HostConfig {
            privileged: Some(true),
            network_mode: Some("host".to_string()),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::ON_FAILURE),
                maximum_retry_count: Some(3),
            }),
            log_config: Some(bollard::models::HostConfigLogConfig {
                typ: Some("json-file".to_string()),
                config: Some(HashMap::from([
                    ("max-size".to_string(), "10m".to_string()),
                    ("max-file".to_string(), "5".to_string()),
                ])),
            }),
            binds: Some(vec![
                "/bin/vcgencmd:/bin/vcgencmd:ro".to_string(),
                "/bin/uptime:/bin/uptime:ro".to_string(),
                "/bin/pigs:/bin/pigs:ro".to_string(),
                format!("{}:/root/data:rw", self.data_path.display()),
                format!("{}:/root/logs:rw", self.logs_path.display()),
            ]),
            ..Default::default()
        }
    }

    /// Runs the controller at `version`, building the image first if it's
    /// not already available locally (spec §4.6).
    pub async fn start(&self, version: &str, last_launched_path: &std::path::Path) -> Result<(), ContainerError> {
        if self.is_running().await? {
            let current = self.running_version().await?;
            if current.as_deref() == Some(version) {
                let _ = version::write_last_launched(last_launched_path, version);
                info!(version, "controller already running at requested version");
                return Ok(());
            }
            self.stop(last_launched_path).await?;
        }

        let tag = image_tag(version);
        if !self.is_image_available(&tag).await? {
            self.build_image(version).await?;
        }

        self.publish_sw_state("controller", version, SwState::Updating, "").await;
        self.prune_containers().await?;

        let options = CreateContainerOptions { name: CONTAINER_NAME, platform: None };
        let config = Config {
            image: Some(tag.as_str()),
            host_config: Some(self.host_config()),
            ..Default::default()
        };
        // A stale stopped container with the same name blocks creation.
        let _ = self
            .docker
            .remove_container(CONTAINER_NAME, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await;
        self.docker.create_container(Some(options), config).await?;
        self.docker.start_container(CONTAINER_NAME, None::<StartContainerOptions<String>>).await?;

        version::write_last_launched(last_launched_path, version).ok();
        self.publish_sw_state("controller", version, SwState::Updated, "").await;
        info!(version, "controller container started");
        Ok(())
    }

    /// Wraps [`Self::start`], swallowing errors with a warning — used by
    /// automated paths (watchdog, OTA handler) that must not crash the
    /// main loop (spec §4.6).
    pub async fn start_safely(&self, version: &str, last_launched_path: &std::path::Path) {
        if let Err(e) = self.start(version, last_launched_path).await {
            error!(error = %e, version, "controller start failed");
            self.publish_sw_state("controller", version, SwState::Failed, &e.to_string()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_tag_and_strips_latest_suffix() {
        assert_eq!(version_from_image_tag("teg-controller-v1.2.3:latest"), Some("v1.2.3".to_string()));
        assert_eq!(
            version_from_image_tag(&format!("teg-controller-{}:latest", "a".repeat(40))),
            Some("a".repeat(40))
        );
        assert_eq!(version_from_image_tag("teg-controller-unknown:latest"), None);
    }

    #[test]
    fn image_tag_has_prefix_and_latest_suffix() {
        assert_eq!(image_tag("v1.2.3"), "teg-controller-v1.2.3:latest");
    }

    #[test]
    fn started_at_parses_rfc3339_with_fraction() {
        let ts = parse_started_at("2024-01-01T00:00:01.500000000Z").unwrap();
        assert_eq!(ts, 1704067201500);
    }
}
