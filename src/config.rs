//! # Path/Config Resolver (C1)
//!
//! ## Why This Module Exists
//! Every other component in the gateway needs a filesystem path, a host/port
//! pair, or a credential location, but none of them should know how those
//! values were decided (CLI flag vs. environment variable vs. a hardcoded
//! default). This module is the single place that reads `std::env` and
//! `clap::Parser` output; everything downstream receives an already-resolved
//! [`GatewayConfig`].
//!
//! ## Design Rationale
//! Centralizing resolution here means a component under test can construct a
//! `GatewayConfig` directly without touching the environment, and the
//! precedence rules (CLI overrides environment, environment overrides
//! built-in defaults) only need to be right in one place.

use clap::Parser;
use std::path::PathBuf;

/// Command-line surface (spec §6): two flags, both overridable by environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "teg-gateway", about = "IoT edge gateway for a local controller")]
pub struct Cli {
    /// ThingsBoard-compatible MQTT broker host.
    #[arg(long, env = "TB_HOST")]
    pub tb_host: Option<String>,

    /// ThingsBoard-compatible MQTT broker port.
    #[arg(long, env = "TB_PORT")]
    pub tb_port: Option<u16>,
}

/// Log severity threshold for the structured log pipeline (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").unwrap_or_default().to_uppercase().as_str() {
            "DEBUG" => LogLevel::Debug,
            "WARN" => LogLevel::Warn,
            "ERROR" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }

    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// All filesystem paths and network settings the gateway needs, resolved
/// once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub tb_host: String,
    pub tb_port: u16,

    pub data_path: PathBuf,
    pub controller_data_path: PathBuf,
    pub controller_logs_path: PathBuf,

    pub controller_git_path: PathBuf,
    pub controller_dockercontext_path: PathBuf,
    pub controller_dockerfile_path: PathBuf,

    pub thingsboard_ca_cert: Option<PathBuf>,
    pub access_token_path: PathBuf,

    pub provision_device_key: Option<String>,
    pub provision_device_secret: Option<String>,
    pub device_name: Option<String>,

    pub default_controller_version: Option<String>,
    pub log_level: LogLevel,
}

/// Errors that prevent the gateway from starting at all (spec §7,
/// "Configuration fatal").
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl GatewayConfig {
    /// Resolves the full configuration from parsed CLI args and the process
    /// environment. `TEG_CONTROLLER_GIT_PATH` is the one value spec.md marks
    /// "must be set"; everything else degrades to a sensible default.
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let tb_host = cli
            .tb_host
            .or_else(|| env_opt("TB_HOST"))
            .unwrap_or_else(|| "localhost".to_string());
        let tb_port = cli.tb_port.unwrap_or(8883);

        let data_path = env_path("TEG_DATA_PATH", "./data");
        let controller_data_path = env_path("TEG_CONTROLLER_DATA_PATH", "./controller_data");
        let controller_logs_path = env_path("TEG_CONTROLLER_LOGS_PATH", "./controller_logs");

        let controller_git_path = std::env::var("TEG_CONTROLLER_GIT_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingEnv("TEG_CONTROLLER_GIT_PATH"))?;

        let controller_dockercontext_path = env_path(
            "TEG_CONTROLLER_DOCKERCONTEXT_PATH",
            "./software/controller",
        );
        let controller_dockerfile_path =
            env_path("TEG_CONTROLLER_DOCKERFILE_PATH", "./docker/Dockerfile");

        let thingsboard_ca_cert = env_opt("THINGSBOARD_CA_CERT").map(PathBuf::from);
        let access_token_path = env_path("THINGSBOARD_ACCESS_TOKEN", "./tb_access_token");

        Ok(Self {
            tb_host,
            tb_port,
            data_path,
            controller_data_path,
            controller_logs_path,
            controller_git_path,
            controller_dockercontext_path,
            controller_dockerfile_path,
            thingsboard_ca_cert,
            access_token_path,
            provision_device_key: env_opt("THINGSBOARD_PROVISION_DEVICE_KEY"),
            provision_device_secret: env_opt("THINGSBOARD_PROVISION_DEVICE_SECRET"),
            device_name: env_opt("THINGSBOARD_DEVICE_NAME"),
            default_controller_version: env_opt("TEG_DEFAULT_CONTROLLER_VERSION"),
            log_level: LogLevel::from_env(),
        })
    }

    /// Expands the `$DATA_PATH`, `$DATA_PATH$`, and `%DATA_PATH%` path
    /// tokens (spec §4.7) to the controller data directory.
    pub fn expand_data_path(&self, raw: &str) -> String {
        let data_path = self.controller_data_path.to_string_lossy();
        raw.replace("%DATA_PATH%", &data_path)
            .replace("$DATA_PATH$", &data_path)
            .replace("$DATA_PATH", &data_path)
    }

    pub fn communication_queue_db_path(&self) -> PathBuf {
        self.data_path.join("communication_queue.db")
    }

    pub fn gateway_archive_db_path(&self) -> PathBuf {
        self.data_path.join("gateway_archive.db")
    }

    pub fn gateway_logs_buffer_db_path(&self) -> PathBuf {
        self.data_path.join("gateway_logs_buffer.db")
    }

    pub fn last_launched_version_path(&self) -> PathBuf {
        self.data_path.join("last_launched_controller_version.txt")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "TB_HOST",
            "TB_PORT",
            "TEG_DATA_PATH",
            "TEG_CONTROLLER_DATA_PATH",
            "TEG_CONTROLLER_LOGS_PATH",
            "TEG_CONTROLLER_GIT_PATH",
            "TEG_CONTROLLER_DOCKERCONTEXT_PATH",
            "TEG_CONTROLLER_DOCKERFILE_PATH",
            "THINGSBOARD_CA_CERT",
            "THINGSBOARD_ACCESS_TOKEN",
            "THINGSBOARD_PROVISION_DEVICE_KEY",
            "THINGSBOARD_PROVISION_DEVICE_SECRET",
            "THINGSBOARD_DEVICE_NAME",
            "TEG_DEFAULT_CONTROLLER_VERSION",
            "LOG_LEVEL",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn missing_git_path_is_configuration_fatal() {
        clear_env();
        let cli = Cli { tb_host: None, tb_port: None };
        let err = GatewayConfig::resolve(cli).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("TEG_CONTROLLER_GIT_PATH")));
    }

    #[test]
    fn expands_all_data_path_token_variants() {
        clear_env();
        std::env::set_var("TEG_CONTROLLER_GIT_PATH", "/srv/git");
        std::env::set_var("TEG_CONTROLLER_DATA_PATH", "/root/data");
        let cfg = GatewayConfig::resolve(Cli { tb_host: None, tb_port: None }).unwrap();
        assert_eq!(cfg.expand_data_path("$DATA_PATH/cfg.json"), "/root/data/cfg.json");
        assert_eq!(cfg.expand_data_path("$DATA_PATH$/cfg.json"), "/root/data/cfg.json");
        assert_eq!(cfg.expand_data_path("%DATA_PATH%/cfg.json"), "/root/data/cfg.json");
        clear_env();
    }

    #[test]
    fn cli_flag_overrides_environment() {
        clear_env();
        std::env::set_var("TEG_CONTROLLER_GIT_PATH", "/srv/git");
        std::env::set_var("TB_HOST", "from-env");
        let cfg = GatewayConfig::resolve(Cli {
            tb_host: Some("from-cli".to_string()),
            tb_port: None,
        })
        .unwrap();
        assert_eq!(cfg.tb_host, "from-cli");
        clear_env();
    }
}
