mod config;
mod container;
mod context;
mod db;
mod error;
mod files;
mod git_client;
mod logging;
mod mqtt;
mod provisioning;
mod router;
mod rpc;
mod telemetry;
mod watchdog;

use clap::Parser;
use color_eyre::eyre::{eyre, Result};
use config::{Cli, GatewayConfig};
use context::GatewayContext;
use db::archive::Archive;
use db::log_buffer::LogBuffer;
use db::queue::CommunicationQueue;
use logging::{LogPipeline, Severity};
use router::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use watchdog::{WatchdogLoop, WatchdogState};

const FILE_DRIFT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const FORCE_EXIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let config = match GatewayConfig::resolve(cli) {
        Ok(config) => config,
        Err(e) => {
            // The tracing subscriber isn't installed yet for a configuration
            // failure this early; stderr is the only sink available.
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };
    let log_events = logging::init_tracing(config.log_level.as_tracing_level());

    info!(host = %config.tb_host, port = config.tb_port, "starting teg-gateway");

    let provisioning::ProvisioningResult { access_token, provisioned } =
        match provisioning::obtain_access_token(&config).await {
            Ok(result) => result,
            Err(e) => error::fatal_error(format!("provisioning failed: {e}")).await,
        };
    info!(provisioned, "access token ready");

    let queue = match CommunicationQueue::open(config.communication_queue_db_path()) {
        Ok(q) => q,
        Err(e) => error::fatal_error(format!("failed to open communication queue: {e}")).await,
    };
    let archive = match Archive::open(config.gateway_archive_db_path()) {
        Ok(a) => a,
        Err(e) => error::fatal_error(format!("failed to open gateway archive: {e}")).await,
    };
    let log_buffer = match LogBuffer::open(config.gateway_logs_buffer_db_path()) {
        Ok(l) => l,
        Err(e) => error::fatal_error(format!("failed to open log buffer: {e}")).await,
    };

    let (mqtt, inbound) = match mqtt::MqttTransport::connect(&config, &access_token).await {
        Ok(pair) => pair,
        Err(e) => error::fatal_error(format!("failed to open mqtt session: {e}")).await,
    };
    let mqtt = Arc::new(mqtt);
    mqtt.request_attributes("sw_title,sw_url,sw_version,FILES").await;
    mqtt.publish_sys_info().await;

    let docker = bollard::Docker::connect_with_local_defaults()
        .map_err(|e| eyre!("failed to connect to the docker daemon: {e}"))?;
    let container = Arc::new(container::ContainerManager::new(docker, &config, mqtt.clone()));

    let ctx = Arc::new(GatewayContext {
        config: Arc::new(config),
        mqtt: mqtt.clone(),
        files: Arc::new(files::FileEngine::new()),
        container,
        queue: Arc::new(queue),
        archive: Arc::new(archive),
        log_buffer: Arc::new(log_buffer),
        watchdog: Arc::new(WatchdogState::new()),
    });

    let log_pipeline = Arc::new(LogPipeline::new(mqtt.clone(), ctx.log_buffer.clone(), Severity::Info));
    tokio::spawn(logging::run_forwarder(log_events, log_pipeline.clone()));

    if let Some(version) = ctx.config.default_controller_version.clone() {
        ctx.container.start_safely(&version, &ctx.last_launched_path()).await;
    }

    let shutdown = CancellationToken::new();
    spawn_file_drift_daemon(ctx.clone(), shutdown.clone());
    spawn_signal_handlers(shutdown.clone());

    let router = Router::new(ctx.clone());
    let watchdog_loop = WatchdogLoop::new(ctx.clone(), router, log_pipeline, inbound);
    watchdog_loop.run(shutdown).await;

    info!("teg-gateway exiting normally");
    Ok(())
}

/// Every 30s, asks the file engine whether any managed file drifted on
/// disk and, if so, re-requests the authoritative hash set from the
/// backend (spec §5, "File-drift daemon"). Writes nothing to the
/// databases.
fn spawn_file_drift_daemon(ctx: Arc<GatewayContext>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(FILE_DRIFT_INTERVAL) => {}
                _ = shutdown.cancelled() => break,
            }

            let definitions = ctx.files.definitions();
            let mut drifted = false;
            for def in definitions.values() {
                let path = ctx.config.expand_data_path(&def.path);
                if ctx.files.did_file_change(&path) {
                    drifted = true;
                }
            }
            if drifted {
                ctx.mqtt.request_attributes("FILE_HASHES").await;
            }
        }
    });
}

/// On SIGINT/SIGTERM: arms a 20s force-exit timer, then signals the main
/// loop to stop (spec §4.10 "Cancellation and shutdown", §7 exit code 1
/// for a forced shutdown after timeout).
fn spawn_signal_handlers(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, starting graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, starting graceful shutdown"),
        }

        let force_exit = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FORCE_EXIT_TIMEOUT).await;
            if !force_exit.is_cancelled() {
                warn!("graceful shutdown exceeded 20s, forcing exit");
            }
            std::process::exit(1);
        });

        shutdown.cancel();
    });
}
