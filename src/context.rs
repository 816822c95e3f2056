//! Shared handle bundle wired up once in `main.rs` and passed by `Arc` to
//! the router (C9) and RPC registry (C10), the way the teacher's
//! `*Handle` types are cloned into every task that needs them.

use crate::config::GatewayConfig;
use crate::container::ContainerManager;
use crate::db::archive::Archive;
use crate::db::log_buffer::LogBuffer;
use crate::db::queue::CommunicationQueue;
use crate::files::FileEngine;
use crate::mqtt::MqttTransport;
use crate::watchdog::WatchdogState;
use std::sync::Arc;

pub struct GatewayContext {
    pub config: Arc<GatewayConfig>,
    pub mqtt: Arc<MqttTransport>,
    pub files: Arc<FileEngine>,
    pub container: Arc<ContainerManager>,
    pub queue: Arc<CommunicationQueue>,
    pub archive: Arc<Archive>,
    pub log_buffer: Arc<LogBuffer>,
    pub watchdog: Arc<WatchdogState>,
}

impl GatewayContext {
    pub fn last_launched_path(&self) -> std::path::PathBuf {
        self.config.last_launched_version_path()
    }
}
