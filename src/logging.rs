//! # Log Pipeline (C4)
//!
//! ## Why This Module Exists
//! The gateway's own operational logs need to reach the backend for remote
//! diagnosis, but the backend connection is exactly the thing most likely
//! to be down when something worth logging happens. This module is the
//! bridge: it always writes to stdout, and for anything at or above the
//! configured severity it either publishes live or buffers to
//! [`crate::db::log_buffer`] for later replay (spec §4.3).
//!
//! ## Design Rationale
//! A 1ms sleep after every buffered enqueue guarantees distinct millisecond
//! timestamps across a burst of same-tick log calls, exactly as the Python
//! original's `publish_log` does — without it, two logs in the same
//! millisecond would collide on ordering when replayed since the buffer's
//! natural order is insertion id, not timestamp.

use crate::db::log_buffer::LogBuffer;
use crate::mqtt::MqttTransport;
use crate::telemetry::TelemetryEnvelope;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn from_tracing(level: Level) -> Self {
        match level {
            Level::TRACE | Level::DEBUG => Severity::Debug,
            Level::INFO => Severity::Info,
            Level::WARN => Severity::Warn,
            Level::ERROR => Severity::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

/// Forwards qualifying log events to MQTT, buffering on failure.
///
/// `tracing` remains the single place application code calls into
/// (`info!`, `warn!`, ...); this struct is driven by a subscriber layer
/// installed in `main.rs`, not called directly from business logic.
pub struct LogPipeline {
    mqtt: Arc<MqttTransport>,
    buffer: Arc<LogBuffer>,
    threshold: Severity,
}

impl LogPipeline {
    pub fn new(mqtt: Arc<MqttTransport>, buffer: Arc<LogBuffer>, threshold: Severity) -> Self {
        Self { mqtt, buffer, threshold }
    }

    /// Mirrors `GatewayMqttClient.publish_log`: prefixes the message with
    /// `"GATEWAY - "`, publishes as telemetry, and falls back to the
    /// buffer on failure or when MQTT isn't ready yet.
    pub async fn log(&self, severity: Severity, message: &str) {
        if severity < self.threshold {
            return;
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
        let ts = now_ms();
        let envelope = TelemetryEnvelope::new(
            ts,
            json!({ "severity": severity.as_str(), "message": format!("GATEWAY - {message}") }),
        );

        let published = self.mqtt.is_connected() && self.mqtt.publish_telemetry(envelope.to_json()).await;
        if !published {
            if let Err(e) = self.buffer.push(severity.as_str(), message, ts) {
                // Nowhere left to put this log; stdout already has it via `tracing`.
                eprintln!("[log-pipeline] failed to buffer log after publish failure: {e}");
            }
        }
    }

    /// Drains exactly one buffered row if present, publishing it with its
    /// original timestamp (spec §4.10 step 4). Returns whether a row was
    /// processed, so the watchdog loop can count it as "did work".
    pub async fn drain_one(&self) -> bool {
        let Ok(Some(row)) = self.buffer.oldest() else { return false };
        let envelope = TelemetryEnvelope::new(
            row.timestamp_ms,
            json!({ "severity": row.log_level, "message": format!("GATEWAY - {}", row.message) }),
        );
        if self.mqtt.publish_telemetry(envelope.to_json()).await {
            let _ = self.buffer.delete(row.id);
        }
        true
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// A `tracing_subscriber::Layer` that forwards every event emitted anywhere
/// in the codebase to [`LogPipeline::log`] (spec §4.3, "a `tracing_subscriber::Layer`
/// captures emitted events"). Events are handed off through an unbounded
/// channel since `Layer::on_event` is synchronous and `LogPipeline::log` is
/// not; [`init_tracing`]'s caller is responsible for draining the returned
/// receiver into a running `LogPipeline`.
struct ForwardingLayer {
    tx: mpsc::UnboundedSender<(Severity, String)>,
}

impl<S> Layer<S> for ForwardingLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        let severity = Severity::from_tracing(*event.metadata().level());
        let _ = self.tx.send((severity, visitor.0));
    }
}

/// Installs the global `tracing` subscriber: stdout formatting exactly as
/// before, plus the [`ForwardingLayer`] that feeds C4. Returns the receiver
/// side of that channel; the caller spawns a task draining it into a
/// [`LogPipeline`] once one exists (the pipeline itself needs the MQTT
/// transport and log buffer, both of which are only available after this
/// runs).
pub fn init_tracing(level: Level) -> mpsc::UnboundedReceiver<(Severity, String)> {
    use tracing_subscriber::prelude::*;

    let (tx, rx) = mpsc::unbounded_channel();
    let filter = tracing_subscriber::filter::LevelFilter::from_level(level);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).with(ForwardingLayer { tx }).init();
    rx
}

/// Drains `rx` for the rest of the process's life, forwarding every
/// captured event into `pipeline` (spec §4.3). Spawned once in `main.rs`
/// after the pipeline's dependencies (MQTT transport, log buffer) exist.
pub async fn run_forwarder(mut rx: mpsc::UnboundedReceiver<(Severity, String)>, pipeline: Arc<LogPipeline>) {
    while let Some((severity, message)) = rx.recv().await {
        pipeline.log(severity, &message).await;
    }
}
