//! # Watchdog & Forwarding Loop (C11)
//!
//! ## Why This Module Exists
//! This is the single cooperative loop that owns every database and
//! decides, each iteration, what the most urgent piece of work is:
//! draining an inbound message, nudging the controller back to life, or
//! pushing queued telemetry out to the broker (spec §4.10).
//!
//! ## Design Rationale
//! Each step returns whether it did any work; the loop only sleeps when a
//! full pass finds nothing to do, which is what gives the loop its
//! ≈0.05–5s adaptive granularity (spec §4.10 step 9) without a fixed
//! tick rate.

use crate::context::GatewayContext;
use crate::logging::LogPipeline;
use crate::router::Router;
use crate::telemetry::InboundEnvelope;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Floor and growth/shrink factors for the controller restart backoff
/// (spec §4.10 step 2, §8 "Backoff monotonicity").
const BACKOFF_FLOOR_MS: i64 = 600_000;
const BACKOFF_FACTOR: f64 = 1.6;
const AUX_TELEMETRY_INTERVAL_MS: i64 = 20_000;
const HEARTBEAT_STALE_MS: i64 = 6 * 60 * 60 * 1000;

/// Shared, atomics-backed restart-backoff state. Exposed outside this
/// module so `restart_controller` (C10) can force the next watchdog
/// iteration to attempt a restart.
pub struct WatchdogState {
    next_restart_delay_ms: AtomicI64,
    last_restart_ts_ms: AtomicI64,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self {
            next_restart_delay_ms: AtomicI64::new(BACKOFF_FLOOR_MS),
            last_restart_ts_ms: AtomicI64::new(0),
        }
    }
}

impl WatchdogState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the restart clock so the next loop iteration treats the
    /// backoff window as elapsed (spec §4.9 `restart_controller`).
    pub fn force_restart(&self) {
        self.last_restart_ts_ms.store(0, Ordering::SeqCst);
    }

    fn due(&self, now: i64) -> bool {
        now - self.last_restart_ts_ms.load(Ordering::SeqCst) >= self.next_restart_delay_ms.load(Ordering::SeqCst)
    }

    fn mark_attempted(&self, now: i64) {
        self.last_restart_ts_ms.store(now, Ordering::SeqCst);
    }

    fn grow(&self) {
        let current = self.next_restart_delay_ms.load(Ordering::SeqCst);
        self.next_restart_delay_ms.store((current as f64 * BACKOFF_FACTOR) as i64, Ordering::SeqCst);
    }

    fn shrink(&self) {
        let current = self.next_restart_delay_ms.load(Ordering::SeqCst);
        let shrunk = ((current as f64) / BACKOFF_FACTOR) as i64;
        self.next_restart_delay_ms.store(shrunk.max(BACKOFF_FLOOR_MS), Ordering::SeqCst);
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

pub struct WatchdogLoop {
    ctx: Arc<GatewayContext>,
    router: Router,
    log_pipeline: Arc<LogPipeline>,
    inbound: mpsc::Receiver<InboundEnvelope>,
    last_aux_telemetry_ms: i64,
}

impl WatchdogLoop {
    pub fn new(
        ctx: Arc<GatewayContext>,
        router: Router,
        log_pipeline: Arc<LogPipeline>,
        inbound: mpsc::Receiver<InboundEnvelope>,
    ) -> Self {
        Self { ctx, router, log_pipeline, inbound, last_aux_telemetry_ms: 0 }
    }

    /// Runs until `shutdown` is cancelled, then disconnects MQTT and
    /// closes every database (spec §4.10 "Cancellation and shutdown").
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let did_work = self.tick().await;
            if !did_work {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        info!("watchdog loop shutting down");
        self.ctx.mqtt.disconnect().await;
        self.ctx.queue.close();
        self.ctx.archive.close();
        self.ctx.log_buffer.close();
    }

    /// Runs one priority-ordered pass (spec §4.10). Returns whether any
    /// step did work, so the caller knows whether to sleep.
    async fn tick(&mut self) -> bool {
        if let Ok(envelope) = self.inbound.try_recv() {
            self.router.dispatch(envelope).await;
            return true;
        }

        let mut did_work = self.controller_watchdog_step().await;

        if !self.ctx.mqtt.is_network_task_alive() || !self.ctx.mqtt.is_connected() {
            tokio::time::sleep(Duration::from_secs(30)).await;
            crate::error::fatal_error("mqtt network task is not alive or not connected").await;
        }

        did_work |= self.log_drain_step().await;
        did_work |= self.stage_step().await;
        did_work |= self.publish_step().await;
        did_work |= self.aux_telemetry_step().await;
        did_work |= self.heartbeat_staleness_step().await;

        did_work
    }

    async fn controller_watchdog_step(&self) -> bool {
        let now = now_ms();
        if !self.ctx.watchdog.due(now) {
            return false;
        }

        let running = self.ctx.container.is_running().await.unwrap_or(false);
        if !running {
            self.ctx.watchdog.grow();
            tokio::time::sleep(Duration::from_secs(10)).await;

            let last_launched_path = self.ctx.last_launched_path();
            match crate::container::version::read_last_launched(&last_launched_path) {
                Some(version) => {
                    self.ctx.container.start_safely(&version, &last_launched_path).await;
                }
                None => {
                    self.ctx.mqtt.request_attributes("sw_title,sw_url,sw_version").await;
                    let body = json!({
                        "current_sw_title": "controller",
                        "current_sw_version": "",
                        "sw_state": "FAILED",
                        "sw_error": "no previously launched controller version is known",
                    })
                    .to_string();
                    self.ctx.mqtt.publish_telemetry(body).await;
                    tokio::time::sleep(Duration::from_secs(20)).await;
                }
            }
        } else {
            self.ctx.watchdog.shrink();
        }

        self.ctx.watchdog.mark_attempted(now_ms());
        true
    }

    async fn log_drain_step(&self) -> bool {
        if !self.ctx.log_buffer.has_rows() {
            return false;
        }
        self.log_pipeline.drain_one().await
    }

    /// Moves the oldest `controller_messages` row to `pending_mqtt_messages`,
    /// archiving it first unless its `type` contains `"log"` (spec §4.10
    /// step 5, §8 "Atomicity of handoff").
    async fn stage_step(&self) -> bool {
        let Ok(Some(message)) = self.ctx.queue.oldest_controller_message() else { return false };

        if !message.message_type.contains("log") {
            if let Ok(parsed) = serde_json::from_str::<Value>(&message.message) {
                let ts = parsed.get("ts").and_then(Value::as_i64).unwrap_or_else(now_ms);
                if let Err(e) = self.ctx.archive.insert(ts, &message.message) {
                    warn!(error = %e, id = message.id, "failed to archive controller message");
                }
            }
        }

        if let Err(e) = self.ctx.queue.stage(message.id, &message.message_type, &message.message) {
            warn!(error = %e, id = message.id, "failed to stage controller message");
        }
        true
    }

    async fn publish_step(&self) -> bool {
        let Ok(Some(message)) = self.ctx.queue.oldest_pending_message() else { return false };
        if self.ctx.mqtt.publish_telemetry(message.message).await {
            if let Err(e) = self.ctx.queue.delete_pending(message.id) {
                warn!(error = %e, id = message.id, "failed to delete acked pending message");
            }
        }
        true
    }

    async fn aux_telemetry_step(&mut self) -> bool {
        let now = now_ms();
        if now - self.last_aux_telemetry_ms < AUX_TELEMETRY_INTERVAL_MS {
            return false;
        }
        self.last_aux_telemetry_ms = now;

        let startup_ts = self.ctx.container.startup_timestamp_ms().await.ok().flatten();
        let heartbeat_ts = self.ctx.queue.last_health_check_ts().unwrap_or(0);

        let body = json!({
            "ms_since_controller_startup": startup_ts.map(|ts| now - ts),
            "ms_since_last_controller_health_check": if heartbeat_ts > 0 { Some(now - heartbeat_ts) } else { None },
        })
        .to_string();
        self.ctx.mqtt.publish_telemetry(body).await;
        true
    }

    /// Stops the controller if it has claimed to be running with no
    /// heartbeat in over 6h (spec §4.10 step 8). The watchdog step above
    /// restarts it on a subsequent iteration.
    async fn heartbeat_staleness_step(&self) -> bool {
        let running = self.ctx.container.is_running().await.unwrap_or(false);
        if !running {
            return false;
        }
        let now = now_ms();
        let heartbeat_ts = self.ctx.queue.last_health_check_ts().unwrap_or(0);
        let startup_ts = self.ctx.container.startup_timestamp_ms().await.ok().flatten().unwrap_or(0);
        let freshest = heartbeat_ts.max(startup_ts);

        if freshest < now - HEARTBEAT_STALE_MS {
            warn!(freshest, "controller heartbeat stale beyond 6h, stopping for restart");
            let _ = self.ctx.container.stop(&self.ctx.last_launched_path()).await;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_never_drops_below_the_floor() {
        let state = WatchdogState::new();
        for _ in 0..50 {
            state.shrink();
        }
        assert_eq!(state.next_restart_delay_ms.load(Ordering::SeqCst), BACKOFF_FLOOR_MS);
    }

    #[test]
    fn backoff_growth_matches_the_documented_bound() {
        let state = WatchdogState::new();
        for _ in 0..3 {
            state.grow();
        }
        let expected_upper_bound = (BACKOFF_FLOOR_MS as f64 * BACKOFF_FACTOR.powi(3)) as i64;
        assert!(state.next_restart_delay_ms.load(Ordering::SeqCst) <= expected_upper_bound);
    }

    #[test]
    fn force_restart_makes_the_next_check_immediately_due() {
        let state = WatchdogState::new();
        state.mark_attempted(now_ms());
        assert!(!state.due(now_ms()));
        state.force_restart();
        assert!(state.due(now_ms()));
    }
}
