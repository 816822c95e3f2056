//! # MQTT Transport (C3)
//!
//! ## Why This Module Exists
//! Every other component needs to publish telemetry or attributes without
//! knowing whether the broker is currently reachable, and needs a stream of
//! inbound messages without running its own network loop. This module is
//! the one place that owns the `rumqttc` client and event loop.
//!
//! ## Design Rationale
//! The event loop runs on its own spawned task (spec §5: "MQTT network
//! task"); [`MqttTransport`] is a cheaply-`Clone`able handle the main task
//! uses to publish. Because spec.md requires publish-with-ack on a 5s
//! timeout and only the main task ever calls `publish` (single-writer,
//! §5), a FIFO queue of oneshot acks is sufficient to correlate broker
//! PUBACKs with the publish call that's waiting on them — no per-message
//! packet-id bookkeeping is needed.

pub mod topics;

use crate::config::GatewayConfig;
use crate::telemetry::InboundEnvelope;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const INBOUND_CHANNEL_CAPACITY: usize = 256;
const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

struct Shared {
    client: AsyncClient,
    pending_acks: StdMutex<VecDeque<oneshot::Sender<()>>>,
    request_counter: AtomicU64,
    connected: AtomicBool,
    network_alive: AtomicBool,
    first_connect: StdMutex<Option<oneshot::Sender<()>>>,
}

/// Cheap-to-clone handle to the live MQTT session.
#[derive(Clone)]
pub struct MqttTransport {
    shared: Arc<Shared>,
}

impl MqttTransport {
    /// Opens a TLS session authenticated with `access_token` as the
    /// username, subscribes to the gateway's four topic filters, and
    /// spawns the background event-loop task. Returns the handle plus the
    /// bounded inbound-message receiver the main loop polls (spec §4.2).
    pub async fn connect(
        config: &GatewayConfig,
        access_token: &str,
    ) -> Result<(Self, mpsc::Receiver<InboundEnvelope>), MqttError> {
        let mut opts = MqttOptions::new("teg-gateway", config.tb_host.clone(), config.tb_port);
        opts.set_credentials(access_token, "");
        opts.set_keep_alive(Duration::from_secs(30));

        if let Some(ca_path) = &config.thingsboard_ca_cert {
            if let Ok(ca) = std::fs::read(ca_path) {
                opts.set_transport(Transport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                }));
            }
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 100);

        for filter in topics::SUBSCRIBE_FILTERS {
            client.subscribe(filter, QoS::AtLeastOnce).await?;
        }

        let (first_connect_tx, first_connect_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            client,
            pending_acks: StdMutex::new(VecDeque::new()),
            request_counter: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            network_alive: AtomicBool::new(true),
            first_connect: StdMutex::new(Some(first_connect_tx)),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let task_shared = shared.clone();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(?ack, "mqtt connected");
                        task_shared.connected.store(true, Ordering::SeqCst);
                        if let Some(tx) = task_shared.first_connect.lock().unwrap().take() {
                            let _ = tx.send(());
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match std::str::from_utf8(&publish.payload) {
                            Ok(text) => match serde_json::from_str::<Value>(text) {
                                Ok(payload) => {
                                    let envelope = InboundEnvelope { topic: publish.topic, payload };
                                    if inbound_tx.send(envelope).await.is_err() {
                                        warn!("inbound channel closed, stopping mqtt event loop");
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, topic = %publish.topic, "non-JSON publish payload, dropping"),
                            },
                            Err(e) => warn!(error = %e, topic = %publish.topic, "non-UTF8 publish payload, dropping"),
                        }
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        if let Some(tx) = task_shared.pending_acks.lock().unwrap().pop_front() {
                            let _ = tx.send(());
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        task_shared.connected.store(false, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        task_shared.connected.store(false, Ordering::SeqCst);
                        debug!(error = %e, "mqtt event loop error, awaiting automatic reconnect");
                    }
                }
            }
            task_shared.network_alive.store(false, Ordering::SeqCst);
        });

        // Spec §4.2 requires the boot-time attribute request and sys_info
        // publish to happen "immediately after successful connect" — wait
        // for the first ConnAck (or give up after 10s and let the caller
        // proceed; rumqttc keeps retrying in the background regardless).
        if tokio::time::timeout(CONNECT_TIMEOUT, first_connect_rx).await.is_err() {
            warn!("mqtt did not connect within 10s, proceeding without confirmed connection");
        }

        Ok((Self { shared }, inbound_rx))
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether the background event-loop task is still running. `false`
    /// means the MQTT liveness check in the watchdog loop must fire (spec §4.10 step 3).
    pub fn is_network_task_alive(&self) -> bool {
        self.shared.network_alive.load(Ordering::SeqCst)
    }

    /// Publishes at QoS 1 and waits up to 5s for the broker's PUBACK.
    /// Never propagates failure to the caller as an error — the return
    /// value is the sole signal the forwarding loop uses to decide whether
    /// to retry (spec §4.2).
    pub async fn publish(&self, topic: &str, payload: String) -> bool {
        if !self.is_connected() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        self.shared.pending_acks.lock().unwrap().push_back(tx);

        if let Err(e) = self.shared.client.publish(topic, QoS::AtLeastOnce, false, payload).await {
            warn!(error = %e, topic, "mqtt publish enqueue failed");
            // Publishing is single-writer (spec §5), so the entry we just
            // pushed is guaranteed to be the one at the back — drop it so
            // the FIFO stays aligned with PUBACKs that actually arrive.
            self.shared.pending_acks.lock().unwrap().pop_back();
            return false;
        }

        match tokio::time::timeout(ACK_TIMEOUT, rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(topic, "mqtt publish ack timed out after 5s");
                false
            }
        }
    }

    pub async fn publish_telemetry(&self, body: String) -> bool {
        self.publish(topics::TELEMETRY, body).await
    }

    /// Requests shared attributes by key, using a monotonically increasing
    /// request id as the topic's trailing segment (spec §4.2).
    pub async fn request_attributes(&self, shared_keys: &str) -> bool {
        let id = self.shared.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let body = serde_json::json!({ "sharedKeys": shared_keys }).to_string();
        self.publish(&topics::attributes_request(id), body).await
    }

    pub async fn publish_attribute(&self, body: String) -> bool {
        self.publish(topics::ATTRIBUTES, body).await
    }

    /// Best-effort one-shot `sys_info` client attribute from `/proc/stat`.
    /// Failure here is logged, never fatal (spec §4.2).
    pub async fn publish_sys_info(&self) {
        let data = match std::fs::read_to_string("/proc/stat") {
            Ok(contents) => parse_proc_stat(&contents),
            Err(e) => {
                warn!(error = %e, "failed to read /proc/stat for sys_info attribute");
                serde_json::Map::new()
            }
        };
        let body = serde_json::json!({ "sys_info": data }).to_string();
        let _ = self.publish_attribute(body).await;
    }

    pub async fn disconnect(&self) {
        let _ = self.shared.client.disconnect().await;
    }
}

fn parse_proc_stat(contents: &str) -> serde_json::Map<String, Value> {
    let mut out = serde_json::Map::new();
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        if let Some(key) = parts.next() {
            let fields: Vec<Value> = parts.map(|f| Value::String(f.to_string())).collect();
            out.insert(key.to_string(), Value::Array(fields));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proc_stat_parses_key_to_field_list() {
        let sample = "cpu  1 2 3 4\nintr 5 6\n";
        let parsed = parse_proc_stat(sample);
        assert_eq!(parsed["cpu"], serde_json::json!(["1", "2", "3", "4"]));
        assert_eq!(parsed["intr"], serde_json::json!(["5", "6"]));
    }
}
