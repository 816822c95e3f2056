//! # Provisioning Gate (C5)
//!
//! ## Why This Module Exists
//! The gateway has exactly one secret: its access token. On first boot
//! there isn't one yet, so this module runs a short-lived, separate MQTT
//! session to exchange device credentials for a token before the real
//! session (C3) ever connects (spec §4.4).
//!
//! ## Design Rationale
//! Provisioning is boot-critical (spec §7): any failure here is a "Boot
//! fatal" error, so every fallible step returns `Result` and the caller in
//! `main.rs` routes failure straight to [`crate::error::fatal_error`].
//! The device-self-provisioning exchange itself is explicitly out of scope
//! (spec §1) — this module only consumes the opaque token it yields.

use crate::config::GatewayConfig;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("token file could not be read or written: {0}")]
    Io(#[from] std::io::Error),
    #[error("provisioning device key/secret/name not configured")]
    MissingCredentials,
    #[error("mqtt error during provisioning: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    #[error("no provisioning response received within the timeout")]
    Timeout,
    #[error("provisioning response did not grant an access token: {0}")]
    Rejected(String),
}

/// Result of the provisioning gate: either an existing token was found, or
/// a fresh one was obtained and persisted.
pub struct ProvisioningResult {
    pub access_token: String,
    pub provisioned: bool,
}

#[derive(Deserialize)]
struct ProvisionResponse {
    status: Option<String>,
    #[serde(rename = "credentialsType")]
    credentials_type: Option<String>,
    #[serde(rename = "credentialsValue")]
    credentials_value: Option<String>,
}

/// Minimum token length for an on-disk token file to be considered valid
/// (spec §4.4: "≥4 chars").
const MIN_TOKEN_LEN: usize = 4;
const PROVISION_TIMEOUT: Duration = Duration::from_secs(10);

/// Returns the existing token if the token file holds a plausible one,
/// otherwise runs the one-shot provisioning exchange and persists the
/// result.
pub async fn obtain_access_token(config: &GatewayConfig) -> Result<ProvisioningResult, ProvisioningError> {
    if let Ok(existing) = std::fs::read_to_string(&config.access_token_path) {
        let trimmed = existing.trim();
        if trimmed.len() >= MIN_TOKEN_LEN {
            return Ok(ProvisioningResult { access_token: trimmed.to_string(), provisioned: false });
        }
    }

    info!("no usable access token on disk, starting provisioning exchange");
    let token = run_provisioning_exchange(config).await?;

    if let Some(parent) = config.access_token_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&config.access_token_path, &token)?;

    Ok(ProvisioningResult { access_token: token, provisioned: true })
}

async fn run_provisioning_exchange(config: &GatewayConfig) -> Result<String, ProvisioningError> {
    let device_name = config.device_name.as_deref().ok_or(ProvisioningError::MissingCredentials)?;
    let device_key = config.provision_device_key.as_deref().ok_or(ProvisioningError::MissingCredentials)?;
    let device_secret =
        config.provision_device_secret.as_deref().ok_or(ProvisioningError::MissingCredentials)?;

    let mut opts = MqttOptions::new("teg-gateway-provision", config.tb_host.clone(), config.tb_port);
    opts.set_credentials("provision", "");
    opts.set_keep_alive(Duration::from_secs(5));

    let (client, mut eventloop) = AsyncClient::new(opts, 10);
    client
        .subscribe(crate::mqtt::topics::provision_response(), QoS::AtLeastOnce)
        .await?;

    let request = json!({
        "deviceName": device_name,
        "provisionDeviceKey": device_key,
        "provisionDeviceSecret": device_secret,
    });
    client
        .publish(
            crate::mqtt::topics::provision_request(),
            QoS::AtLeastOnce,
            false,
            request.to_string(),
        )
        .await?;

    let deadline = tokio::time::Instant::now() + PROVISION_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(ProvisioningError::Timeout);
        }
        let event = match tokio::time::timeout(remaining, eventloop.poll()).await {
            Ok(Ok(event)) => event,
            Ok(Err(_)) => continue,
            Err(_) => return Err(ProvisioningError::Timeout),
        };

        if let Event::Incoming(Packet::Publish(publish)) = event {
            let response: ProvisionResponse = match serde_json::from_slice(&publish.payload) {
                Ok(r) => r,
                Err(e) => {
                    error!(error = %e, "malformed provisioning response");
                    continue;
                }
            };
            if response.status.as_deref() == Some("SUCCESS")
                && response.credentials_type.as_deref() == Some("ACCESS_TOKEN")
            {
                if let Some(token) = response.credentials_value {
                    return Ok(token);
                }
            }
            return Err(ProvisioningError::Rejected(
                response.status.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shorter_than_minimum_is_considered_absent() {
        assert!("abc".len() < MIN_TOKEN_LEN);
        assert!("tok_".len() >= MIN_TOKEN_LEN);
    }
}
