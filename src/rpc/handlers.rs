//! Individual RPC method implementations (spec §4.9). Each takes the raw
//! `params` value and returns the inner `message` value the router wraps
//! as `{message: <value>}`.

use crate::context::GatewayContext;
use crate::mqtt::topics;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn ok(message: impl Into<String>) -> Value {
    Value::String(format!("OK - {}", message.into()))
}

fn error(message: impl Into<String>) -> Value {
    Value::String(format!("Error - {}", message.into()))
}

pub fn ping() -> Value {
    Value::String("Pong".to_string())
}

/// Sleeps 3s then invokes the host command, mirroring the original's
/// "reply first, act second" ordering — `reboot`/`shutdown`/host process
/// control are explicitly out of this crate's scope beyond issuing the
/// command (spec §1 Non-goals).
fn schedule_host_command(command: &'static str, args: &'static [&'static str]) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        if let Err(e) = std::process::Command::new(command).args(args).spawn() {
            warn!(command, error = %e, "failed to invoke host command");
        }
    });
}

pub fn reboot() -> Value {
    schedule_host_command("reboot", &[]);
    ok("rebooting")
}

pub fn shutdown() -> Value {
    schedule_host_command("poweroff", &[]);
    ok("shutting down")
}

/// Raises SIGTERM against the gateway's own process after a 3s delay, so
/// the existing signal-driven graceful shutdown path in `main.rs` handles
/// it exactly like an externally sent SIGTERM.
pub fn exit() -> Value {
    let pid = std::process::id().to_string();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let _ = std::process::Command::new("kill").arg("-TERM").arg(&pid).spawn();
    });
    ok("exiting")
}

pub async fn restart_controller(ctx: &Arc<GatewayContext>) -> Value {
    let last_launched = ctx.last_launched_path();
    let _ = ctx.container.stop(&last_launched).await;
    ctx.watchdog.force_restart();
    ok("controller will restart on the next watchdog iteration")
}

pub async fn init_files(ctx: &Arc<GatewayContext>) -> Value {
    ctx.mqtt.publish_attribute(json!({ "FILE_HASHES": {} }).to_string()).await;
    ctx.mqtt.request_attributes("FILES").await;
    ok("file reconciliation requested")
}

pub async fn run_command(params: &Value) -> Value {
    let Some(command) = params.get("command").and_then(Value::as_array) else {
        return error("\"command\" must be an array of strings");
    };
    let args: Option<Vec<String>> = command.iter().map(|v| v.as_str().map(str::to_string)).collect();
    let Some(args) = args else {
        return error("\"command\" entries must all be strings");
    };
    let Some((program, rest)) = args.split_first() else {
        return error("\"command\" must not be empty");
    };
    let timeout_s = params.get("timeout_s").and_then(Value::as_u64).unwrap_or(30);

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(rest).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return error(format!("failed to spawn command: {e}")),
    };

    match tokio::time::timeout(Duration::from_secs(timeout_s), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            );
            json!({ "exit_code": output.status.code(), "output": combined })
        }
        Ok(Err(e)) => error(format!("command failed: {e}")),
        Err(_) => error(format!("command timed out after {timeout_s}s")),
    }
}

/// Lower bound is 2025-01-01T00:00:00Z in ms, upper bound is
/// 2050-01-01T00:00:00Z in ms — sanity bounds on RPC-supplied timestamp
/// ranges (spec §4.9).
const MIN_TIMESTAMP_MS: i64 = 1_735_719_469_000;
const MAX_TIMESTAMP_MS: i64 = 2_524_637_869_000;

fn validate_range(params: &Value) -> Result<(i64, i64), String> {
    let start = params.get("start_timestamp_ms").and_then(Value::as_i64);
    let end = params.get("end_timestamp_ms").and_then(Value::as_i64);
    let (Some(start), Some(end)) = (start, end) else {
        return Err("start_timestamp_ms and end_timestamp_ms must both be integers".to_string());
    };
    if start <= MIN_TIMESTAMP_MS {
        return Err("start_timestamp_ms is out of the accepted range".to_string());
    }
    if end >= MAX_TIMESTAMP_MS {
        return Err("end_timestamp_ms is out of the accepted range".to_string());
    }
    if start >= end {
        return Err("start_timestamp_ms must be less than end_timestamp_ms".to_string());
    }
    Ok((start, end))
}

pub async fn archive_republish_messages(ctx: &Arc<GatewayContext>, params: &Value) -> Value {
    let (start, end) = match validate_range(params) {
        Ok(range) => range,
        Err(e) => return error(e),
    };

    let mut offset = 0i64;
    let mut published = 0u64;
    loop {
        let batch = match ctx.archive.batch_in_range(start, end, offset) {
            Ok(batch) => batch,
            Err(e) => return error(format!("archive read failed: {e}")),
        };
        let batch_len = batch.len();
        for row in &batch {
            if ctx.mqtt.publish(topics::TELEMETRY, row.message.clone()).await {
                published += 1;
            }
        }
        if batch_len < 200 {
            break;
        }
        offset += batch_len as i64;
    }
    info!(start, end, published, "republished archived messages");
    ok(format!("republished {published} messages"))
}

pub async fn archive_discard_messages(ctx: &Arc<GatewayContext>, params: &Value) -> Value {
    let (start, end) = match validate_range(params) {
        Ok(range) => range,
        Err(e) => return error(e),
    };
    match ctx.archive.discard_range(start, end) {
        Ok(()) => ok("discarded messages in range"),
        Err(e) => error(format!("archive discard failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_timestamp_outside_accepted_range() {
        let params = json!({"start_timestamp_ms": 0, "end_timestamp_ms": MAX_TIMESTAMP_MS - 1});
        assert!(validate_range(&params).is_err());
    }

    #[test]
    fn rejects_inverted_range() {
        let params = json!({"start_timestamp_ms": MIN_TIMESTAMP_MS + 2, "end_timestamp_ms": MIN_TIMESTAMP_MS + 1});
        assert!(validate_range(&params).is_err());
    }

    #[test]
    fn accepts_well_formed_range() {
        let params =
            json!({"start_timestamp_ms": MIN_TIMESTAMP_MS + 1, "end_timestamp_ms": MAX_TIMESTAMP_MS - 1});
        assert_eq!(validate_range(&params).unwrap(), (MIN_TIMESTAMP_MS + 1, MAX_TIMESTAMP_MS - 1));
    }
}
