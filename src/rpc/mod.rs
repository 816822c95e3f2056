//! # RPC Handler Set (C10)
//!
//! ## Why This Module Exists
//! Operators issue one-off commands (reboot the host, replay archived
//! telemetry, force a controller restart) through the same MQTT session
//! everything else uses. This module is the fixed registry the router
//! (C9) dispatches into (spec §4.9).
//!
//! ## Design Rationale
//! The registry is a `match` over a fixed method-name list rather than a
//! `HashMap` of boxed closures: the method set is closed and known at
//! compile time, and a `match` keeps each handler's signature exact
//! instead of forcing a uniform `dyn Fn` shape onto handlers with very
//! different parameter needs.

mod handlers;

use crate::context::GatewayContext;
use serde_json::Value;
use std::sync::Arc;

struct MethodInfo {
    name: &'static str,
    description: &'static str,
}

const METHODS: &[MethodInfo] = &[
    MethodInfo { name: "ping", description: "replies with \"Pong\"" },
    MethodInfo { name: "reboot", description: "reboots the host after a 3s delay" },
    MethodInfo { name: "shutdown", description: "powers off the host after a 3s delay" },
    MethodInfo { name: "exit", description: "gracefully exits the gateway process" },
    MethodInfo { name: "restart_controller", description: "stops the controller and forces a watchdog restart" },
    MethodInfo { name: "init_files", description: "clears the hash mirror and re-requests the file definition set" },
    MethodInfo { name: "run_command", description: "runs a host command with a timeout" },
    MethodInfo { name: "archive_republish_messages", description: "republishes archived telemetry in a time range" },
    MethodInfo { name: "archive_discard_messages", description: "deletes archived telemetry in a time range" },
    MethodInfo { name: "list", description: "lists the available RPC methods" },
];

pub struct RpcRegistry {
    ctx: Arc<GatewayContext>,
}

impl RpcRegistry {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        Self { ctx }
    }

    /// Executes `method` with `params`, returning the inner `message`
    /// value the router wraps as `{message: <value>}` (spec §4.9).
    pub async fn execute(&self, method: &str, params: Value) -> Value {
        match method {
            "ping" => handlers::ping(),
            "reboot" => handlers::reboot(),
            "shutdown" => handlers::shutdown(),
            "exit" => handlers::exit(),
            "restart_controller" => handlers::restart_controller(&self.ctx).await,
            "init_files" => handlers::init_files(&self.ctx).await,
            "run_command" => handlers::run_command(&params).await,
            "archive_republish_messages" => handlers::archive_republish_messages(&self.ctx, &params).await,
            "archive_discard_messages" => handlers::archive_discard_messages(&self.ctx, &params).await,
            "list" => Value::Array(
                METHODS
                    .iter()
                    .map(|m| Value::String(format!("{}: {}", m.name, m.description)))
                    .collect(),
            ),
            other => Value::String(format!("Error - unknown method {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_method_name_is_unique() {
        let mut names: Vec<&str> = METHODS.iter().map(|m| m.name).collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
