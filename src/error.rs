//! Fatal-error path and shared error plumbing.
//!
//! The gateway's components never let an error cross the main loop boundary
//! (spec §7): every handler returns to its caller with a typed error or an
//! `Option`, and the only way the process actually terminates is through
//! [`fatal_error`]. This mirrors the Python original's `utils.misc.fatal_error`,
//! which is the single call site that calls `sys.exit`.

use std::time::Duration;
use tracing::error;

/// Logs `message` with stack context, gives in-flight telemetry a grace
/// period to drain, then terminates the process with exit code 1.
///
/// This is the only place in the codebase that exits the process outside of
/// the signal-driven graceful shutdown path in `main.rs`. Boot-fatal errors
/// (failed provisioning, unrecoverable database construction) and the MQTT
/// liveness check in the watchdog loop both route here.
pub async fn fatal_error(message: impl AsRef<str>) -> ! {
    error!(fatal = true, "{}", message.as_ref());
    tokio::time::sleep(Duration::from_secs(20)).await;
    std::process::exit(1);
}
