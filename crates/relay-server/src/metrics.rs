//! Prometheus recorder and gateway metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the global Prometheus recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a private recorder, for tests and embedding.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// WebSocket sessions opened (counter).
pub const WS_SESSIONS_TOTAL: &str = "relay_ws_sessions_total";
/// WebSocket upgrades refused at registration (counter, labels: reason).
pub const WS_SESSIONS_REFUSED_TOTAL: &str = "relay_ws_sessions_refused_total";
/// Inbound client commands (counter, labels: command).
pub const WS_COMMANDS_TOTAL: &str = "relay_ws_commands_total";
/// Inbound frames that failed to parse (counter).
pub const WS_INVALID_COMMANDS_TOTAL: &str = "relay_ws_invalid_commands_total";
