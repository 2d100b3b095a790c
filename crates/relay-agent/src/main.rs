//! # relay-agent
//!
//! Relay server binary: loads settings, opens the `SQLite` record store,
//! builds the hub, and serves the gateway until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relay_hub::Hub;
use relay_server::RelayServer;
use relay_settings::RelaySettings;
use relay_store::SqliteRecordStore;
use relay_store::sqlite::ConnectionConfig;

/// Relay real-time connection server.
#[derive(Parser, Debug)]
#[command(name = "relay-agent", about = "Relay real-time connection server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Settings file (defaults to `~/.relay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn default_db_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home)
            .join(".relay")
            .join("database")
            .join("relay.db")
    }

    /// Load settings and apply command-line overrides on top.
    fn settings(&self) -> Result<RelaySettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(relay_settings::settings_path);
        let mut settings = relay_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
        Ok(settings)
    }

    fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(Self::default_db_path)
    }
}

fn init_logging(settings: &RelaySettings) {
    if settings.logging.json {
        relay_core::logging::init_json_subscriber(&settings.logging.level);
    } else {
        relay_core::logging::init_subscriber(&settings.logging.level);
    }
}

fn open_store(path: &Path) -> Result<SqliteRecordStore> {
    SqliteRecordStore::open(path, &ConnectionConfig::default())
        .with_context(|| format!("Failed to open database: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.settings()?;
    init_logging(&settings);

    let db_path = args.db_path();
    let store = Arc::new(open_store(&db_path)?);
    tracing::info!(path = %db_path.display(), "record store ready");

    let metrics = relay_server::metrics::install_recorder()?;
    let hub = Arc::new(Hub::new(store, &settings));
    hub.start();

    let grace = Duration::from_secs(settings.server.shutdown_timeout_secs);
    let server = RelayServer::new(Arc::clone(&hub), settings, metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Relay listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    hub.shutdown().await;
    if tokio::time::timeout(grace, handle).await.is_err() {
        tracing::warn!("server did not stop within the shutdown timeout");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_untouched() {
        let cli = Cli::parse_from(["relay-agent", "--config", "/nonexistent/settings.json"]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert!(!settings.logging.json);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "relay-agent",
            "--config",
            "/nonexistent/settings.json",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        let settings = cli.settings().unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn config_file_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"connections":{"maxPerTenant":3}}"#).unwrap();
        let cli = Cli::parse_from(["relay-agent", "--config", path.to_str().unwrap()]);
        assert_eq!(cli.settings().unwrap().connections.max_per_tenant, 3);
    }

    #[test]
    fn default_db_path_under_home() {
        let cli = Cli::parse_from(["relay-agent"]);
        assert!(cli.db_path().ends_with(".relay/database/relay.db"));
    }

    #[test]
    fn server_creates_db_on_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("relay.db");
        assert!(!db_path.exists());
        let _store = open_store(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn boots_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = RelaySettings::default();
        settings.server.port = 0;
        let store = Arc::new(open_store(&dir.path().join("relay.db")).unwrap());
        let hub = Arc::new(Hub::new(store, &settings));
        hub.start();
        let server = RelayServer::new(
            Arc::clone(&hub),
            settings,
            relay_server::metrics::detached_handle(),
        );
        let (addr, handle) = server.listen().await.unwrap();
        assert!(addr.port() > 0);

        hub.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .unwrap();
    }
}
