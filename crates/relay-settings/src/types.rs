//! Settings sections.

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Admission control.
    pub connections: ConnectionSettings,
    /// Ping/pong probing.
    pub health: HealthSettings,
    /// Retention sweeps.
    pub retention: RetentionSettings,
    /// Outbound channel limits.
    pub transport: TransportSettings,
    /// HTTP/WebSocket listener.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values outside the accepted ranges in [`limits`].
    ///
    /// The ranges keep every derived duration representable, so the
    /// accessors below never overflow on a validated value.
    pub fn validate(&self) -> Result<()> {
        use limits::*;
        check("connections.maxPerTenant", self.connections.max_per_tenant, MAX_PER_TENANT)?;
        check("health.probeIntervalMs", self.health.probe_interval_ms, PROBE_INTERVAL_MS)?;
        check("health.timeoutMultiple", self.health.timeout_multiple, TIMEOUT_MULTIPLE)?;
        check(
            "retention.messageRetentionHours",
            self.retention.message_retention_hours,
            MESSAGE_RETENTION_HOURS,
        )?;
        check(
            "retention.connectionSweepBatch",
            self.retention.connection_sweep_batch,
            SWEEP_BATCH,
        )?;
        check(
            "retention.messageSweepBatch",
            self.retention.message_sweep_batch,
            SWEEP_BATCH,
        )?;
        check(
            "retention.connectionSweepIntervalSecs",
            self.retention.connection_sweep_interval_secs,
            SWEEP_INTERVAL_SECS,
        )?;
        check(
            "retention.messageSweepIntervalSecs",
            self.retention.message_sweep_interval_secs,
            SWEEP_INTERVAL_SECS,
        )?;
        check("transport.outboundBuffer", self.transport.outbound_buffer, OUTBOUND_BUFFER)?;
        check(
            "transport.maxMessageBytes",
            self.transport.max_message_bytes,
            MAX_MESSAGE_BYTES,
        )?;
        check(
            "server.shutdownTimeoutSecs",
            self.server.shutdown_timeout_secs,
            SHUTDOWN_TIMEOUT_SECS,
        )
    }
}

fn check<T>(name: &str, value: T, range: RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{name} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

/// Accepted ranges, shared by [`RelaySettings::validate`] and the `RELAY_*` overrides.
pub mod limits {
    use std::ops::RangeInclusive;

    /// `connections.maxPerTenant`.
    pub const MAX_PER_TENANT: RangeInclusive<usize> = 1..=100_000;
    /// `health.probeIntervalMs`: 100ms to one hour.
    pub const PROBE_INTERVAL_MS: RangeInclusive<u64> = 100..=3_600_000;
    /// `health.timeoutMultiple`.
    pub const TIMEOUT_MULTIPLE: RangeInclusive<u32> = 1..=100;
    /// `retention.messageRetentionHours`: up to one year.
    pub const MESSAGE_RETENTION_HOURS: RangeInclusive<u64> = 1..=24 * 365;
    /// Both sweep batch sizes.
    pub const SWEEP_BATCH: RangeInclusive<usize> = 1..=10_000;
    /// Both sweep scheduler periods: up to one week.
    pub const SWEEP_INTERVAL_SECS: RangeInclusive<u64> = 1..=7 * 24 * 3600;
    /// `transport.outboundBuffer`.
    pub const OUTBOUND_BUFFER: RangeInclusive<usize> = 1..=1_000_000;
    /// `transport.maxMessageBytes`: up to 64 MiB.
    pub const MAX_MESSAGE_BYTES: RangeInclusive<usize> = 1..=64 * 1024 * 1024;
    /// `server.shutdownTimeoutSecs`.
    pub const SHUTDOWN_TIMEOUT_SECS: RangeInclusive<u64> = 0..=3600;
}

/// Admission control.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Maximum simultaneously live connections per tenant.
    pub max_per_tenant: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self { max_per_tenant: 50 }
    }
}

/// Ping/pong probing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthSettings {
    /// Interval between pings, in milliseconds.
    pub probe_interval_ms: u64,
    /// A connection is dead once `timeout_multiple × probe interval` passes without a pong.
    pub timeout_multiple: u32,
}

impl HealthSettings {
    /// Interval between pings.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    /// Silence after which a connection is declared dead.
    pub fn timeout(&self) -> Duration {
        self.probe_interval()
            .checked_mul(self.timeout_multiple)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            probe_interval_ms: 30_000,
            timeout_multiple: 2,
        }
    }
}

/// Retention sweeps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetentionSettings {
    /// How long message-log entries are kept.
    pub message_retention_hours: u64,
    /// Records examined per connection-sweep batch.
    pub connection_sweep_batch: usize,
    /// Entries deleted per message-sweep batch.
    pub message_sweep_batch: usize,
    /// Period of the built-in connection sweep scheduler, in seconds.
    pub connection_sweep_interval_secs: u64,
    /// Period of the built-in message sweep scheduler, in seconds.
    pub message_sweep_interval_secs: u64,
}

impl RetentionSettings {
    /// Message-log retention window.
    pub fn message_retention(&self) -> Duration {
        Duration::from_secs(self.message_retention_hours.saturating_mul(3600))
    }

    /// Connection sweep period.
    pub fn connection_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.connection_sweep_interval_secs.max(1))
    }

    /// Message sweep period.
    pub fn message_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.message_sweep_interval_secs.max(1))
    }
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            message_retention_hours: 24,
            connection_sweep_batch: 50,
            message_sweep_batch: 100,
            connection_sweep_interval_secs: 300,
            message_sweep_interval_secs: 3600,
        }
    }
}

/// Outbound channel limits for transports created by the gateway.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Queued outbound frames per connection before sends fail with "full".
    pub outbound_buffer: usize,
    /// Largest serialized message accepted for delivery, in bytes.
    pub max_message_bytes: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            max_message_bytes: 1024 * 1024,
        }
    }
}

/// HTTP/WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 for auto-assign).
    pub port: u16,
    /// Seconds to wait for background tasks during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8090,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit newline-delimited JSON instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
