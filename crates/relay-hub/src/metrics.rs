//! Metric names recorded by the hub.
//!
//! The server installs the Prometheus recorder; without one these are no-ops.

/// Successful registrations (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Live connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Refused registrations (counter, labels: reason).
pub const REGISTRATIONS_REJECTED_TOTAL: &str = "relay_registrations_rejected_total";
/// Messages handed to transports (counter, labels: kind).
pub const MESSAGES_SENT_TOTAL: &str = "relay_messages_sent_total";
/// Transport write failures (counter, labels: reason).
pub const TRANSPORT_FAILURES_TOTAL: &str = "relay_transport_failures_total";
/// Connections removed for missing pongs (counter).
pub const HEALTH_TIMEOUTS_TOTAL: &str = "relay_health_timeouts_total";
/// Stale connection records reaped (counter).
pub const SWEEP_CONNECTIONS_TOTAL: &str = "relay_sweep_connections_total";
/// Expired message-log entries purged (counter).
pub const SWEEP_MESSAGES_TOTAL: &str = "relay_sweep_messages_total";
