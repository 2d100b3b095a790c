//! Retention sweeps over the record store.
//!
//! Both sweeps work in bounded batches, check the cancellation token between
//! batches, and stop early on the first store error. Neither holds a registry
//! lock across a store call, so they run safely alongside live traffic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use relay_core::RecordStore;
use relay_settings::RelaySettings;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{SWEEP_CONNECTIONS_TOTAL, SWEEP_MESSAGES_TOTAL};
use crate::registry::Registry;

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Batches fetched from the store.
    pub batches: usize,
    /// Records marked disconnected or entries deleted.
    pub removed: usize,
    /// Stale durable records whose live connection was still healthy and got
    /// its durable health refreshed instead.
    pub refreshed: usize,
    /// Stopped by the cancellation token.
    pub cancelled: bool,
    /// Stopped by a store error.
    pub failed: bool,
}

/// Batched retention sweeps.
pub struct Sweeper {
    registry: Arc<Registry>,
    store: Arc<dyn RecordStore>,
    connection_ttl: Duration,
    message_retention: Duration,
    connection_batch: usize,
    message_batch: usize,
}

impl Sweeper {
    /// Create a sweeper using the health timeout as the connection TTL.
    pub fn new(registry: Arc<Registry>, settings: &RelaySettings) -> Self {
        let store = Arc::clone(registry.store());
        Self {
            registry,
            store,
            connection_ttl: settings.health.timeout(),
            message_retention: settings.retention.message_retention(),
            connection_batch: settings.retention.connection_sweep_batch.max(1),
            message_batch: settings.retention.message_sweep_batch.max(1),
        }
    }

    /// Reap durable records whose `last_health_at` is older than the health timeout.
    ///
    /// Each stale record is marked disconnected and any lingering in-memory
    /// entry is evicted. A live entry that is still answering pings is kept
    /// and its durable health timestamp refreshed.
    pub async fn sweep_connections(&self, cancel: &CancellationToken) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(cutoff) = cutoff_before(self.connection_ttl) else {
            warn!(ttl = ?self.connection_ttl, "connection ttl out of range, skipping sweep");
            return report;
        };

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let batch = match self
                .store
                .stale_connections(cutoff, self.connection_batch)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "connection sweep query failed");
                    report.failed = true;
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            report.batches += 1;

            for record in &batch {
                let id = record.connection_id.as_str();
                if self.is_live_and_healthy(id) {
                    match self.store.touch_health(id).await {
                        Ok(_) => report.refreshed += 1,
                        Err(e) => {
                            warn!(
                                conn_id = id,
                                error = %e,
                                "failed to refresh health of live connection"
                            );
                            report.failed = true;
                        }
                    }
                    continue;
                }
                match self.store.mark_disconnected(id).await {
                    Ok(_) => {
                        report.removed += 1;
                        if self.registry.evict(id).is_some() {
                            debug!(conn_id = id, "evicted lingering connection");
                        }
                    }
                    Err(e) => {
                        warn!(conn_id = id, error = %e, "failed to mark stale connection");
                        report.failed = true;
                    }
                }
            }

            if report.failed || batch.len() < self.connection_batch {
                break;
            }
        }

        counter!(SWEEP_CONNECTIONS_TOTAL).increment(report.removed as u64);
        if report.removed > 0 || report.refreshed > 0 {
            info!(
                removed = report.removed,
                refreshed = report.refreshed,
                batches = report.batches,
                "connection sweep complete"
            );
        }
        report
    }

    /// Delete message-log entries older than the retention window.
    pub async fn sweep_messages(&self, cancel: &CancellationToken) -> SweepReport {
        let mut report = SweepReport::default();
        let Some(cutoff) = cutoff_before(self.message_retention) else {
            warn!(
                retention = ?self.message_retention,
                "message retention out of range, skipping sweep"
            );
            return report;
        };

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let deleted = match self
                .store
                .purge_messages_before(cutoff, self.message_batch)
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "message sweep failed");
                    report.failed = true;
                    break;
                }
            };
            if deleted == 0 {
                break;
            }
            report.batches += 1;
            report.removed += deleted;
            if deleted < self.message_batch {
                break;
            }
        }

        counter!(SWEEP_MESSAGES_TOTAL).increment(report.removed as u64);
        if report.removed > 0 {
            info!(removed = report.removed, batches = report.batches, "message sweep complete");
        }
        report
    }

    fn is_live_and_healthy(&self, connection_id: &str) -> bool {
        self.registry.get(connection_id).is_some_and(|conn| {
            Instant::now().saturating_duration_since(conn.clock().last_ack) < self.connection_ttl
        })
    }
}

/// `now - window`, or `None` when the window does not fit the calendar.
/// Nothing can be older than an unrepresentable cutoff, so callers skip.
fn cutoff_before(window: Duration) -> Option<DateTime<Utc>> {
    let window = chrono::Duration::from_std(window).ok()?;
    Utc::now().checked_sub_signed(window)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
