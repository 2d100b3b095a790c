//! Live (in-memory) connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use relay_core::{
    ConnectionMeta, ConnectionRecord, ConnectionStatus, Subscription, SubscriptionId,
};
use tokio::time::Instant;

use crate::transport::{Transport, TransportError};

/// Probe bookkeeping. Monotonic instants drive the scheduler; the wall-clock
/// string is what gets reported and persisted.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HealthClock {
    pub(crate) last_ack: Instant,
    pub(crate) next_ping: Instant,
}

/// A registered, routable connection.
pub struct LiveConnection {
    /// Caller-supplied unique ID.
    pub id: String,
    /// Owning principal.
    pub user_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Diagnostics captured at registration.
    pub meta: ConnectionMeta,
    /// Registration time (RFC 3339).
    pub connected_at: String,
    transport: Arc<dyn Transport>,
    subscriptions: RwLock<Vec<Subscription>>,
    message_count: AtomicU64,
    last_message_at: Mutex<Option<String>>,
    last_health_at: Mutex<String>,
    clock: Mutex<HealthClock>,
}

impl LiveConnection {
    pub(crate) fn new(
        record: ConnectionRecord,
        transport: Arc<dyn Transport>,
        probe_interval: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: record.connection_id,
            user_id: record.user_id,
            tenant_id: record.tenant_id,
            meta: record.meta,
            connected_at: record.connected_at,
            transport,
            subscriptions: RwLock::new(record.subscriptions),
            message_count: AtomicU64::new(record.message_count),
            last_message_at: Mutex::new(record.last_message_at),
            last_health_at: Mutex::new(record.last_health_at),
            clock: Mutex::new(HealthClock {
                last_ack: now,
                next_ping: now + probe_interval,
            }),
        }
    }

    /// The transport handle.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Write a frame if the transport is open.
    pub fn write(&self, frame: Arc<String>) -> Result<(), TransportError> {
        if !self.transport.is_open() {
            return Err(TransportError::Closed);
        }
        self.transport.send(frame)
    }

    /// Snapshot of the current subscriptions.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.read().clone()
    }

    /// Run `f` against the subscription list under the read lock.
    pub fn with_subscriptions<R>(&self, f: impl FnOnce(&[Subscription]) -> R) -> R {
        f(&self.subscriptions.read())
    }

    /// Append a subscription, returning the full list after the change.
    pub(crate) fn push_subscription(&self, subscription: Subscription) -> Vec<Subscription> {
        let mut subs = self.subscriptions.write();
        subs.push(subscription);
        subs.clone()
    }

    /// Remove a subscription. Returns the list after the change if anything was removed.
    pub(crate) fn drop_subscription(&self, id: &SubscriptionId) -> Option<Vec<Subscription>> {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| &s.id != id);
        (subs.len() != before).then(|| subs.clone())
    }

    /// Messages sent so far.
    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Relaxed)
    }

    /// Time of the last outbound message.
    pub fn last_message_at(&self) -> Option<String> {
        self.last_message_at.lock().clone()
    }

    pub(crate) fn record_sent(&self, at: String) {
        let _ = self.message_count.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.lock() = Some(at);
    }

    /// Last health acknowledgement (RFC 3339).
    pub fn last_health_at(&self) -> String {
        self.last_health_at.lock().clone()
    }

    pub(crate) fn clock(&self) -> HealthClock {
        *self.clock.lock()
    }

    pub(crate) fn record_ack(&self, now: Instant, at: String) {
        self.clock.lock().last_ack = now;
        *self.last_health_at.lock() = at;
    }

    pub(crate) fn schedule_ping(&self, at: Instant) {
        self.clock.lock().next_ping = at;
    }

    /// Point-in-time copy in the durable record shape.
    pub fn snapshot(&self) -> ConnectionRecord {
        ConnectionRecord {
            connection_id: self.id.clone(),
            user_id: self.user_id.clone(),
            tenant_id: self.tenant_id.clone(),
            status: ConnectionStatus::Connected,
            connected_at: self.connected_at.clone(),
            last_health_at: self.last_health_at(),
            last_message_at: self.last_message_at(),
            message_count: self.message_count(),
            meta: self.meta.clone(),
            subscriptions: self.subscriptions(),
        }
    }
}

impl std::fmt::Debug for LiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConnection")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .field("open", &self.transport.is_open())
            .finish_non_exhaustive()
    }
}
