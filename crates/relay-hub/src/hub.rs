//! Composition root.
//!
//! A [`Hub`] is built explicitly from a record store and settings, and its
//! background loops run only between [`Hub::start`] and [`Hub::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    ConnectionMeta, ConnectionRecord, DomainEvent, Notification, OutboundMessage, RecordStore,
    SubscriptionFilters, SubscriptionId, SubscriptionType,
};
use relay_settings::RelaySettings;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::LiveConnection;
use crate::dispatcher::Dispatcher;
use crate::errors::Result;
use crate::health::HealthMonitor;
use crate::registry::{Registry, RegistryConfig};
use crate::shutdown::ShutdownCoordinator;
use crate::sweeper::{SweepReport, Sweeper};
use crate::transport::Transport;

/// Registry, dispatcher, health monitor, and sweeper wired together.
pub struct Hub {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    health: Arc<HealthMonitor>,
    sweeper: Arc<Sweeper>,
    lifecycle: ShutdownCoordinator,
    connection_sweep_every: Duration,
    message_sweep_every: Duration,
}

impl Hub {
    /// Build a hub over `store`. Nothing runs until [`Hub::start`].
    pub fn new(store: Arc<dyn RecordStore>, settings: &RelaySettings) -> Self {
        let registry = Arc::new(Registry::new(
            store,
            RegistryConfig {
                max_per_tenant: settings.connections.max_per_tenant,
                probe_interval: settings.health.probe_interval(),
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            settings.transport.max_message_bytes,
        ));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            &settings.health,
        ));
        let sweeper = Arc::new(Sweeper::new(Arc::clone(&registry), settings));
        Self {
            registry,
            dispatcher,
            health,
            sweeper,
            lifecycle: ShutdownCoordinator::new(Duration::from_secs(
                settings.server.shutdown_timeout_secs,
            )),
            connection_sweep_every: settings.retention.connection_sweep_interval(),
            message_sweep_every: settings.retention.message_sweep_interval(),
        }
    }

    /// Spawn the health scheduler and both sweep loops. Calling twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.lifecycle.task_count() > 0 || self.lifecycle.is_shutting_down() {
            return;
        }

        let health = Arc::clone(&self.health);
        self.lifecycle
            .spawn("health", move |cancel| health.run(cancel));

        let hub = Arc::clone(self);
        let every = self.connection_sweep_every;
        self.lifecycle.spawn("connection-sweep", move |cancel| {
            periodic(every, cancel, move |cancel| {
                let hub = Arc::clone(&hub);
                async move {
                    let _ = hub.flush_stats().await;
                    let _ = hub.sweeper.sweep_connections(&cancel).await;
                }
            })
        });

        let sweeper = Arc::clone(&self.sweeper);
        let every = self.message_sweep_every;
        self.lifecycle.spawn("message-sweep", move |cancel| {
            periodic(every, cancel, move |cancel| {
                let sweeper = Arc::clone(&sweeper);
                async move {
                    let _ = sweeper.sweep_messages(&cancel).await;
                }
            })
        });

        info!("hub started");
    }

    /// Stop background loops, then unregister every live connection
    /// (which flushes its counters and marks it disconnected).
    pub async fn shutdown(&self) {
        let clean = self.lifecycle.shutdown().await;
        let live = self.registry.all();
        let count = live.len();
        for conn in live {
            let _ = self.registry.unregister(&conn.id).await;
        }
        info!(clean, closed = count, "hub stopped");
    }

    /// A token cancelled once shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.lifecycle.token()
    }

    /// The registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    // ── surfaced operations ─────────────────────────────────────────────────

    /// See [`Registry::register`].
    pub async fn register(
        &self,
        connection_id: &str,
        user_id: &str,
        tenant_id: &str,
        transport: Arc<dyn Transport>,
        meta: ConnectionMeta,
    ) -> Result<Arc<LiveConnection>> {
        self.registry
            .register(connection_id, user_id, tenant_id, transport, meta)
            .await
    }

    /// See [`Registry::unregister`].
    pub async fn unregister(&self, connection_id: &str) -> bool {
        self.registry.unregister(connection_id).await
    }

    /// See [`Registry::add_subscription`].
    pub async fn add_subscription(
        &self,
        connection_id: &str,
        subscription_type: SubscriptionType,
        filters: SubscriptionFilters,
    ) -> Result<SubscriptionId> {
        self.registry
            .add_subscription(connection_id, subscription_type, filters)
            .await
    }

    /// See [`Registry::remove_subscription`].
    pub async fn remove_subscription(
        &self,
        connection_id: &str,
        subscription_id: &SubscriptionId,
    ) -> bool {
        self.registry
            .remove_subscription(connection_id, subscription_id)
            .await
    }

    /// See [`Dispatcher::send`].
    pub async fn send(&self, connection_id: &str, message: &OutboundMessage) -> bool {
        self.dispatcher.send(connection_id, message).await
    }

    /// See [`Dispatcher::broadcast`].
    pub async fn broadcast(&self, event: DomainEvent) -> usize {
        self.dispatcher.broadcast(event).await
    }

    /// See [`Dispatcher::notify`].
    pub async fn notify(&self, tenant_id: &str, notification: Notification) -> usize {
        self.dispatcher.notify(tenant_id, notification).await
    }

    /// See [`HealthMonitor::handle_pong`].
    pub async fn handle_pong(&self, connection_id: &str) -> bool {
        self.health.handle_pong(connection_id).await
    }

    /// See [`Registry::connections_for_tenant`].
    pub fn connections_for_tenant(&self, tenant_id: &str) -> Vec<ConnectionRecord> {
        self.registry.connections_for_tenant(tenant_id)
    }

    /// Run one connection sweep now.
    pub async fn sweep_connections(&self) -> SweepReport {
        self.sweeper
            .sweep_connections(&self.lifecycle.token())
            .await
    }

    /// Run one message-log sweep now.
    pub async fn sweep_messages(&self) -> SweepReport {
        self.sweeper.sweep_messages(&self.lifecycle.token()).await
    }

    /// Persist in-memory message counters of every live connection.
    ///
    /// Returns how many records were updated.
    pub async fn flush_stats(&self) -> usize {
        let store = self.registry.store();
        let mut flushed = 0;
        for conn in self.registry.all() {
            let last = conn.last_message_at();
            match store
                .record_stats(&conn.id, conn.message_count(), last.as_deref())
                .await
            {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(e) => warn!(conn_id = %conn.id, error = %e, "failed to flush connection stats"),
            }
        }
        flushed
    }
}

/// Call `run` every `every` until cancelled. The first run happens one period in.
async fn periodic<F, Fut>(every: Duration, cancel: CancellationToken, mut run: F)
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => run(cancel.clone()).await,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use relay_core::{ConnectionStatus, MemoryRecordStore, MessageLogEntry, timestamp};

    fn hub_with(store: Arc<MemoryRecordStore>, settings: RelaySettings) -> Arc<Hub> {
        Arc::new(Hub::new(store, &settings))
    }

    async fn connect(hub: &Hub, id: &str) -> tokio::sync::mpsc::Receiver<Arc<String>> {
        let (transport, rx) = ChannelTransport::new(64);
        hub.register(id, "u1", "t1", Arc::new(transport), ConnectionMeta::default())
            .await
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn flush_stats_persists_counters() {
        let store = Arc::new(MemoryRecordStore::new());
        let hub = hub_with(store.clone(), RelaySettings::default());
        let _rx = connect(&hub, "c1").await;
        hub.send("c1", &OutboundMessage::ping()).await;
        hub.send("c1", &OutboundMessage::ping()).await;

        assert_eq!(
            store.get_connection("c1").await.unwrap().unwrap().message_count,
            0
        );
        assert_eq!(hub.flush_stats().await, 1);
        let rec = store.get_connection("c1").await.unwrap().unwrap();
        assert_eq!(rec.message_count, 2);
        assert!(rec.last_message_at.is_some());
    }

    #[tokio::test]
    async fn shutdown_unregisters_everything() {
        let store = Arc::new(MemoryRecordStore::new());
        let hub = hub_with(store.clone(), RelaySettings::default());
        hub.start();
        let _rx1 = connect(&hub, "c1").await;
        let _rx2 = connect(&hub, "c2").await;

        hub.shutdown().await;
        assert!(hub.registry().is_empty());
        assert!(hub.shutdown_token().is_cancelled());
        for id in ["c1", "c2"] {
            let rec = store.get_connection(id).await.unwrap().unwrap();
            assert_eq!(rec.status, ConnectionStatus::Disconnected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_message_sweep_runs() {
        let store = Arc::new(MemoryRecordStore::new());
        let mut settings = RelaySettings::default();
        settings.retention.message_sweep_interval_secs = 60;
        let hub = hub_with(store.clone(), settings);

        let mut entry =
            MessageLogEntry::for_message("t1", "c1", "u1", &OutboundMessage::ping()).unwrap();
        entry.created_at = timestamp(chrono::Utc::now() - chrono::Duration::hours(48));
        store.insert_message(entry);

        hub.start();
        hub.start();
        tokio::time::sleep(Duration::from_secs(61)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.message_count(), 0);
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn manual_sweeps_are_available() {
        let store = Arc::new(MemoryRecordStore::new());
        let hub = hub_with(store, RelaySettings::default());
        assert_eq!(hub.sweep_connections().await, SweepReport::default());
        assert_eq!(hub.sweep_messages().await, SweepReport::default());
    }
}
