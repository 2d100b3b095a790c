//! Ping/pong health probing.
//!
//! One scheduler task serves every live connection. Each pass pings the
//! connections whose probe is due and removes those silent for
//! `timeout_multiple × probe_interval`, then sleeps until the earliest
//! pending deadline. Registration wakes it early; a cancellation token
//! stops it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use relay_core::{OutboundMessage, timestamp};
use relay_settings::HealthSettings;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::metrics::HEALTH_TIMEOUTS_TOTAL;
use crate::registry::Registry;

/// What one scheduler pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbePass {
    /// Connections pinged.
    pub pinged: Vec<String>,
    /// Connections removed for silence by this pass.
    pub timed_out: Vec<String>,
    /// When the next pass is needed, if any connection remains.
    pub next_deadline: Option<Instant>,
}

/// Drives probing for every live connection.
pub struct HealthMonitor {
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    timeout: Duration,
}

impl HealthMonitor {
    /// Create a monitor with the configured interval and timeout multiple.
    pub fn new(
        registry: Arc<Registry>,
        dispatcher: Arc<Dispatcher>,
        settings: &HealthSettings,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            interval: settings.probe_interval(),
            timeout: settings.timeout(),
        }
    }

    /// Silence after which a connection is removed.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a pong. Unknown IDs are ignored.
    pub async fn handle_pong(&self, connection_id: &str) -> bool {
        let Some(conn) = self.registry.get(connection_id) else {
            debug!(conn_id = connection_id, "pong from unknown connection ignored");
            return false;
        };
        conn.record_ack(Instant::now(), timestamp(Utc::now()));
        if let Err(e) = self.registry.store().touch_health(connection_id).await {
            warn!(
                conn_id = connection_id,
                error = %e,
                "failed to persist health acknowledgement"
            );
        }
        true
    }

    /// Run one pass: time out silent connections, ping due ones.
    pub async fn tick(&self) -> ProbePass {
        let now = Instant::now();
        let mut pass = ProbePass::default();

        for conn in self.registry.all() {
            let clock = conn.clock();
            let deadline = clock.last_ack + self.timeout;
            if now >= deadline {
                pass.timed_out.push(conn.id.clone());
                continue;
            }
            let mut next_ping = clock.next_ping;
            if now >= next_ping {
                next_ping = now + self.interval;
                conn.schedule_ping(next_ping);
                pass.pinged.push(conn.id.clone());
            }
            let wake = next_ping.min(deadline);
            pass.next_deadline = Some(pass.next_deadline.map_or(wake, |d| d.min(wake)));
        }

        // Removals await the store, so a pong may land for a later candidate
        // in the meantime; each one is re-checked against its current clock.
        for id in std::mem::take(&mut pass.timed_out) {
            let Some(conn) = self.registry.get(&id) else {
                continue;
            };
            let clock = conn.clock();
            let deadline = clock.last_ack + self.timeout;
            if Instant::now() < deadline {
                debug!(conn_id = %id, "acknowledged before removal, keeping");
                let wake = clock.next_ping.min(deadline);
                pass.next_deadline = Some(pass.next_deadline.map_or(wake, |d| d.min(wake)));
                continue;
            }
            if self.registry.unregister(&id).await {
                counter!(HEALTH_TIMEOUTS_TOTAL).increment(1);
                info!(conn_id = %id, timeout = ?self.timeout, "connection health timeout");
                pass.timed_out.push(id);
            }
        }
        for id in &pass.pinged {
            let _ = self.dispatcher.send(id, &OutboundMessage::ping()).await;
        }
        pass
    }

    /// Scheduler loop. Returns when `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let wakeup = self.registry.wakeup();
        info!(
            interval = ?self.interval,
            timeout = ?self.timeout,
            "health scheduler started"
        );
        loop {
            let next = self.tick().await.next_deadline;
            let sleep = async {
                match next {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                () = wakeup.notified() => {}
                () = sleep => {}
            }
        }
        info!("health scheduler stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::registry::RegistryConfig;
    use crate::transport::ChannelTransport;
    use crate::test_utils::GatedStore;
    use relay_core::{ConnectionMeta, ConnectionStatus, MemoryRecordStore, RecordStore};
    use tokio::sync::mpsc::Receiver;

    const INTERVAL: Duration = Duration::from_secs(30);

    struct Fixture {
        registry: Arc<Registry>,
        store: Arc<MemoryRecordStore>,
        monitor: Arc<HealthMonitor>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRecordStore::new());
        let registry = Arc::new(Registry::new(
            store.clone(),
            RegistryConfig {
                max_per_tenant: 10,
                probe_interval: INTERVAL,
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), 1 << 20));
        let settings = HealthSettings {
            probe_interval_ms: 30_000,
            timeout_multiple: 2,
        };
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            dispatcher,
            &settings,
        ));
        Fixture {
            registry,
            store,
            monitor,
        }
    }

    async fn connect(f: &Fixture, id: &str) -> Receiver<Arc<String>> {
        let (transport, rx) = ChannelTransport::new(64);
        f.registry
            .register(id, "u1", "t1", Arc::new(transport), ConnectionMeta::default())
            .await
            .unwrap();
        rx
    }

    async fn settle(f: &Fixture, id: &str, present: bool) {
        for _ in 0..20 {
            if f.registry.get(id).is_some() == present {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    fn ping_count(rx: &mut Receiver<Arc<String>>) -> usize {
        let mut n = 0;
        while let Ok(frame) = rx.try_recv() {
            if frame.contains(r#""type":"ping""#) {
                n += 1;
            }
        }
        n
    }

    #[tokio::test(start_paused = true)]
    async fn tick_pings_when_due() {
        let f = fixture();
        let mut rx = connect(&f, "c1").await;

        let pass = f.monitor.tick().await;
        assert!(pass.pinged.is_empty());
        assert_eq!(pass.next_deadline, Some(Instant::now() + INTERVAL));

        time::advance(INTERVAL).await;
        let pass = f.monitor.tick().await;
        assert_eq!(pass.pinged, ["c1"]);
        assert_eq!(ping_count(&mut rx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_exactly_twice_the_interval() {
        let f = fixture();
        let _rx = connect(&f, "c1").await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&f.monitor).run(cancel.clone()));

        time::sleep(INTERVAL * 2 - Duration::from_millis(1)).await;
        settle(&f, "c1", true).await;
        assert!(f.registry.get("c1").is_some());

        time::sleep(Duration::from_millis(1)).await;
        settle(&f, "c1", false).await;
        assert!(f.registry.get("c1").is_none());
        let rec = f.store.get_connection("c1").await.unwrap().unwrap();
        assert_eq!(rec.status, ConnectionStatus::Disconnected);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_connection_alive() {
        let f = fixture();
        let mut rx = connect(&f, "c1").await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&f.monitor).run(cancel.clone()));

        for _ in 0..6 {
            time::sleep(Duration::from_secs(25)).await;
            assert!(f.monitor.handle_pong("c1").await);
        }
        settle(&f, "c1", true).await;
        assert!(f.registry.get("c1").is_some());
        assert!(ping_count(&mut rx) >= 4);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn registration_wakes_idle_scheduler() {
        let f = fixture();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&f.monitor).run(cancel.clone()));
        tokio::task::yield_now().await;

        let mut rx = connect(&f, "late").await;
        time::sleep(INTERVAL + Duration::from_millis(1)).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(ping_count(&mut rx), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unregistered_connection_is_not_probed() {
        let f = fixture();
        let mut rx = connect(&f, "c1").await;
        assert!(f.registry.unregister("c1").await);
        time::advance(INTERVAL * 3).await;
        let pass = f.monitor.tick().await;
        assert!(pass.pinged.is_empty());
        assert!(pass.timed_out.is_empty());
        assert!(pass.next_deadline.is_none());
        assert_eq!(ping_count(&mut rx), 0);
    }

    #[tokio::test]
    async fn pong_updates_store_and_memory() {
        let f = fixture();
        let _rx = connect(&f, "c1").await;
        assert!(f.monitor.handle_pong("c1").await);
        assert!(!f.monitor.handle_pong("ghost").await);
        let conn = f.registry.get("c1").unwrap();
        let rec = f.store.get_connection("c1").await.unwrap().unwrap();
        assert!(rec.last_health_at >= conn.connected_at);
    }

    #[tokio::test]
    async fn cancelled_scheduler_exits() {
        let f = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();
        Arc::clone(&f.monitor).run(cancel).await;
    }

    #[tokio::test(start_paused = true)]
    async fn pong_during_removal_spares_the_connection() {
        let store = Arc::new(GatedStore::new());
        let registry = Arc::new(Registry::new(
            store.clone(),
            RegistryConfig {
                max_per_tenant: 10,
                probe_interval: INTERVAL,
            },
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), 1 << 20));
        let settings = HealthSettings {
            probe_interval_ms: 30_000,
            timeout_multiple: 2,
        };
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            dispatcher,
            &settings,
        ));
        for id in ["c1", "c2"] {
            let (transport, rx) = ChannelTransport::new(64);
            std::mem::forget(rx);
            registry
                .register(id, "u1", "t1", Arc::new(transport), ConnectionMeta::default())
                .await
                .unwrap();
        }

        time::advance(INTERVAL * 2).await;
        store.hold();
        let pass = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.tick().await }
        });

        // The first removal is parked in the store; the other is still live.
        store.entered().await;
        let survivor = ["c1", "c2"]
            .into_iter()
            .find(|id| registry.get(id).is_some())
            .unwrap();
        assert!(monitor.handle_pong(survivor).await);
        store.release();

        let pass = pass.await.unwrap();
        assert_eq!(pass.timed_out.len(), 1);
        assert_ne!(pass.timed_out[0], survivor);
        assert!(pass.next_deadline.is_some());
        assert!(registry.get(survivor).is_some());
        assert_eq!(registry.len(), 1);
        let rec = store.get_connection(survivor).await.unwrap().unwrap();
        assert!(rec.is_connected());
    }
}
