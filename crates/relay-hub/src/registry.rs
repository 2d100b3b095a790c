//! Connection registry.
//!
//! Live connections are indexed by ID and by tenant behind one
//! `parking_lot::RwLock`. The lock is never held across an `.await`: store
//! calls happen before or after the in-memory change, never during.
//!
//! Registration is two-phase. The ID is first *reserved* (counted against the
//! tenant cap), then the durable record is written, then the connection goes
//! live. A duplicate ID in either phase is refused, so concurrent registrations
//! never collide. Unregistration holds the same kind of reservation while it
//! writes the disconnect through.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use relay_core::{
    ConnectionMeta, ConnectionRecord, RecordStore, Subscription, SubscriptionFilters,
    SubscriptionId, SubscriptionType,
};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::connection::LiveConnection;
use crate::errors::{RegistryError, Result};
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, REGISTRATIONS_REJECTED_TOTAL};
use crate::transport::Transport;

/// Registry limits.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Live plus pending connections allowed per tenant.
    pub max_per_tenant: usize,
    /// Delay before a new connection's first ping.
    pub probe_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_per_tenant: 50,
            probe_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct State {
    connections: HashMap<String, Arc<LiveConnection>>,
    by_tenant: HashMap<String, BTreeSet<String>>,
    /// Registrations in flight: connection ID → tenant.
    reserved: HashMap<String, String>,
}

impl State {
    fn tenant_load(&self, tenant_id: &str) -> usize {
        let live = self.by_tenant.get(tenant_id).map_or(0, BTreeSet::len);
        let pending = self.reserved.values().filter(|t| *t == tenant_id).count();
        live + pending
    }

    fn insert(&mut self, conn: Arc<LiveConnection>) {
        let _ = self
            .by_tenant
            .entry(conn.tenant_id.clone())
            .or_default()
            .insert(conn.id.clone());
        let _ = self.connections.insert(conn.id.clone(), conn);
    }

    fn remove(&mut self, connection_id: &str) -> Option<Arc<LiveConnection>> {
        let conn = self.connections.remove(connection_id)?;
        if let Some(ids) = self.by_tenant.get_mut(&conn.tenant_id) {
            let _ = ids.remove(connection_id);
            if ids.is_empty() {
                let _ = self.by_tenant.remove(&conn.tenant_id);
            }
        }
        Some(conn)
    }
}

/// Releases a reservation unless the registration completes.
struct Reservation<'a> {
    state: &'a RwLock<State>,
    connection_id: &'a str,
    armed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, conn: Arc<LiveConnection>) {
        let mut state = self.state.write();
        let _ = state.reserved.remove(self.connection_id);
        state.insert(conn);
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.state.write().reserved.remove(self.connection_id);
        }
    }
}

/// Live connections and their subscriptions.
pub struct Registry {
    state: RwLock<State>,
    store: Arc<dyn RecordStore>,
    config: RegistryConfig,
    wakeup: Arc<Notify>,
}

impl Registry {
    /// Create an empty registry mirroring into `store`.
    pub fn new(store: Arc<dyn RecordStore>, config: RegistryConfig) -> Self {
        Self {
            state: RwLock::new(State::default()),
            store,
            config,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Limits in effect.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The backing record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Signalled whenever a connection goes live.
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    /// Admit a connection.
    ///
    /// Fails fast with [`RegistryError::TenantQuotaExceeded`] at the cap and
    /// [`RegistryError::ConnectionAlreadyRegistered`] for a duplicate ID,
    /// without touching any state. A store failure releases the reserved slot.
    pub async fn register(
        &self,
        connection_id: &str,
        user_id: &str,
        tenant_id: &str,
        transport: Arc<dyn Transport>,
        meta: ConnectionMeta,
    ) -> Result<Arc<LiveConnection>> {
        let reservation = self.reserve(connection_id, tenant_id)?;

        let record = ConnectionRecord::new(connection_id, user_id, tenant_id, meta);
        let stored = match self.store.create_connection(&record).await {
            Ok(stored) => stored,
            Err(e) => {
                counter!(REGISTRATIONS_REJECTED_TOTAL, "reason" => "store").increment(1);
                warn!(conn_id = connection_id, tenant_id, error = %e, "failed to persist connection");
                return Err(RegistryError::Store(e));
            }
        };

        let conn = Arc::new(LiveConnection::new(
            stored,
            transport,
            self.config.probe_interval,
        ));
        reservation.commit(Arc::clone(&conn));

        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = connection_id, user_id, tenant_id, "connection registered");
        self.wakeup.notify_one();
        Ok(conn)
    }

    fn reserve<'a>(&'a self, connection_id: &'a str, tenant_id: &str) -> Result<Reservation<'a>> {
        let mut state = self.state.write();
        if state.connections.contains_key(connection_id)
            || state.reserved.contains_key(connection_id)
        {
            counter!(REGISTRATIONS_REJECTED_TOTAL, "reason" => "duplicate").increment(1);
            return Err(RegistryError::ConnectionAlreadyRegistered(
                connection_id.to_owned(),
            ));
        }
        let load = state.tenant_load(tenant_id);
        if load >= self.config.max_per_tenant {
            counter!(REGISTRATIONS_REJECTED_TOTAL, "reason" => "quota").increment(1);
            warn!(
                conn_id = connection_id,
                tenant_id,
                limit = self.config.max_per_tenant,
                "tenant connection quota exceeded"
            );
            return Err(RegistryError::TenantQuotaExceeded {
                tenant_id: tenant_id.to_owned(),
                limit: self.config.max_per_tenant,
            });
        }
        let _ = state
            .reserved
            .insert(connection_id.to_owned(), tenant_id.to_owned());
        Ok(Reservation {
            state: &self.state,
            connection_id,
            armed: true,
        })
    }

    /// Remove a connection: close its transport, then mirror the disconnect.
    ///
    /// Idempotent. Returns whether this call removed a live connection; of
    /// several racing callers exactly one sees `true`. The ID stays reserved
    /// until the store writes finish, so a re-registration under the same ID
    /// cannot be overwritten by this call's `disconnected` mark.
    pub async fn unregister(&self, connection_id: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            let conn = state.remove(connection_id);
            if let Some(conn) = &conn {
                let _ = state
                    .reserved
                    .insert(connection_id.to_owned(), conn.tenant_id.clone());
            }
            conn
        };
        let Some(conn) = removed else {
            debug!(conn_id = connection_id, "unregister of unknown connection ignored");
            return false;
        };
        let _closing = Reservation {
            state: &self.state,
            connection_id,
            armed: true,
        };
        let conn = self.closed(conn);

        let store = &self.store;
        if let Err(e) = store
            .record_stats(&conn.id, conn.message_count(), conn.last_message_at().as_deref())
            .await
        {
            warn!(conn_id = %conn.id, error = %e, "failed to flush connection stats");
        }
        if let Err(e) = store.mark_disconnected(&conn.id).await {
            warn!(conn_id = %conn.id, error = %e, "failed to mark connection disconnected");
        }
        true
    }

    /// Drop the in-memory entry and close its transport, without touching the store.
    pub fn evict(&self, connection_id: &str) -> Option<Arc<LiveConnection>> {
        let conn = self.state.write().remove(connection_id)?;
        Some(self.closed(conn))
    }

    fn closed(&self, conn: Arc<LiveConnection>) -> Arc<LiveConnection> {
        conn.transport().close();
        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        info!(conn_id = %conn.id, tenant_id = %conn.tenant_id, "connection removed");
        conn
    }

    /// Attach a subscription to a live connection.
    pub async fn add_subscription(
        &self,
        connection_id: &str,
        subscription_type: SubscriptionType,
        filters: SubscriptionFilters,
    ) -> Result<SubscriptionId> {
        let conn = self
            .get(connection_id)
            .ok_or_else(|| RegistryError::ConnectionNotFound(connection_id.to_owned()))?;

        let subscription = Subscription::new(subscription_type, filters);
        let id = subscription.id.clone();
        let all = conn.push_subscription(subscription);
        debug!(
            conn_id = connection_id,
            subscription_id = %id,
            subscription_type = %subscription_type,
            "subscription added"
        );
        self.persist_subscriptions(connection_id, &all).await;
        Ok(id)
    }

    /// Detach a subscription. Unknown connection or subscription IDs are ignored.
    pub async fn remove_subscription(
        &self,
        connection_id: &str,
        subscription_id: &SubscriptionId,
    ) -> bool {
        let Some(remaining) = self
            .get(connection_id)
            .and_then(|conn| conn.drop_subscription(subscription_id))
        else {
            return false;
        };
        debug!(conn_id = connection_id, subscription_id = %subscription_id, "subscription removed");
        self.persist_subscriptions(connection_id, &remaining).await;
        true
    }

    async fn persist_subscriptions(&self, connection_id: &str, subscriptions: &[Subscription]) {
        if let Err(e) = self
            .store
            .replace_subscriptions(connection_id, subscriptions)
            .await
        {
            warn!(conn_id = connection_id, error = %e, "failed to persist subscriptions");
        }
    }

    /// Look up a live connection.
    pub fn get(&self, connection_id: &str) -> Option<Arc<LiveConnection>> {
        self.state.read().connections.get(connection_id).cloned()
    }

    /// Live connections of a tenant, ordered by ID.
    pub fn tenant_connections(&self, tenant_id: &str) -> Vec<Arc<LiveConnection>> {
        let state = self.state.read();
        state
            .by_tenant
            .get(tenant_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshots of a tenant's live connections.
    pub fn connections_for_tenant(&self, tenant_id: &str) -> Vec<ConnectionRecord> {
        self.tenant_connections(tenant_id)
            .iter()
            .map(|c| c.snapshot())
            .collect()
    }

    /// Every live connection.
    pub fn all(&self) -> Vec<Arc<LiveConnection>> {
        self.state.read().connections.values().cloned().collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Whether no connection is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live plus pending connections for a tenant.
    pub fn tenant_load(&self, tenant_id: &str) -> usize {
        self.state.read().tenant_load(tenant_id)
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
    use assert_matches::assert_matches;
    use crate::test_utils::GatedStore;
    use relay_core::{ConnectionStatus, MemoryRecordStore};

    fn registry_with_cap(cap: usize) -> (Arc<Registry>, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let registry = Arc::new(Registry::new(
            store.clone(),
            RegistryConfig {
                max_per_tenant: cap,
                ..Default::default()
            },
        ));
        (registry, store)
    }

    fn transport() -> Arc<ChannelTransport> {
        let (transport, rx) = ChannelTransport::new(16);
        std::mem::forget(rx);
        Arc::new(transport)
    }

    async fn register(registry: &Registry, id: &str, tenant: &str) -> Result<Arc<LiveConnection>> {
        registry
            .register(id, "u1", tenant, transport(), ConnectionMeta::default())
            .await
    }

    #[tokio::test]
    async fn register_persists_and_indexes() {
        let (registry, store) = registry_with_cap(5);
        let conn = register(&registry, "c1", "t1").await.unwrap();
        assert_eq!(conn.tenant_id, "t1");
        assert!(conn.subscriptions().is_empty());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connections_for_tenant("t1").len(), 1);
        assert!(store.get_connection("c1").await.unwrap().unwrap().is_connected());
    }

    #[tokio::test]
    async fn cap_is_per_tenant() {
        let (registry, _store) = registry_with_cap(2);
        register(&registry, "c1", "t1").await.unwrap();
        register(&registry, "c2", "t1").await.unwrap();
        assert_matches!(
            register(&registry, "c3", "t1").await,
            Err(RegistryError::TenantQuotaExceeded { limit: 2, .. })
        );
        assert_eq!(registry.tenant_load("t1"), 2);
        register(&registry, "c4", "t2").await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_id_is_refused() {
        let (registry, _store) = registry_with_cap(5);
        register(&registry, "c1", "t1").await.unwrap();
        assert_matches!(
            register(&registry, "c1", "t2").await,
            Err(RegistryError::ConnectionAlreadyRegistered(id)) if id == "c1"
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_releases_slot() {
        let (registry, store) = registry_with_cap(1);
        store.set_unavailable(true);
        assert_matches!(
            register(&registry, "c1", "t1").await,
            Err(RegistryError::Store(_))
        );
        assert_eq!(registry.tenant_load("t1"), 0);
        assert!(registry.get("c1").is_none());

        store.set_unavailable(false);
        register(&registry, "c1", "t1").await.unwrap();
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let (registry, store) = registry_with_cap(5);
        let conn = register(&registry, "c1", "t1").await.unwrap();
        assert!(registry.unregister("c1").await);
        assert!(!registry.unregister("c1").await);
        assert!(!registry.unregister("never").await);
        assert!(!conn.transport().is_open());
        assert!(registry.is_empty());
        assert!(registry.connections_for_tenant("t1").is_empty());
        let rec = store.get_connection("c1").await.unwrap().unwrap();
        assert_eq!(rec.status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn unregister_survives_store_outage() {
        let (registry, store) = registry_with_cap(5);
        register(&registry, "c1", "t1").await.unwrap();
        store.set_unavailable(true);
        assert!(registry.unregister("c1").await);
        assert!(registry.get("c1").is_none());
    }

    #[tokio::test]
    async fn concurrent_unregister_removes_once() {
        let (registry, _store) = registry_with_cap(5);
        register(&registry, "c1", "t1").await.unwrap();
        let a = tokio::spawn({
            let r = Arc::clone(&registry);
            async move { r.unregister("c1").await }
        });
        let b = tokio::spawn({
            let r = Arc::clone(&registry);
            async move { r.unregister("c1").await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a ^ b);
    }

    #[tokio::test]
    async fn concurrent_registrations_respect_cap() {
        let (registry, _store) = registry_with_cap(3);
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let r = Arc::clone(&registry);
                tokio::spawn(async move { register(&r, &format!("c{i}"), "t1").await.is_ok() })
            })
            .collect();
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn subscriptions_are_mirrored() {
        let (registry, store) = registry_with_cap(5);
        register(&registry, "c1", "t1").await.unwrap();
        let id = registry
            .add_subscription(
                "c1",
                SubscriptionType::Entity,
                SubscriptionFilters::any().with_entities(["e-42"]),
            )
            .await
            .unwrap();
        assert!(id.starts_with("sub_"));
        let stored = store.get_connection("c1").await.unwrap().unwrap();
        assert_eq!(stored.subscriptions.len(), 1);

        assert!(registry.remove_subscription("c1", &id).await);
        assert!(!registry.remove_subscription("c1", &id).await);
        assert!(!registry.remove_subscription("ghost", &id).await);
        let stored = store.get_connection("c1").await.unwrap().unwrap();
        assert!(stored.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn add_subscription_unknown_connection() {
        let (registry, _store) = registry_with_cap(5);
        assert_matches!(
            registry
                .add_subscription("ghost", SubscriptionType::Entity, SubscriptionFilters::any())
                .await,
            Err(RegistryError::ConnectionNotFound(_))
        );
    }

    #[tokio::test]
    async fn subscription_ids_are_unique() {
        let (registry, _store) = registry_with_cap(5);
        register(&registry, "c1", "t1").await.unwrap();
        let a = registry
            .add_subscription("c1", SubscriptionType::Entity, SubscriptionFilters::any())
            .await
            .unwrap();
        let b = registry
            .add_subscription("c1", SubscriptionType::Entity, SubscriptionFilters::any())
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.get("c1").unwrap().subscriptions().len(), 2);
    }

    #[tokio::test]
    async fn subscription_persist_failure_is_swallowed() {
        let (registry, store) = registry_with_cap(5);
        register(&registry, "c1", "t1").await.unwrap();
        store.set_unavailable(true);
        let id = registry
            .add_subscription("c1", SubscriptionType::Entity, SubscriptionFilters::any())
            .await;
        assert!(id.is_ok());
    }

    #[tokio::test]
    async fn tenant_connections_sorted_by_id() {
        let (registry, _store) = registry_with_cap(5);
        for id in ["c3", "c1", "c2"] {
            register(&registry, id, "t1").await.unwrap();
        }
        let ids: Vec<_> = registry
            .tenant_connections("t1")
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn id_stays_reserved_until_disconnect_is_written() {
        let store = Arc::new(GatedStore::new());
        let registry = Arc::new(Registry::new(store.clone(), RegistryConfig::default()));
        register(&registry, "c1", "t1").await.unwrap();

        store.hold();
        let pending = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.unregister("c1").await }
        });
        store.entered().await;

        assert!(registry.get("c1").is_none());
        assert_matches!(
            register(&registry, "c1", "t1").await,
            Err(RegistryError::ConnectionAlreadyRegistered(id)) if id == "c1"
        );
        assert!(!registry.unregister("c1").await);

        store.release();
        assert!(pending.await.unwrap());

        register(&registry, "c1", "t1").await.unwrap();
        let rec = store.get_connection("c1").await.unwrap().unwrap();
        assert_eq!(rec.status, ConnectionStatus::Connected);
        assert!(registry.get("c1").is_some());
    }

    #[tokio::test]
    async fn cancelled_unregister_releases_the_id() {
        let store = Arc::new(GatedStore::new());
        let registry = Arc::new(Registry::new(store.clone(), RegistryConfig::default()));
        register(&registry, "c1", "t1").await.unwrap();

        store.hold();
        let pending = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.unregister("c1").await }
        });
        store.entered().await;
        pending.abort();
        let _ = pending.await;
        store.release();

        register(&registry, "c1", "t1").await.unwrap();
        assert_eq!(registry.len(), 1);
    }
}
