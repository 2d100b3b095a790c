//! A record store that can hold `mark_disconnected` open, for interleaving tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::store::{MessageLogEntry, Result};
use relay_core::{
    ConnectionRecord, ConnectionStatus, MemoryRecordStore, RecordStore, Subscription,
};
use tokio::sync::{Notify, Semaphore};

/// Delegates to a [`MemoryRecordStore`]; while held, each `mark_disconnected`
/// signals [`GatedStore::entered`] and parks until [`GatedStore::release`].
pub(crate) struct GatedStore {
    pub(crate) inner: Arc<MemoryRecordStore>,
    held: AtomicBool,
    permits: Semaphore,
    entered: Notify,
}

impl GatedStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(MemoryRecordStore::new()),
            held: AtomicBool::new(false),
            permits: Semaphore::new(0),
            entered: Notify::new(),
        }
    }

    pub(crate) fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Resolves once a `mark_disconnected` call is parked.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let parked and future calls through.
    pub(crate) fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.permits.add_permits(64);
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn create_connection(&self, record: &ConnectionRecord) -> Result<ConnectionRecord> {
        self.inner.create_connection(record).await
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Option<ConnectionRecord>> {
        self.inner.get_connection(connection_id).await
    }

    async fn mark_disconnected(&self, connection_id: &str) -> Result<bool> {
        if self.held.load(Ordering::SeqCst) {
            self.entered.notify_one();
            if let Ok(permit) = self.permits.acquire().await {
                permit.forget();
            }
        }
        self.inner.mark_disconnected(connection_id).await
    }

    async fn replace_subscriptions(
        &self,
        connection_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<bool> {
        self.inner
            .replace_subscriptions(connection_id, subscriptions)
            .await
    }

    async fn touch_health(&self, connection_id: &str) -> Result<bool> {
        self.inner.touch_health(connection_id).await
    }

    async fn record_stats(
        &self,
        connection_id: &str,
        message_count: u64,
        last_message_at: Option<&str>,
    ) -> Result<bool> {
        self.inner
            .record_stats(connection_id, message_count, last_message_at)
            .await
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<bool> {
        self.inner.delete_connection(connection_id).await
    }

    async fn list_connections(
        &self,
        tenant_id: &str,
        status: ConnectionStatus,
    ) -> Result<Vec<ConnectionRecord>> {
        self.inner.list_connections(tenant_id, status).await
    }

    async fn stale_connections(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConnectionRecord>> {
        self.inner.stale_connections(cutoff, limit).await
    }

    async fn append_message(&self, entry: &MessageLogEntry) -> Result<()> {
        self.inner.append_message(entry).await
    }

    async fn messages_for_connection(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogEntry>> {
        self.inner
            .messages_for_connection(connection_id, limit)
            .await
    }

    async fn purge_messages_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        self.inner.purge_messages_before(cutoff, limit).await
    }
}
