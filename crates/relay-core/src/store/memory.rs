//! Process-local [`RecordStore`] backed by hash maps.
//!
//! Useful for embedding the hub without a database and for tests. An outage
//! switch ([`MemoryRecordStore::set_unavailable`]) makes every call fail with
//! [`StoreError::Unavailable`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{MessageLogEntry, RecordStore, Result, StoreError};
use crate::connection::{ConnectionRecord, ConnectionStatus};
use crate::subscription::Subscription;
use crate::timestamp;

/// In-memory record store.
#[derive(Default)]
pub struct MemoryRecordStore {
    connections: Mutex<HashMap<String, ConnectionRecord>>,
    messages: Mutex<Vec<MessageLogEntry>>,
    unavailable: AtomicBool,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while set, every operation fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Insert a record verbatim, keeping its timestamps.
    pub fn insert_record(&self, record: ConnectionRecord) {
        let _ = self
            .connections
            .lock()
            .insert(record.connection_id.clone(), record);
    }

    /// Insert a log entry verbatim, keeping its `created_at`.
    pub fn insert_message(&self, entry: MessageLogEntry) {
        self.messages.lock().push(entry);
    }

    /// Number of stored log entries.
    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    /// Number of stored connection records (any status).
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }

    fn update<F>(&self, connection_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut ConnectionRecord),
    {
        self.check()?;
        Ok(self
            .connections
            .lock()
            .get_mut(connection_id)
            .map(f)
            .is_some())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_connection(&self, record: &ConnectionRecord) -> Result<ConnectionRecord> {
        self.check()?;
        let now = timestamp(Utc::now());
        let mut stored = record.clone();
        stored.status = ConnectionStatus::Connected;
        stored.connected_at.clone_from(&now);
        stored.last_health_at = now;
        let _ = self
            .connections
            .lock()
            .insert(stored.connection_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Option<ConnectionRecord>> {
        self.check()?;
        Ok(self.connections.lock().get(connection_id).cloned())
    }

    async fn mark_disconnected(&self, connection_id: &str) -> Result<bool> {
        let now = timestamp(Utc::now());
        self.update(connection_id, |rec| {
            rec.status = ConnectionStatus::Disconnected;
            rec.last_health_at = now;
        })
    }

    async fn replace_subscriptions(
        &self,
        connection_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<bool> {
        self.update(connection_id, |rec| {
            rec.subscriptions = subscriptions.to_vec();
        })
    }

    async fn touch_health(&self, connection_id: &str) -> Result<bool> {
        let now = timestamp(Utc::now());
        self.update(connection_id, |rec| rec.last_health_at = now)
    }

    async fn record_stats(
        &self,
        connection_id: &str,
        message_count: u64,
        last_message_at: Option<&str>,
    ) -> Result<bool> {
        self.update(connection_id, |rec| {
            rec.message_count = message_count;
            rec.last_message_at = last_message_at.map(str::to_owned);
        })
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<bool> {
        self.check()?;
        Ok(self.connections.lock().remove(connection_id).is_some())
    }

    async fn list_connections(
        &self,
        tenant_id: &str,
        status: ConnectionStatus,
    ) -> Result<Vec<ConnectionRecord>> {
        self.check()?;
        let mut records: Vec<_> = self
            .connections
            .lock()
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.status == status)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.connected_at.cmp(&a.connected_at));
        Ok(records)
    }

    async fn stale_connections(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConnectionRecord>> {
        self.check()?;
        let cutoff = timestamp(cutoff);
        let mut records: Vec<_> = self
            .connections
            .lock()
            .values()
            .filter(|r| r.is_connected() && r.last_health_at < cutoff)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.last_health_at.cmp(&b.last_health_at));
        records.truncate(limit);
        Ok(records)
    }

    async fn append_message(&self, entry: &MessageLogEntry) -> Result<()> {
        self.check()?;
        let mut stored = entry.clone();
        stored.created_at = timestamp(Utc::now());
        self.messages.lock().push(stored);
        Ok(())
    }

    async fn messages_for_connection(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogEntry>> {
        self.check()?;
        Ok(self
            .messages
            .lock()
            .iter()
            .rev()
            .filter(|m| m.connection_id == connection_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_messages_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize> {
        self.check()?;
        let cutoff = timestamp(cutoff);
        let mut messages = self.messages.lock();
        let mut expired: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.created_at < cutoff)
            .map(|(i, _)| i)
            .collect();
        expired.sort_by(|a, b| messages[*a].created_at.cmp(&messages[*b].created_at));
        expired.truncate(limit);
        expired.sort_unstable();
        for index in expired.iter().rev() {
            let _ = messages.remove(*index);
        }
        Ok(expired.len())
    }
}
