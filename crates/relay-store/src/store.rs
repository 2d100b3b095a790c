//! [`RecordStore`] implementation over the `SQLite` repositories.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::store::Result as StoreResult;
use relay_core::{
    ConnectionRecord, ConnectionStatus, MessageLogEntry, RecordStore, StoreError, Subscription,
    timestamp,
};
use rusqlite::Connection;
use tracing::info;

use crate::errors::Result;
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool};
use crate::sqlite::migrations::run_migrations;
use crate::sqlite::repositories::{ConnectionRepo, MessageLogRepo};

/// `SQLite`-backed record store.
///
/// Repository calls are synchronous, so each trait method hops onto tokio's
/// blocking pool with its own pooled connection.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: ConnectionPool,
}

impl SqliteRecordStore {
    /// Wrap an existing pool, applying pending migrations.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let conn = pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            info!(applied, "record store schema migrated");
        }
        drop(conn);
        Ok(Self { pool })
    }

    /// Open (or create) a database file.
    pub fn open(path: &Path, config: &ConnectionConfig) -> Result<Self> {
        Self::new(connection::new_file(path, config)?)
    }

    /// Fresh in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::new(connection::new_in_memory(&ConnectionConfig::default())?)
    }

    /// The underlying pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?;
        outcome.map_err(StoreError::from)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create_connection(&self, record: &ConnectionRecord) -> StoreResult<ConnectionRecord> {
        let mut stored = record.clone();
        let now = timestamp(Utc::now());
        stored.status = ConnectionStatus::Connected;
        stored.connected_at.clone_from(&now);
        stored.last_health_at = now;
        self.run(move |conn| {
            ConnectionRepo::upsert(conn, &stored)?;
            Ok(stored)
        })
        .await
    }

    async fn get_connection(&self, connection_id: &str) -> StoreResult<Option<ConnectionRecord>> {
        let id = connection_id.to_owned();
        self.run(move |conn| ConnectionRepo::get(conn, &id)).await
    }

    async fn mark_disconnected(&self, connection_id: &str) -> StoreResult<bool> {
        let id = connection_id.to_owned();
        let now = timestamp(Utc::now());
        self.run(move |conn| ConnectionRepo::mark_disconnected(conn, &id, &now))
            .await
    }

    async fn replace_subscriptions(
        &self,
        connection_id: &str,
        subscriptions: &[Subscription],
    ) -> StoreResult<bool> {
        let id = connection_id.to_owned();
        let subscriptions = subscriptions.to_vec();
        self.run(move |conn| ConnectionRepo::replace_subscriptions(conn, &id, &subscriptions))
            .await
    }

    async fn touch_health(&self, connection_id: &str) -> StoreResult<bool> {
        let id = connection_id.to_owned();
        let now = timestamp(Utc::now());
        self.run(move |conn| ConnectionRepo::touch_health(conn, &id, &now))
            .await
    }

    async fn record_stats(
        &self,
        connection_id: &str,
        message_count: u64,
        last_message_at: Option<&str>,
    ) -> StoreResult<bool> {
        let id = connection_id.to_owned();
        let last = last_message_at.map(str::to_owned);
        self.run(move |conn| {
            ConnectionRepo::record_stats(conn, &id, message_count, last.as_deref())
        })
        .await
    }

    async fn delete_connection(&self, connection_id: &str) -> StoreResult<bool> {
        let id = connection_id.to_owned();
        self.run(move |conn| ConnectionRepo::delete(conn, &id)).await
    }

    async fn list_connections(
        &self,
        tenant_id: &str,
        status: ConnectionStatus,
    ) -> StoreResult<Vec<ConnectionRecord>> {
        let tenant = tenant_id.to_owned();
        self.run(move |conn| ConnectionRepo::list_by_tenant(conn, &tenant, status))
            .await
    }

    async fn stale_connections(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ConnectionRecord>> {
        let cutoff = timestamp(cutoff);
        self.run(move |conn| ConnectionRepo::stale(conn, &cutoff, limit))
            .await
    }

    async fn append_message(&self, entry: &MessageLogEntry) -> StoreResult<()> {
        let mut stored = entry.clone();
        stored.created_at = timestamp(Utc::now());
        self.run(move |conn| MessageLogRepo::append(conn, &stored))
            .await
    }

    async fn messages_for_connection(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> StoreResult<Vec<MessageLogEntry>> {
        let id = connection_id.to_owned();
        self.run(move |conn| MessageLogRepo::for_connection(conn, &id, limit))
            .await
    }

    async fn purge_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<usize> {
        let cutoff = timestamp(cutoff);
        self.run(move |conn| MessageLogRepo::purge_before(conn, &cutoff, limit))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
