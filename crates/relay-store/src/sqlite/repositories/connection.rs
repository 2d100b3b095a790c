//! Connection repository for the `connections` table.

use relay_core::{ConnectionRecord, ConnectionStatus, Subscription};
use rusqlite::{Connection, OptionalExtension, params};

use super::sql_limit;
use crate::errors::Result;
use crate::sqlite::row_types::ConnectionRow;

const COLUMNS: &str = "connection_id, user_id, tenant_id, status, connected_at, last_health_at,
     last_message_at, message_count, user_agent, source_address, subscriptions";

/// Connection repository. Stateless, every method takes `&Connection`.
pub struct ConnectionRepo;

impl ConnectionRepo {
    /// Insert a record, replacing any existing row with the same ID.
    pub fn upsert(conn: &Connection, record: &ConnectionRecord) -> Result<()> {
        let subscriptions = serde_json::to_string(&record.subscriptions)?;
        let _ = conn.execute(
            &format!(
                "INSERT OR REPLACE INTO connections ({COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                record.connection_id,
                record.user_id,
                record.tenant_id,
                record.status.as_str(),
                record.connected_at,
                record.last_health_at,
                record.last_message_at,
                i64::try_from(record.message_count).unwrap_or(i64::MAX),
                record.meta.user_agent,
                record.meta.source_address,
                subscriptions,
            ],
        )?;
        Ok(())
    }

    /// Fetch a record by ID.
    pub fn get(conn: &Connection, connection_id: &str) -> Result<Option<ConnectionRecord>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM connections WHERE connection_id = ?1"),
                params![connection_id],
                Self::map_row,
            )
            .optional()?;
        row.map(ConnectionRow::into_record).transpose()
    }

    /// Flip to `disconnected` and stamp `last_health_at`.
    pub fn mark_disconnected(conn: &Connection, connection_id: &str, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE connections SET status = 'disconnected', last_health_at = ?2
             WHERE connection_id = ?1",
            params![connection_id, now],
        )?;
        Ok(changed > 0)
    }

    /// Overwrite the subscription list.
    pub fn replace_subscriptions(
        conn: &Connection,
        connection_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<bool> {
        let json = serde_json::to_string(subscriptions)?;
        let changed = conn.execute(
            "UPDATE connections SET subscriptions = ?2 WHERE connection_id = ?1",
            params![connection_id, json],
        )?;
        Ok(changed > 0)
    }

    /// Stamp `last_health_at`.
    pub fn touch_health(conn: &Connection, connection_id: &str, now: &str) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE connections SET last_health_at = ?2 WHERE connection_id = ?1",
            params![connection_id, now],
        )?;
        Ok(changed > 0)
    }

    /// Persist message counters.
    pub fn record_stats(
        conn: &Connection,
        connection_id: &str,
        message_count: u64,
        last_message_at: Option<&str>,
    ) -> Result<bool> {
        let changed = conn.execute(
            "UPDATE connections SET message_count = ?2, last_message_at = ?3
             WHERE connection_id = ?1",
            params![
                connection_id,
                i64::try_from(message_count).unwrap_or(i64::MAX),
                last_message_at
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete a record.
    pub fn delete(conn: &Connection, connection_id: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM connections WHERE connection_id = ?1",
            params![connection_id],
        )?;
        Ok(changed > 0)
    }

    /// Records for a tenant with the given status, newest first.
    pub fn list_by_tenant(
        conn: &Connection,
        tenant_id: &str,
        status: ConnectionStatus,
    ) -> Result<Vec<ConnectionRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM connections
             WHERE tenant_id = ?1 AND status = ?2
             ORDER BY connected_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![tenant_id, status.as_str()], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(ConnectionRow::into_record).collect()
    }

    /// Connected records whose `last_health_at` is before `cutoff`, oldest first.
    pub fn stale(conn: &Connection, cutoff: &str, limit: usize) -> Result<Vec<ConnectionRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM connections
             WHERE status = 'connected' AND last_health_at < ?1
             ORDER BY last_health_at ASC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![cutoff, sql_limit(limit)], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(ConnectionRow::into_record).collect()
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRow> {
        Ok(ConnectionRow {
            connection_id: row.get(0)?,
            user_id: row.get(1)?,
            tenant_id: row.get(2)?,
            status: row.get(3)?,
            connected_at: row.get(4)?,
            last_health_at: row.get(5)?,
            last_message_at: row.get(6)?,
            message_count: row.get(7)?,
            user_agent: row.get(8)?,
            source_address: row.get(9)?,
            subscriptions: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
