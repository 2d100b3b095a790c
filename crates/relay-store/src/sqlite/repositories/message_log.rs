//! Message-log repository for the `message_log` table.

use relay_core::MessageLogEntry;
use rusqlite::{Connection, params};

use super::sql_limit;
use crate::errors::Result;
use crate::sqlite::row_types::MessageLogRow;

/// Message-log repository. Stateless, every method takes `&Connection`.
pub struct MessageLogRepo;

impl MessageLogRepo {
    /// Append an entry as given.
    pub fn append(conn: &Connection, entry: &MessageLogEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        let _ = conn.execute(
            "INSERT INTO message_log (id, tenant_id, connection_id, user_id, message_id,
                 kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id.as_str(),
                entry.tenant_id,
                entry.connection_id,
                entry.user_id,
                entry.message_id,
                entry.kind,
                payload,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    /// Most recent entries for a connection, newest first.
    pub fn for_connection(
        conn: &Connection,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogEntry>> {
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, connection_id, user_id, message_id, kind, payload, created_at
             FROM message_log
             WHERE connection_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![connection_id, sql_limit(limit)], |row| {
                Ok(MessageLogRow {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    connection_id: row.get(2)?,
                    user_id: row.get(3)?,
                    message_id: row.get(4)?,
                    kind: row.get(5)?,
                    payload: row.get(6)?,
                    created_at: row.get(7)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(MessageLogRow::into_entry).collect()
    }

    /// Delete up to `limit` entries created before `cutoff`, oldest first.
    pub fn purge_before(conn: &Connection, cutoff: &str, limit: usize) -> Result<usize> {
        let deleted = conn.execute(
            "DELETE FROM message_log WHERE rowid IN (
                 SELECT rowid FROM message_log
                 WHERE created_at < ?1
                 ORDER BY created_at ASC
                 LIMIT ?2
             )",
            params![cutoff, sql_limit(limit)],
        )?;
        Ok(deleted)
    }

    /// Total number of entries.
    pub fn count(conn: &Connection) -> Result<usize> {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM message_log", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
