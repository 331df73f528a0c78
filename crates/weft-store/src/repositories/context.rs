//! Context repository — cold-tier lineage records.
//!
//! Contexts are immutable once written; inserts are idempotent (`INSERT OR
//! IGNORE`) so a retried migration batch never corrupts or duplicates a
//! record, and the `fields` column round-trips byte-identical.

use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use rusqlite::types::Value as SqlValue;
use std::collections::HashMap;
use std::fmt::Write as _;

use crate::errors::Result;
use crate::row_types::ContextRow;

/// Filters for querying cold-tier contexts. All fields are conjunctive.
#[derive(Clone, Debug, Default)]
pub struct ContextQuery {
    /// Match this chain correlation ID.
    pub correlation_id: Option<String>,
    /// Match this emitting agent.
    pub agent_id: Option<String>,
    /// Match this owning session.
    pub session_id: Option<String>,
    /// Match the context created for this event.
    pub event_id: Option<String>,
    /// Only contexts created at or after this instant (RFC 3339).
    pub since: Option<String>,
    /// Only contexts created before this instant (RFC 3339).
    pub until: Option<String>,
    /// Maximum rows returned.
    pub limit: Option<i64>,
}

const COLUMNS: &str = "ref, event_id, correlation_id, parent_event_id, root_event_id, depth, \
                       agent_id, session_id, client_id, timestamp, fields";

/// Context repository — stateless, every method takes `&Connection`.
pub struct ContextRepo;

impl ContextRepo {
    /// Insert a context record. Idempotent: an existing record with the same
    /// reference is left untouched.
    pub fn insert(conn: &Connection, row: &ContextRow) -> Result<()> {
        let _ = conn.execute(
            "INSERT OR IGNORE INTO contexts (ref, event_id, correlation_id, parent_event_id,
             root_event_id, depth, agent_id, session_id, client_id, timestamp, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.reference,
                row.event_id,
                row.correlation_id,
                row.parent_event_id,
                row.root_event_id,
                row.depth,
                row.agent_id,
                row.session_id,
                row.client_id,
                row.timestamp,
                row.fields,
            ],
        )?;
        Ok(())
    }

    /// Get a single context by reference.
    pub fn get_by_ref(conn: &Connection, reference: &str) -> Result<Option<ContextRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM contexts WHERE ref = ?1"),
                params![reference],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Batch-fetch contexts by reference. Missing references are omitted.
    pub fn get_by_refs(
        conn: &Connection,
        references: &[&str],
    ) -> Result<HashMap<String, ContextRow>> {
        let mut result = HashMap::new();
        if references.is_empty() {
            return Ok(result);
        }

        let placeholders: Vec<String> = (1..=references.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {COLUMNS} FROM contexts WHERE ref IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(references.iter()), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        for row in rows {
            let _ = result.insert(row.reference.clone(), row);
        }
        Ok(result)
    }

    /// Query contexts by secondary indexes, newest first.
    pub fn query(conn: &Connection, query: &ContextQuery) -> Result<Vec<ContextRow>> {
        let mut sql = format!("SELECT {COLUMNS} FROM contexts WHERE 1=1");
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(correlation_id) = &query.correlation_id {
            values.push(SqlValue::from(correlation_id.clone()));
            let _ = write!(sql, " AND correlation_id = ?{}", values.len());
        }
        if let Some(agent_id) = &query.agent_id {
            values.push(SqlValue::from(agent_id.clone()));
            let _ = write!(sql, " AND agent_id = ?{}", values.len());
        }
        if let Some(session_id) = &query.session_id {
            values.push(SqlValue::from(session_id.clone()));
            let _ = write!(sql, " AND session_id = ?{}", values.len());
        }
        if let Some(event_id) = &query.event_id {
            values.push(SqlValue::from(event_id.clone()));
            let _ = write!(sql, " AND event_id = ?{}", values.len());
        }
        if let Some(since) = &query.since {
            values.push(SqlValue::from(since.clone()));
            let _ = write!(sql, " AND timestamp >= ?{}", values.len());
        }
        if let Some(until) = &query.until {
            values.push(SqlValue::from(until.clone()));
            let _ = write!(sql, " AND timestamp < ?{}", values.len());
        }

        sql.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = query.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total context count.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM contexts", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete contexts created before the given instant (retention GC).
    /// Returns the number of rows removed.
    pub fn delete_older_than(conn: &Connection, cutoff: &str) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM contexts WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextRow> {
        Ok(ContextRow {
            reference: row.get(0)?,
            event_id: row.get(1)?,
            correlation_id: row.get(2)?,
            parent_event_id: row.get(3)?,
            root_event_id: row.get(4)?,
            depth: row.get(5)?,
            agent_id: row.get(6)?,
            session_id: row.get(7)?,
            client_id: row.get(8)?,
            timestamp: row.get(9)?,
            fields: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
