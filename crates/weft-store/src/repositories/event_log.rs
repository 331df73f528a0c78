//! Event-log repository — recorded event traffic.
//!
//! The router never persists events; the observation recorder appends them
//! here so history queries and replay have a durable source. Name filtering
//! supports exact names and namespace prefixes (`substr` comparison rather
//! than `LIKE`, so names containing `_` or `%` never false-match).

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use std::fmt::Write as _;

use crate::errors::Result;
use crate::row_types::EventLogRow;

/// Filters for querying the recorded event log. All fields are conjunctive.
#[derive(Clone, Debug, Default)]
pub struct EventLogQuery {
    /// Match events emitted by this source actor.
    pub agent_id: Option<String>,
    /// Match this event name exactly.
    pub name_exact: Option<String>,
    /// Match events whose name starts with this prefix (e.g. `task:`).
    pub name_prefix: Option<String>,
    /// Only events at or after this instant (RFC 3339).
    pub since: Option<String>,
    /// Only events before this instant (RFC 3339).
    pub until: Option<String>,
    /// Maximum rows returned.
    pub limit: Option<i64>,
}

const COLUMNS: &str = "id, name, agent_id, timestamp, payload, context_ref";

/// Event-log repository — stateless, every method takes `&Connection`.
pub struct EventLogRepo;

impl EventLogRepo {
    /// Append a recorded event.
    pub fn insert(conn: &Connection, row: &EventLogRow) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO event_log (id, name, agent_id, timestamp, payload, context_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.id,
                row.name,
                row.agent_id,
                row.timestamp,
                row.payload,
                row.context_ref,
            ],
        )?;
        Ok(())
    }

    /// Query recorded events, oldest first (replay order).
    pub fn query(conn: &Connection, query: &EventLogQuery) -> Result<Vec<EventLogRow>> {
        let mut sql = format!("SELECT {COLUMNS} FROM event_log WHERE 1=1");
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(agent_id) = &query.agent_id {
            values.push(SqlValue::from(agent_id.clone()));
            let _ = write!(sql, " AND agent_id = ?{}", values.len());
        }
        if let Some(name) = &query.name_exact {
            values.push(SqlValue::from(name.clone()));
            let _ = write!(sql, " AND name = ?{}", values.len());
        }
        if let Some(prefix) = &query.name_prefix {
            values.push(SqlValue::from(i64::try_from(prefix.len()).unwrap_or(i64::MAX)));
            let len_param = values.len();
            values.push(SqlValue::from(prefix.clone()));
            let _ = write!(sql, " AND substr(name, 1, ?{len_param}) = ?{}", values.len());
        }
        if let Some(since) = &query.since {
            values.push(SqlValue::from(since.clone()));
            let _ = write!(sql, " AND timestamp >= ?{}", values.len());
        }
        if let Some(until) = &query.until {
            values.push(SqlValue::from(until.clone()));
            let _ = write!(sql, " AND timestamp < ?{}", values.len());
        }

        sql.push_str(" ORDER BY timestamp ASC, id ASC");
        if let Some(limit) = query.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total recorded event count.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventLogRow> {
        Ok(EventLogRow {
            id: row.get(0)?,
            name: row.get(1)?,
            agent_id: row.get(2)?,
            timestamp: row.get(3)?,
            payload: row.get(4)?,
            context_ref: row.get(5)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
