//! Audit repository — immutable trail of rule mutations.
//!
//! Entries are append-only and never deleted; audit history outlives the
//! rules it describes.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use std::fmt::Write as _;

use crate::errors::Result;
use crate::row_types::AuditRow;

/// Parameters for appending an audit entry.
#[derive(Clone, Debug)]
pub struct AppendAuditParams<'a> {
    /// Operation name (`add`, `update`, `delete`, `ttl_expired`, `restore`).
    pub operation: &'a str,
    /// Rule the operation touched.
    pub rule_id: &'a str,
    /// Actor that performed the operation.
    pub actor: &'a str,
    /// Operation time (RFC 3339).
    pub timestamp: &'a str,
    /// Serialized rule state before the operation.
    pub before_state: Option<&'a str>,
    /// Serialized rule state after the operation.
    pub after_state: Option<&'a str>,
}

/// Filters for querying the audit trail.
#[derive(Clone, Debug, Default)]
pub struct AuditQuery {
    /// Match entries for this rule.
    pub rule_id: Option<String>,
    /// Match entries with this operation name.
    pub operation: Option<String>,
    /// Maximum rows returned.
    pub limit: Option<i64>,
}

const COLUMNS: &str = "id, operation, rule_id, actor, timestamp, before_state, after_state";

/// Audit repository — stateless, every method takes `&Connection`.
pub struct AuditRepo;

impl AuditRepo {
    /// Append an immutable audit entry. Returns the entry ID.
    pub fn append(conn: &Connection, entry: &AppendAuditParams<'_>) -> Result<i64> {
        let _ = conn.execute(
            "INSERT INTO rule_audit (operation, rule_id, actor, timestamp, before_state, after_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.operation,
                entry.rule_id,
                entry.actor,
                entry.timestamp,
                entry.before_state,
                entry.after_state,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Query audit entries, oldest first.
    pub fn query(conn: &Connection, query: &AuditQuery) -> Result<Vec<AuditRow>> {
        let mut sql = format!("SELECT {COLUMNS} FROM rule_audit WHERE 1=1");
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(rule_id) = &query.rule_id {
            values.push(SqlValue::from(rule_id.clone()));
            let _ = write!(sql, " AND rule_id = ?{}", values.len());
        }
        if let Some(operation) = &query.operation {
            values.push(SqlValue::from(operation.clone()));
            let _ = write!(sql, " AND operation = ?{}", values.len());
        }

        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = query.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total audit entry count.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rule_audit", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
        Ok(AuditRow {
            id: row.get(0)?,
            operation: row.get(1)?,
            rule_id: row.get(2)?,
            actor: row.get(3)?,
            timestamp: row.get(4)?,
            before_state: row.get(5)?,
            after_state: row.get(6)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
