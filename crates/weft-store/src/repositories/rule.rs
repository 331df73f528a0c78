//! Rule repository — durable mirror of routing rules.
//!
//! The in-memory rule table in `weft-rules` is authoritative at runtime; this
//! mirror exists so checkpoint restore can reconstruct rule records. Inserts
//! enforce the global `rule_id` uniqueness invariant.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::{Result, StoreError};
use crate::row_types::RuleRow;

const COLUMNS: &str = "rule_id, source_pattern, target_event, condition, mapping, priority, \
                       ttl_secs, expires_at, async_spec, created_at, created_by";

/// Rule repository — stateless, every method takes `&Connection`.
pub struct RuleRepo;

impl RuleRepo {
    /// Insert a rule record. Fails with [`StoreError::DuplicateKey`] if the
    /// rule ID already exists — no silent overwrite.
    pub fn insert(conn: &Connection, row: &RuleRow) -> Result<()> {
        let result = conn.execute(
            "INSERT INTO rules (rule_id, source_pattern, target_event, condition, mapping,
             priority, ttl_secs, expires_at, async_spec, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                row.rule_id,
                row.source_pattern,
                row.target_event,
                row.condition,
                row.mapping,
                row.priority,
                row.ttl_secs,
                row.expires_at,
                row.async_spec,
                row.created_at,
                row.created_by,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::DuplicateKey(row.rule_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace an existing rule record. Fails with [`StoreError::NotFound`]
    /// if the rule does not exist.
    pub fn update(conn: &Connection, row: &RuleRow) -> Result<()> {
        let changed = conn.execute(
            "UPDATE rules SET source_pattern = ?2, target_event = ?3, condition = ?4,
             mapping = ?5, priority = ?6, ttl_secs = ?7, expires_at = ?8, async_spec = ?9,
             created_at = ?10, created_by = ?11
             WHERE rule_id = ?1",
            params![
                row.rule_id,
                row.source_pattern,
                row.target_event,
                row.condition,
                row.mapping,
                row.priority,
                row.ttl_secs,
                row.expires_at,
                row.async_spec,
                row.created_at,
                row.created_by,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(row.rule_id.clone()));
        }
        Ok(())
    }

    /// Delete a rule record. Returns `true` if a row was removed.
    pub fn delete(conn: &Connection, rule_id: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM rules WHERE rule_id = ?1", params![rule_id])?;
        Ok(changed > 0)
    }

    /// Get a single rule by ID.
    pub fn get_by_id(conn: &Connection, rule_id: &str) -> Result<Option<RuleRow>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM rules WHERE rule_id = ?1"),
                params![rule_id],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// List all rules, priority descending then creation order.
    pub fn list_all(conn: &Connection) -> Result<Vec<RuleRow>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM rules ORDER BY priority DESC, created_at ASC"
        ))?;
        let rows = stmt
            .query_map([], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Total rule count.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;
        Ok(count)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RuleRow> {
        Ok(RuleRow {
            rule_id: row.get(0)?,
            source_pattern: row.get(1)?,
            target_event: row.get(2)?,
            condition: row.get(3)?,
            mapping: row.get(4)?,
            priority: row.get(5)?,
            ttl_secs: row.get(6)?,
            expires_at: row.get(7)?,
            async_spec: row.get(8)?,
            created_at: row.get(9)?,
            created_by: row.get(10)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
