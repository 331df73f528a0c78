//! The cold-tier writer.
//!
//! All durable writes go through one dedicated task draining a bounded
//! queue — the single-writer half of the store discipline (readers query
//! independently through the pool). Each batch runs on the blocking thread
//! pool so the event loop never stalls on disk.
//!
//! Context batches carry an optional acknowledgement channel; the migration
//! sweep awaits the ack before evicting hot entries (copy-then-evict).

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use weft_store::repositories::{ContextRepo, EventLogRepo};
use weft_store::row_types::{ContextRow, EventLogRow};
use weft_store::ConnectionPool;

/// A unit of work for the writer task.
#[derive(Debug)]
pub enum WriteJob {
    /// Persist context rows; ack (if present) fires after commit.
    Contexts {
        /// Rows to insert (idempotent).
        rows: Vec<ContextRow>,
        /// Fired once the rows are durable.
        ack: Option<oneshot::Sender<()>>,
    },
    /// Append recorded events.
    Events {
        /// Rows to append.
        rows: Vec<EventLogRow>,
    },
}

/// Handle to the writer task's queue.
#[derive(Clone)]
pub struct ColdWriter {
    tx: mpsc::Sender<WriteJob>,
}

impl ColdWriter {
    /// Spawn the writer task over the given pool with a bounded queue.
    #[must_use]
    pub fn spawn(pool: ConnectionPool, queue_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<WriteJob>(queue_size.max(1));
        drop(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let pool = pool.clone();
                let result = tokio::task::spawn_blocking(move || apply_job(&pool, job)).await;
                if let Err(join_error) = result {
                    warn!(error = %join_error, "cold writer batch task failed");
                }
            }
            debug!("cold writer drained and stopped");
        }));
        Self { tx }
    }

    /// Enqueue a job, waiting for queue space. Returns `false` if the writer
    /// task is gone.
    pub async fn submit(&self, job: WriteJob) -> bool {
        self.tx.send(job).await.is_ok()
    }

    /// Enqueue a job without waiting. Used for observability writes that may
    /// be dropped under pressure rather than stall dispatch.
    pub fn try_submit(&self, job: WriteJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("cold writer queue full; dropping batch");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Wait until every previously enqueued job has committed.
    pub async fn flush(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if !self
            .submit(WriteJob::Contexts {
                rows: Vec::new(),
                ack: Some(ack_tx),
            })
            .await
        {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

fn apply_job(pool: &ConnectionPool, job: WriteJob) {
    match job {
        WriteJob::Contexts { rows, ack } => {
            if let Err(error) = write_contexts(pool, &rows) {
                warn!(error = %error, count = rows.len(), "context batch write failed");
            } else if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
        WriteJob::Events { rows } => {
            if let Err(error) = write_events(pool, &rows) {
                warn!(error = %error, count = rows.len(), "event batch write failed");
            }
        }
    }
}

fn write_contexts(pool: &ConnectionPool, rows: &[ContextRow]) -> weft_store::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    for row in rows {
        ContextRepo::insert(&tx, row)?;
    }
    tx.commit()?;
    Ok(())
}

fn write_events(pool: &ConnectionPool, rows: &[EventLogRow]) -> weft_store::Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let conn = pool.get()?;
    let tx = conn.unchecked_transaction()?;
    for row in rows {
        EventLogRepo::insert(&tx, row)?;
    }
    tx.commit()?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::connection::{self, ConnectionConfig};
    use weft_store::migrations::run_migrations;
    use weft_store::repositories::EventLogQuery;

    fn setup_pool() -> ConnectionPool {
        let pool = connection::new_in_memory(&ConnectionConfig::default()).unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = run_migrations(&conn).unwrap();
        }
        pool
    }

    fn make_context_row(reference: &str) -> ContextRow {
        ContextRow {
            reference: reference.to_string(),
            event_id: "e1".to_string(),
            correlation_id: "c1".to_string(),
            parent_event_id: None,
            root_event_id: "e0".to_string(),
            depth: 0,
            agent_id: None,
            session_id: None,
            client_id: None,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            fields: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn contexts_ack_after_commit() {
        let pool = setup_pool();
        let writer = ColdWriter::spawn(pool.clone(), 16);

        let (ack_tx, ack_rx) = oneshot::channel();
        assert!(
            writer
                .submit(WriteJob::Contexts {
                    rows: vec![make_context_row("ctx_a")],
                    ack: Some(ack_tx),
                })
                .await
        );
        ack_rx.await.unwrap();

        let conn = pool.get().unwrap();
        assert!(ContextRepo::get_by_ref(&conn, "ctx_a").unwrap().is_some());
    }

    #[tokio::test]
    async fn events_write_through_queue() {
        let pool = setup_pool();
        let writer = ColdWriter::spawn(pool.clone(), 16);

        assert!(writer.try_submit(WriteJob::Events {
            rows: vec![EventLogRow {
                id: "1".to_string(),
                name: "task:done".to_string(),
                agent_id: Some("b".to_string()),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                payload: "{}".to_string(),
                context_ref: None,
            }],
        }));
        assert!(writer.flush().await);

        let conn = pool.get().unwrap();
        let rows = EventLogRepo::query(&conn, &EventLogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn flush_drains_in_order() {
        let pool = setup_pool();
        let writer = ColdWriter::spawn(pool.clone(), 16);

        for i in 0..10 {
            assert!(
                writer
                    .submit(WriteJob::Contexts {
                        rows: vec![make_context_row(&format!("ctx_{i}"))],
                        ack: None,
                    })
                    .await
            );
        }
        assert!(writer.flush().await);

        let conn = pool.get().unwrap();
        assert_eq!(ContextRepo::count(&conn).unwrap(), 10);
    }
}
