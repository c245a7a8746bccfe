//! Audit trail: append-only transaction records.
//!
//! The core only appends; nothing reads the trail back to make decisions.
//! Appends are best-effort: [`record_detached`] spawns the write so a slow or
//! failing sink never changes the outcome of the operation being audited.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use sqlx::PgPool;

use scos_common::error::AppError;
use scos_common::types::TransactionRecord;

pub type AuditFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

/// Sink for transaction records.
pub trait AuditLog: Send + Sync {
    fn record(&self, record: TransactionRecord) -> AuditFuture<'_>;
}

/// Append `record` in a background task, logging failures.
pub fn record_detached(audit: &Arc<dyn AuditLog>, record: TransactionRecord) {
    let audit = audit.clone();
    tokio::spawn(async move {
        let id = record.id;
        let kind = record.kind;
        if let Err(e) = audit.record(record).await {
            tracing::error!(
                record_id = %id,
                kind = %kind,
                error = %e,
                "Failed to append audit record"
            );
        }
    });
}

/// PostgreSQL-backed audit log writing to the `transactions` table.
#[derive(Clone)]
pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditLog for PgAuditLog {
    fn record(&self, record: TransactionRecord) -> AuditFuture<'_> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO transactions
                    (id, user_address, kind, tx_id, network, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(record.id)
            .bind(&record.user_address)
            .bind(record.kind.to_string())
            .bind(&record.tx_id)
            .bind(&record.network)
            .bind(record.status.to_string())
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;

            tracing::debug!(record_id = %record.id, kind = %record.kind, "Audit record appended");
            Ok(())
        })
    }
}

/// Audit log that only emits each record as a structured log event.
///
/// Used when no database is configured; nothing is retained in memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, record: TransactionRecord) -> AuditFuture<'_> {
        Box::pin(async move {
            tracing::info!(
                record_id = %record.id,
                user = %record.user_address,
                kind = %record.kind,
                status = %record.status,
                tx_id = record.tx_id.as_deref().unwrap_or("-"),
                network = %record.network,
                "Audit record"
            );
            Ok(())
        })
    }
}

/// In-process audit log that keeps every record; for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: Mutex<Vec<TransactionRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record appended so far, in append order.
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, record: TransactionRecord) -> AuditFuture<'_> {
        Box::pin(async move {
            self.records
                .lock()
                .map_err(|_| AppError::Internal("audit log lock poisoned".to_string()))?
                .push(record);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scos_common::types::{TransactionKind, TransactionStatus};

    #[tokio::test]
    async fn test_memory_log_appends_in_order() {
        let log = MemoryAuditLog::new();
        log.record(TransactionRecord::new(
            "0xa",
            TransactionKind::Stake,
            Some("0x1".to_string()),
            "reddio",
            TransactionStatus::Pending,
        ))
        .await
        .unwrap();
        log.record(TransactionRecord::new(
            "0xa",
            TransactionKind::Liquidate,
            None,
            "reddio",
            TransactionStatus::Failed,
        ))
        .await
        .unwrap();

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, TransactionKind::Stake);
        assert_eq!(records[1].tx_id, None);
    }

    #[tokio::test]
    async fn test_tracing_log_accepts_every_kind() {
        let sink: Arc<dyn AuditLog> = Arc::new(TracingAuditLog);
        for (kind, tx_id, status) in [
            (TransactionKind::Stake, Some("0x1"), TransactionStatus::Pending),
            (TransactionKind::Unstake, None, TransactionStatus::Failed),
            (TransactionKind::Liquidate, Some("0x2"), TransactionStatus::Completed),
        ] {
            let record =
                TransactionRecord::new("0xa", kind, tx_id.map(str::to_string), "reddio", status);
            sink.record(record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_record_detached_eventually_appends() {
        let log = Arc::new(MemoryAuditLog::new());
        let sink: Arc<dyn AuditLog> = log.clone();
        record_detached(
            &sink,
            TransactionRecord::new(
                "0xa",
                TransactionKind::Buy,
                None,
                "reddio",
                TransactionStatus::Pending,
            ),
        );

        for _ in 0..100 {
            if !log.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(log.len(), 1);
    }
}
