//! Durable copy of the position ledger.
//!
//! The store stays authoritative in memory; a [`PositionSink`] receives every
//! open and every status change before the in-memory state is updated, and the
//! PostgreSQL implementation reloads the ledger at startup.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use scos_common::error::AppError;
use scos_common::types::{Position, PositionId, PositionStatus};

pub type PersistFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

/// Write-through target for position changes.
pub trait PositionSink: Send + Sync {
    fn insert<'a>(&'a self, position: &'a Position) -> PersistFuture<'a>;

    /// Persist `position`'s new status, which must have been `from` before.
    fn update_status<'a>(
        &'a self,
        position: &'a Position,
        from: PositionStatus,
    ) -> PersistFuture<'a>;
}

#[derive(sqlx::FromRow)]
struct PositionRow {
    id: i64,
    user_address: String,
    asset: String,
    token_address: String,
    network: String,
    collateral_amount: Decimal,
    borrowed_amount: Decimal,
    entry_price: Decimal,
    status: PositionStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PositionRow> for Position {
    type Error = AppError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        let id = PositionId::try_from(row.id)
            .map_err(|_| AppError::InconsistentState(format!("negative position id {}", row.id)))?;
        Ok(Position {
            id,
            user: row.user_address,
            asset: row.asset,
            token_address: row.token_address,
            network: row.network,
            collateral_amount: row.collateral_amount,
            borrowed_amount: row.borrowed_amount,
            entry_price: row.entry_price,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed position ledger using the `positions` table.
#[derive(Clone)]
pub struct PgPositionRepository {
    pool: PgPool,
}

impl PgPositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every stored position, ordered by id.
    pub async fn load(&self) -> Result<Vec<Position>, AppError> {
        let rows: Vec<PositionRow> = sqlx::query_as(
            r#"
            SELECT id, user_address, asset, token_address, network,
                   collateral_amount, borrowed_amount, entry_price,
                   status, created_at, updated_at
            FROM positions
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Position::try_from).collect()
    }
}

fn db_id(id: PositionId) -> Result<i64, AppError> {
    i64::try_from(id).map_err(|_| AppError::Internal(format!("position id {} exceeds BIGINT", id)))
}

impl PositionSink for PgPositionRepository {
    fn insert<'a>(&'a self, position: &'a Position) -> PersistFuture<'a> {
        Box::pin(async move {
            sqlx::query(
                r#"
                INSERT INTO positions (id, user_address, asset, token_address, network,
                                       collateral_amount, borrowed_amount, entry_price,
                                       status, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(db_id(position.id)?)
            .bind(&position.user)
            .bind(&position.asset)
            .bind(&position.token_address)
            .bind(&position.network)
            .bind(position.collateral_amount)
            .bind(position.borrowed_amount)
            .bind(position.entry_price)
            .bind(position.status)
            .bind(position.created_at)
            .bind(position.updated_at)
            .execute(&self.pool)
            .await?;

            tracing::debug!(position_id = position.id, "Position persisted");
            Ok(())
        })
    }

    fn update_status<'a>(
        &'a self,
        position: &'a Position,
        from: PositionStatus,
    ) -> PersistFuture<'a> {
        Box::pin(async move {
            let result = sqlx::query(
                r#"
                UPDATE positions
                SET status = $2, updated_at = $3
                WHERE id = $1 AND status = $4
                "#,
            )
            .bind(db_id(position.id)?)
            .bind(position.status)
            .bind(position.updated_at)
            .bind(from)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() != 1 {
                return Err(AppError::InconsistentState(format!(
                    "stored position {} is no longer {}",
                    position.id, from
                )));
            }

            tracing::debug!(
                position_id = position.id,
                status = %position.status,
                "Position status persisted"
            );
            Ok(())
        })
    }
}
