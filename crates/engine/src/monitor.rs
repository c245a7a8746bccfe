//! Liquidation monitor: periodic sweep over active positions.
//!
//! Each tick takes one snapshot of the active positions and one of the price
//! table, then evaluates every position against the price of its own asset.
//! Breaches are submitted for liquidation one at a time with no lock held; a
//! position whose submission fails stays `Active` and is re-evaluated next tick.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use scos_common::error::AppError;
use scos_common::types::{
    Position, PositionStatus, TransactionKind, TransactionRecord, TransactionStatus,
};

use crate::audit::{AuditLog, record_detached};
use crate::collateral::{self, CollateralParams};
use crate::position_store::PositionStore;
use crate::price_table::{PriceSnapshot, PriceTable};
use crate::submission::{LedgerAction, Submitter, submit_with_timeout};

/// Outcome counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Active positions that had a price to evaluate against.
    pub evaluated: usize,
    /// Positions with no price in the snapshot.
    pub unpriced: usize,
    pub breached: usize,
    pub liquidated: usize,
    /// Breaches whose submission failed; left active for the next tick.
    pub failed: usize,
    /// Breaches that were closed by another caller before the transition.
    pub stale: usize,
}

enum Outcome {
    Liquidated,
    Failed,
    Stale,
}

pub struct LiquidationMonitor {
    prices: Arc<PriceTable>,
    positions: Arc<PositionStore>,
    submitter: Arc<dyn Submitter>,
    audit: Arc<dyn AuditLog>,
    params: CollateralParams,
    interval: Duration,
    submission_timeout: Duration,
}

impl LiquidationMonitor {
    pub fn new(
        prices: Arc<PriceTable>,
        positions: Arc<PositionStore>,
        submitter: Arc<dyn Submitter>,
        audit: Arc<dyn AuditLog>,
        params: CollateralParams,
        interval: Duration,
        submission_timeout: Duration,
    ) -> Self {
        Self {
            prices,
            positions,
            submitter,
            audit,
            params,
            interval,
            submission_timeout,
        }
    }

    /// Run sweeps on the configured interval until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.interval.as_secs(),
            drop_threshold = %self.params.drop_threshold,
            "Liquidation monitor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.breached > 0 {
                        tracing::info!(?report, "Liquidation sweep finished");
                    } else {
                        tracing::debug!(?report, "Liquidation sweep finished");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Liquidation monitor stopped");
    }

    /// One sweep over the current snapshots.
    pub async fn tick(&self) -> SweepReport {
        let active = self.positions.list_active().await;
        let prices = self.prices.snapshot().await;
        self.sweep(&active, &prices).await
    }

    /// Evaluate `active` positions against `prices` and liquidate breaches.
    pub async fn sweep(&self, active: &[Position], prices: &PriceSnapshot) -> SweepReport {
        let mut report = SweepReport::default();

        for position in active {
            let Some(current_price) = prices.price(&position.asset) else {
                tracing::debug!(
                    position_id = position.id,
                    asset = %position.asset,
                    "No price for asset, skipping"
                );
                report.unpriced += 1;
                continue;
            };
            report.evaluated += 1;

            if !collateral::is_liquidatable(
                position.entry_price,
                current_price,
                self.params.drop_threshold,
            ) {
                continue;
            }
            report.breached += 1;

            tracing::warn!(
                position_id = position.id,
                user = %position.user,
                asset = %position.asset,
                entry_price = %position.entry_price,
                current_price = %current_price,
                price_drop = ?collateral::price_drop(position.entry_price, current_price),
                "Liquidation threshold breached"
            );

            match self.liquidate(position, current_price).await {
                Outcome::Liquidated => report.liquidated += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Stale => report.stale += 1,
            }
        }

        report
    }

    async fn liquidate(&self, position: &Position, current_price: Decimal) -> Outcome {
        let action = LedgerAction::Liquidate {
            user: position.user.clone(),
            asset: position.asset.clone(),
            token_address: position.token_address.clone(),
            current_price,
        };

        let tx_id = match submit_with_timeout(
            self.submitter.as_ref(),
            &position.network,
            &action,
            self.submission_timeout,
        )
        .await
        {
            Ok(tx_id) => tx_id,
            Err(e) => {
                tracing::warn!(
                    position_id = position.id,
                    error = %e,
                    "Liquidation submission failed; position stays active"
                );
                record_detached(
                    &self.audit,
                    TransactionRecord::new(
                        &position.user,
                        TransactionKind::Liquidate,
                        None,
                        &position.network,
                        TransactionStatus::Failed,
                    ),
                );
                return Outcome::Failed;
            }
        };

        match self
            .positions
            .transition(position.id, PositionStatus::Active, PositionStatus::Liquidated)
            .await
        {
            Ok(_) => {
                record_detached(
                    &self.audit,
                    TransactionRecord::new(
                        &position.user,
                        TransactionKind::Liquidate,
                        Some(tx_id.clone()),
                        &position.network,
                        TransactionStatus::Completed,
                    ),
                );
                tracing::info!(position_id = position.id, tx_id = %tx_id, "Position liquidated");
                Outcome::Liquidated
            }
            Err(AppError::StaleState { actual, .. }) => {
                tracing::warn!(
                    position_id = position.id,
                    status = %actual,
                    tx_id = %tx_id,
                    "Position closed concurrently; dropping liquidation"
                );
                Outcome::Stale
            }
            Err(e) => {
                tracing::error!(
                    position_id = position.id,
                    tx_id = %tx_id,
                    error = %e,
                    "Liquidation submitted but could not be recorded"
                );
                Outcome::Failed
            }
        }
    }
}
