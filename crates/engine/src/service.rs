//! Position service: user-facing stake and redeem operations.
//!
//! Every operation follows the same ordering: read a pre-submission snapshot,
//! release all locks, submit to the ledger, then commit the local change. A local
//! record therefore never exists for an action that did not happen; the reverse
//! gap (submitted but not recorded) surfaces as `InconsistentState`.
//!
//! User and token addresses are normalized at this boundary, so positions,
//! ledger actions and audit rows all carry the same spelling.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scos_common::error::AppError;
use scos_common::types::{
    NewPosition, Position, PositionKey, PositionStatus, TransactionKind, TransactionRecord,
    TransactionStatus, normalize_address,
};

use crate::audit::{AuditLog, record_detached};
use crate::collateral::{self, CollateralParams};
use crate::position_store::PositionStore;
use crate::price_table::PriceTable;
use crate::submission::{LedgerAction, Submitter, TxId, submit_with_timeout};

/// Parameters for opening a position.
#[derive(Debug, Clone, Deserialize)]
pub struct StakeParams {
    pub user: String,
    /// Collateral symbol used for pricing
    pub asset: String,
    pub token_address: String,
    pub network: String,
    pub collateral_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct StakeReceipt {
    pub position: Position,
    pub tx_id: TxId,
}

#[derive(Debug, Clone, Serialize)]
pub struct RedeemReceipt {
    pub position: Position,
    pub tx_id: TxId,
}

/// Aggregate of a user's active positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserSummary {
    pub address: String,
    pub scos_balance: Decimal,
    pub active_positions: usize,
}

/// Orchestrates price lookup, borrow sizing, submission and position bookkeeping.
pub struct PositionService {
    prices: Arc<PriceTable>,
    positions: Arc<PositionStore>,
    submitter: Arc<dyn Submitter>,
    audit: Arc<dyn AuditLog>,
    params: CollateralParams,
    submission_timeout: Duration,
}

impl PositionService {
    pub fn new(
        prices: Arc<PriceTable>,
        positions: Arc<PositionStore>,
        submitter: Arc<dyn Submitter>,
        audit: Arc<dyn AuditLog>,
        params: CollateralParams,
        submission_timeout: Duration,
    ) -> Self {
        Self {
            prices,
            positions,
            submitter,
            audit,
            params,
            submission_timeout,
        }
    }

    pub fn prices(&self) -> &Arc<PriceTable> {
        &self.prices
    }

    pub fn positions(&self) -> &Arc<PositionStore> {
        &self.positions
    }

    pub fn params(&self) -> CollateralParams {
        self.params
    }

    /// Post collateral and borrow SCOS against it.
    ///
    /// A collateral token backs at most one active position per user and
    /// network; staking it under a second symbol is rejected before submission.
    pub async fn stake(&self, params: &StakeParams) -> Result<StakeReceipt, AppError> {
        let params = &self.validate_stake(params)?;

        if let Ok(existing) = self
            .positions
            .find_active_by_token(&params.user, &params.token_address, &params.network)
            .await
        {
            if existing.asset != params.asset {
                return Err(AppError::InvalidInput(format!(
                    "token {} already backs active {} position {}",
                    params.token_address, existing.asset, existing.id
                )));
            }
        }

        let price = self
            .prices
            .get(&params.asset)
            .await
            .ok_or_else(|| AppError::PriceUnavailable(params.asset.clone()))?
            .price;

        let borrowed_amount = collateral::compute_borrow_amount(
            params.collateral_amount,
            price,
            self.params.collateral_ratio,
        )
        .inspect_err(|e| {
            tracing::error!(asset = %params.asset, error = %e, "Borrow amount computation failed");
        })?;

        let action = LedgerAction::Stake {
            asset: params.asset.clone(),
            token_address: params.token_address.clone(),
            collateral_amount: params.collateral_amount,
            borrowed_amount,
        };
        let tx_id = match submit_with_timeout(
            self.submitter.as_ref(),
            &params.network,
            &action,
            self.submission_timeout,
        )
        .await
        {
            Ok(tx_id) => tx_id,
            Err(e) => {
                self.audit_failure(&params.user, TransactionKind::Stake, &params.network);
                return Err(e);
            }
        };

        let new_position = NewPosition {
            user: params.user.clone(),
            asset: params.asset.clone(),
            token_address: params.token_address.clone(),
            network: params.network.clone(),
            collateral_amount: params.collateral_amount,
            borrowed_amount,
            entry_price: price,
        };

        let position = match self.positions.open(new_position).await {
            Ok(position) => position,
            Err(e) => {
                tracing::error!(
                    user = %params.user,
                    asset = %params.asset,
                    tx_id = %tx_id,
                    error = %e,
                    "Stake submitted but not recorded; manual reconciliation required"
                );
                record_detached(
                    &self.audit,
                    TransactionRecord::new(
                        &params.user,
                        TransactionKind::Stake,
                        Some(tx_id.clone()),
                        &params.network,
                        TransactionStatus::Pending,
                    ),
                );
                return Err(AppError::InconsistentState(match e {
                    AppError::DuplicateActivePosition(key) => format!(
                        "stake transaction {} was submitted but {} already has an active position",
                        tx_id, key
                    ),
                    other => format!(
                        "stake transaction {} was submitted but not recorded: {}",
                        tx_id, other
                    ),
                }));
            }
        };

        record_detached(
            &self.audit,
            TransactionRecord::new(
                &position.user,
                TransactionKind::Stake,
                Some(tx_id.clone()),
                &position.network,
                TransactionStatus::Pending,
            ),
        );

        tracing::info!(
            position_id = position.id,
            borrowed = %position.borrowed_amount,
            entry_price = %position.entry_price,
            tx_id = %tx_id,
            "Stake completed"
        );

        Ok(StakeReceipt { position, tx_id })
    }

    /// Close the caller's active position and release the collateral.
    pub async fn redeem(
        &self,
        user: &str,
        asset: &str,
        network: &str,
    ) -> Result<RedeemReceipt, AppError> {
        let key = PositionKey::new(user, asset, network);
        let position = self.positions.find_active(&key).await?;
        self.redeem_position(position).await
    }

    /// Redeem by collateral token address instead of symbol.
    pub async fn redeem_by_token(
        &self,
        user: &str,
        token_address: &str,
        network: &str,
    ) -> Result<RedeemReceipt, AppError> {
        let position = self
            .positions
            .find_active_by_token(user, token_address, network)
            .await?;
        self.redeem_position(position).await
    }

    async fn redeem_position(&self, position: Position) -> Result<RedeemReceipt, AppError> {
        let action = LedgerAction::Unstake {
            asset: position.asset.clone(),
            token_address: position.token_address.clone(),
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
                self.audit_failure(&position.user, TransactionKind::Unstake, &position.network);
                return Err(e);
            }
        };

        let redeemed = match self
            .positions
            .transition(position.id, PositionStatus::Active, PositionStatus::Redeemed)
            .await
        {
            Ok(redeemed) => redeemed,
            Err(AppError::StaleState {
                id,
                expected,
                actual,
            }) => {
                tracing::error!(
                    position_id = id,
                    status = %actual,
                    tx_id = %tx_id,
                    "Unstake submitted but position already closed"
                );
                return Err(match actual {
                    PositionStatus::Liquidated => AppError::ConflictingLiquidation(id),
                    _ => AppError::StaleState {
                        id,
                        expected,
                        actual,
                    },
                });
            }
            Err(e) => {
                tracing::error!(
                    position_id = position.id,
                    tx_id = %tx_id,
                    error = %e,
                    "Unstake submitted but not recorded; manual reconciliation required"
                );
                return Err(AppError::InconsistentState(format!(
                    "unstake transaction {} was submitted but position {} was not updated: {}",
                    tx_id, position.id, e
                )));
            }
        };

        record_detached(
            &self.audit,
            TransactionRecord::new(
                &redeemed.user,
                TransactionKind::Unstake,
                Some(tx_id.clone()),
                &redeemed.network,
                TransactionStatus::Pending,
            ),
        );

        tracing::info!(position_id = redeemed.id, tx_id = %tx_id, "Redeem completed");

        Ok(RedeemReceipt {
            position: redeemed,
            tx_id,
        })
    }

    /// Record a buy or sell order in the audit trail. No ledger submission is made.
    pub fn record_trade(
        &self,
        user: &str,
        network: &str,
        kind: TransactionKind,
    ) -> Result<TransactionRecord, AppError> {
        if !matches!(kind, TransactionKind::Buy | TransactionKind::Sell) {
            return Err(AppError::InvalidInput(format!(
                "{} is not a trade kind",
                kind
            )));
        }
        require_non_empty("user_address", user)?;
        self.require_network(network)?;

        let user = normalize_address(user);
        let record =
            TransactionRecord::new(&user, kind, None, network, TransactionStatus::Pending);
        record_detached(&self.audit, record.clone());
        Ok(record)
    }

    /// Total SCOS borrowed across the user's active positions.
    pub async fn user_summary(&self, user: &str) -> UserSummary {
        let user = normalize_address(user);
        let active: Vec<Position> = self
            .positions
            .list_by_user(&user)
            .await
            .into_iter()
            .filter(Position::is_active)
            .collect();

        UserSummary {
            address: user,
            scos_balance: active.iter().map(|p| p.borrowed_amount).sum(),
            active_positions: active.len(),
        }
    }

    /// Checks the request and returns it with normalized addresses.
    fn validate_stake(&self, params: &StakeParams) -> Result<StakeParams, AppError> {
        require_non_empty("user_address", &params.user)?;
        require_non_empty("stock_symbol", &params.asset)?;
        require_non_empty("token_address", &params.token_address)?;
        self.require_network(&params.network)?;
        if params.collateral_amount <= Decimal::ZERO {
            return Err(AppError::InvalidInput(format!(
                "amount must be positive, got {}",
                params.collateral_amount
            )));
        }
        Ok(StakeParams {
            user: normalize_address(&params.user),
            token_address: normalize_address(&params.token_address),
            ..params.clone()
        })
    }

    fn require_network(&self, network: &str) -> Result<(), AppError> {
        if !self.submitter.supports(network) {
            return Err(AppError::InvalidInput(format!(
                "Network {} is not supported",
                network
            )));
        }
        Ok(())
    }

    fn audit_failure(&self, user: &str, kind: TransactionKind, network: &str) {
        record_detached(
            &self.audit,
            TransactionRecord::new(user, kind, None, network, TransactionStatus::Failed),
        );
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}
