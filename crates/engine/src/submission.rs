//! Ledger submission collaborator.
//!
//! A [`Submitter`] turns a decided [`LedgerAction`] into an irreversible effect on a
//! settlement network and returns the external transaction id. Callers never hold
//! a store or price lock while a submission is in flight, and every submission is
//! bounded by [`submit_with_timeout`]: a timeout is a failure, never assumed success.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use scos_common::error::AppError;

/// External transaction identifier (e.g. a transaction hash).
pub type TxId = String;

/// Action to settle on a network.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LedgerAction {
    Stake {
        asset: String,
        token_address: String,
        collateral_amount: Decimal,
        borrowed_amount: Decimal,
    },
    Unstake {
        asset: String,
        token_address: String,
    },
    Liquidate {
        user: String,
        asset: String,
        token_address: String,
        current_price: Decimal,
    },
}

impl LedgerAction {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerAction::Stake { .. } => "stake",
            LedgerAction::Unstake { .. } => "unstake",
            LedgerAction::Liquidate { .. } => "liquidate",
        }
    }
}

/// Failure reported by a submitter.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("network {0} is not configured")]
    UnsupportedNetwork(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

pub type SubmitFuture<'a> = Pin<Box<dyn Future<Output = Result<TxId, SubmitError>> + Send + 'a>>;

/// Settlement backend for ledger actions.
pub trait Submitter: Send + Sync {
    /// Whether `network` can be submitted to at all.
    fn supports(&self, network: &str) -> bool;

    /// Submit `action` on `network`, resolving to the external transaction id.
    fn submit<'a>(&'a self, network: &'a str, action: &'a LedgerAction) -> SubmitFuture<'a>;
}

/// Submit with an upper bound on wall time.
///
/// Both a submitter error and an elapsed timeout map to `SubmissionFailed`.
pub async fn submit_with_timeout(
    submitter: &dyn Submitter,
    network: &str,
    action: &LedgerAction,
    timeout: Duration,
) -> Result<TxId, AppError> {
    match tokio::time::timeout(timeout, submitter.submit(network, action)).await {
        Ok(Ok(tx_id)) => {
            tracing::info!(
                network,
                action = action.name(),
                tx_id = %tx_id,
                "Ledger submission accepted"
            );
            Ok(tx_id)
        }
        Ok(Err(e)) => {
            tracing::warn!(network, action = action.name(), error = %e, "Ledger submission failed");
            Err(AppError::SubmissionFailed(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(
                network,
                action = action.name(),
                timeout_ms = timeout.as_millis() as u64,
                "Ledger submission timed out"
            );
            Err(AppError::SubmissionFailed(format!(
                "{} on {} timed out after {:?}",
                action.name(),
                network,
                timeout
            )))
        }
    }
}
