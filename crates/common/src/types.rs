use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic position identifier, never reused.
pub type PositionId = u64;

/// Canonical form of an account or token address: trimmed and lowercased.
///
/// Every address that takes part in position identity goes through this, so
/// lookups compare exactly.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}

/// Lifecycle status of a collateral position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Active,
    Redeemed,
    Liquidated,
}

impl PositionStatus {
    /// Whether `self -> to` is one of the allowed transitions.
    ///
    /// Only `Active` has outgoing edges; `Redeemed` and `Liquidated` are terminal.
    pub fn can_transition_to(self, to: PositionStatus) -> bool {
        matches!(
            (self, to),
            (PositionStatus::Active, PositionStatus::Redeemed)
                | (PositionStatus::Active, PositionStatus::Liquidated)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, PositionStatus::Active)
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Active => write!(f, "active"),
            PositionStatus::Redeemed => write!(f, "redeemed"),
            PositionStatus::Liquidated => write!(f, "liquidated"),
        }
    }
}

/// Uniqueness key for active positions: one per user, asset and network.
///
/// The user address is normalized on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub user: String,
    pub asset: String,
    pub network: String,
}

impl PositionKey {
    pub fn new(
        user: impl Into<String>,
        asset: impl Into<String>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            user: normalize_address(&user.into()),
            asset: asset.into(),
            network: network.into(),
        }
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.user, self.asset, self.network)
    }
}

/// A collateral-for-loan position.
///
/// `collateral_amount`, `borrowed_amount` and `entry_price` are fixed at open
/// time. Only `status` and `updated_at` change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user: String,
    /// Collateral symbol, also the price table key.
    pub asset: String,
    /// On-chain address of the collateral token.
    pub token_address: String,
    pub network: String,
    pub collateral_amount: Decimal,
    pub borrowed_amount: Decimal,
    pub entry_price: Decimal,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(&self.user, &self.asset, &self.network)
    }

    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }
}

/// Fields supplied when opening a position; the store assigns the rest.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub user: String,
    pub asset: String,
    pub token_address: String,
    pub network: String,
    pub collateral_amount: Decimal,
    pub borrowed_amount: Decimal,
    pub entry_price: Decimal,
}

impl NewPosition {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(&self.user, &self.asset, &self.network)
    }
}

/// Last known price for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub price: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// Kind of operation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Stake,
    Unstake,
    Buy,
    Sell,
    Liquidate,
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Stake => write!(f, "stake"),
            TransactionKind::Unstake => write!(f, "unstake"),
            TransactionKind::Buy => write!(f, "buy"),
            TransactionKind::Sell => write!(f, "sell"),
            TransactionKind::Liquidate => write!(f, "liquidate"),
        }
    }
}

/// Settlement status of an audited transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Pending => write!(f, "pending"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Append-only audit row. `tx_id == None` marks a failed submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub user_address: String,
    pub kind: TransactionKind,
    pub tx_id: Option<String>,
    pub network: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(
        user_address: impl Into<String>,
        kind: TransactionKind,
        tx_id: Option<String>,
        network: impl Into<String>,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_address: user_address.into(),
            kind,
            tx_id,
            network: network.into(),
            status,
            created_at: Utc::now(),
        }
    }
}
