//! On-chain settlement for ledger actions.

pub mod units;
pub mod vault;

pub use vault::VaultSubmitter;
