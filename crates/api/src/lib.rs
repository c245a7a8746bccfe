//! SCOS HTTP API: staking, redemption, prices and trade records.

pub mod response;
pub mod routes;
pub mod state;
