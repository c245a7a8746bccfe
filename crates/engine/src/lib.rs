pub mod audit;
pub mod collateral;
pub mod drift;
pub mod monitor;
pub mod persistence;
pub mod position_store;
pub mod price_table;
pub mod service;
pub mod submission;
