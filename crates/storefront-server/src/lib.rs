//! Storefront checkout service.
//!
//! Orders are created PENDING by the [`ledger`], paid on the gateway's hosted
//! page, and moved to COMPLETED or FAILED by the [`settlement`] handler when
//! the gateway calls back.

pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod routes;
pub mod settlement;
pub mod state;

pub use config::ServerConfig;
pub use db::Database;
pub use error::StoreError;
pub use ledger::OrderLedger;
pub use settlement::{SettlementHandler, SignaturePolicy};
pub use state::AppState;
