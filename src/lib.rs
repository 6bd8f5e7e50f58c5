//! Strategy execution engine
//!
//! Runs trading strategies as managed jobs against on-chain wallets:
//! wallet mirroring, one-shot price triggers, price ladders and
//! signal-driven pair trading, backed by a durable SQLite ledger and a
//! shared price feed.

pub mod chain;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod holdings;
pub mod jobs;
pub mod models;
pub mod price_feed;
pub mod swap;
pub mod trigger;
pub mod valuation;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
