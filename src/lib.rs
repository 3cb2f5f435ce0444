/// Opinion.trade task bot
///
/// Runs market making and liquidation strategies as independently
/// startable and stoppable tasks against the Opinion.trade prediction
/// market. Each task polls on its own interval, logs to a bounded
/// per-task stream and records fills in a SQLite ledger.

pub mod alerts;
pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod exchange;
pub mod orderbook;
pub mod preview;
pub mod pricing;
pub mod retry;
pub mod strategies;
pub mod task;
pub mod task_log;
pub mod token_store;
pub mod trade_db;
pub mod types;
