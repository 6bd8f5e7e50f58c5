//! Domain models: jobs, signals, trades, holdings

pub mod holdings;
pub mod job;
pub mod signal;
pub mod trade;

pub use holdings::{PortfolioValue, StrategyHoldings, TokenPosition};
pub use job::{
    push_recent_transaction, Job, JobKind, Level, LevelKind, LevelSizing, LevelsMode,
    PriceDirection, ProfitTracking, RECENT_TRANSACTIONS_CAP,
};
pub use signal::{PairTradeSignal, ProcessingResult, SignalAction, TargetToken};
pub use trade::{ExecutionStatus, TradeRecord};
