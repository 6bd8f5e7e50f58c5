//! Per-strategy holdings and portfolio valuation models

use super::signal::TargetToken;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A token position in raw smallest units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPosition {
    pub mint: String,
    pub amount: Decimal,
}

impl TokenPosition {
    pub fn new(mint: impl Into<String>, amount: Decimal) -> Self {
        Self {
            mint: mint.into(),
            amount,
        }
    }

    pub fn zero(mint: impl Into<String>) -> Self {
        Self::new(mint, Decimal::ZERO)
    }
}

/// Durable per-strategy holdings, the source of truth a worker rehydrates
/// from on restart
///
/// Invariant at any settled state (modulo market movement): the combined
/// value of both sides never exceeds `total_allocated_sol` - a strategy is
/// never asked to trade more than its own recorded holdings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyHoldings {
    pub strategy_id: String,
    pub token_a: TokenPosition,
    pub token_b: TokenPosition,
    /// Native-asset amount originally allocated, in lamports
    pub total_allocated_sol: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl StrategyHoldings {
    /// The position for one side of the pair
    pub fn position(&self, side: TargetToken) -> &TokenPosition {
        match side {
            TargetToken::A => &self.token_a,
            TargetToken::B => &self.token_b,
        }
    }

    /// Mutable position for one side of the pair
    pub fn position_mut(&mut self, side: TargetToken) -> &mut TokenPosition {
        match side {
            TargetToken::A => &mut self.token_a,
            TargetToken::B => &mut self.token_b,
        }
    }

    /// Apply the settled amounts of a trade: the source side shrinks by the
    /// actually filled input, the destination grows by the actual output
    pub fn apply_fill(&mut self, sold: TargetToken, filled_input: Decimal, output: Decimal) {
        let source = self.position_mut(sold);
        source.amount -= filled_input;
        if source.amount < Decimal::ZERO {
            source.amount = Decimal::ZERO;
        }
        self.position_mut(sold.other()).amount += output;
        self.last_updated = Utc::now();
    }
}

/// Derived portfolio value of a strategy's holdings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioValue {
    pub token_a_value_usd: f64,
    pub token_b_value_usd: f64,
    pub total_value_usd: f64,
    /// `current value / initial allocation value`; None when the native-asset
    /// price is unavailable
    pub allocation_utilized: Option<f64>,
}
