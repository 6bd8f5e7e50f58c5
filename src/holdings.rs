//! Holdings tracking and portfolio valuation
//!
//! Thin service over the durable tables: upserts per-strategy positions,
//! appends to the trade ledger and derives USD portfolio value from the
//! shared price feed.

use crate::db::{self, DbPool};
use crate::error::{AppError, AppResult};
use crate::models::{PortfolioValue, StrategyHoldings, TradeRecord};
use crate::price_feed::PriceFeedService;
use crate::constants::{SOL_DECIMALS, SOL_MINT, USDC_DECIMALS, USDC_MINT};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

pub struct HoldingsTracker {
    pool: DbPool,
    price_feed: Arc<PriceFeedService>,
    /// Raw-unit decimals per known mint; unknown mints are valued at zero
    decimals: HashMap<String, u32>,
}

impl HoldingsTracker {
    pub fn new(pool: DbPool, price_feed: Arc<PriceFeedService>) -> Self {
        let mut decimals = HashMap::new();
        decimals.insert(SOL_MINT.to_string(), SOL_DECIMALS);
        decimals.insert(USDC_MINT.to_string(), USDC_DECIMALS);

        Self {
            pool,
            price_feed,
            decimals,
        }
    }

    /// Register decimals for a mint so it can be valued
    pub fn register_mint(&mut self, mint: &str, decimals: u32) {
        self.decimals.insert(mint.to_string(), decimals);
    }

    /// Persist a strategy's positions (insert or update)
    pub async fn update_holdings(&self, holdings: &StrategyHoldings) -> AppResult<()> {
        db::upsert_holdings(&self.pool, holdings).await?;
        tracing::debug!(
            strategy_id = %holdings.strategy_id,
            token_a_amount = %holdings.token_a.amount,
            token_b_amount = %holdings.token_b.amount,
            "Holdings updated"
        );
        Ok(())
    }

    pub async fn get_holdings(&self, strategy_id: &str) -> AppResult<Option<StrategyHoldings>> {
        db::get_holdings(&self.pool, strategy_id).await
    }

    /// Append a trade row, returning its ledger id
    pub async fn record_trade(&self, trade: &TradeRecord) -> AppResult<i64> {
        db::insert_trade(&self.pool, trade).await
    }

    /// Move a pending trade row to its terminal status
    pub async fn finalize_trade(&self, id: i64, trade: &TradeRecord) -> AppResult<()> {
        db::finalize_trade(&self.pool, id, trade).await
    }

    pub async fn get_trade_history(&self, strategy_id: &str) -> AppResult<Vec<TradeRecord>> {
        db::get_trades_for_strategy(&self.pool, strategy_id).await
    }

    /// Current USD value of a strategy's holdings
    ///
    /// Tokens with no usable price contribute zero rather than failing the
    /// whole valuation. `allocation_utilized` is only computed when the
    /// native-asset price is available.
    pub async fn calculate_portfolio_value(&self, strategy_id: &str) -> AppResult<PortfolioValue> {
        let holdings = self
            .get_holdings(strategy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no holdings for strategy {}", strategy_id)))?;

        let token_a_value_usd = self.position_value_usd(&holdings.token_a.mint, holdings.token_a.amount);
        let token_b_value_usd = self.position_value_usd(&holdings.token_b.mint, holdings.token_b.amount);
        let total_value_usd = token_a_value_usd + token_b_value_usd;

        let allocation_utilized = self.price_feed.get_price_usd(SOL_MINT).and_then(|sol_price| {
            let allocated_sol = Self::to_human(holdings.total_allocated_sol, SOL_DECIMALS);
            let allocated_usd = allocated_sol * sol_price;
            if allocated_usd > 0.0 {
                Some(total_value_usd / allocated_usd)
            } else {
                None
            }
        });

        Ok(PortfolioValue {
            token_a_value_usd,
            token_b_value_usd,
            total_value_usd,
            allocation_utilized,
        })
    }

    fn position_value_usd(&self, mint: &str, raw_amount: Decimal) -> f64 {
        let Some(&decimals) = self.decimals.get(mint) else {
            tracing::warn!(mint, "Unknown decimals for mint, valuing at zero");
            return 0.0;
        };
        let Some(price) = self.price_feed.get_price_usd(mint) else {
            tracing::warn!(mint, "No fresh price for mint, valuing at zero");
            return 0.0;
        };
        Self::to_human(raw_amount, decimals) * price
    }

    fn to_human(raw: Decimal, decimals: u32) -> f64 {
        let scale = 10f64.powi(decimals as i32);
        raw.to_f64().unwrap_or(0.0) / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, PriceFeedConfig};
    use crate::models::TokenPosition;
    use chrono::Utc;
    use std::path::PathBuf;

    async fn tracker() -> HoldingsTracker {
        let config = DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        };
        let pool = db::init_pool(&config).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let feed = Arc::new(PriceFeedService::new(&PriceFeedConfig::default()));
        HoldingsTracker::new(pool, feed)
    }

    fn holdings(sol_lamports: i64, usdc_raw: i64) -> StrategyHoldings {
        StrategyHoldings {
            strategy_id: "strat-1".to_string(),
            token_a: TokenPosition::new(SOL_MINT, Decimal::from(sol_lamports)),
            token_b: TokenPosition::new(USDC_MINT, Decimal::from(usdc_raw)),
            total_allocated_sol: Decimal::from(sol_lamports),
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_portfolio_value_from_cached_prices() {
        let tracker = tracker().await;
        // 2 SOL and 300 USDC
        tracker
            .update_holdings(&holdings(2_000_000_000, 300_000_000))
            .await
            .unwrap();

        tracker.price_feed.publish(SOL_MINT, 150.0, Utc::now());
        tracker.price_feed.publish(USDC_MINT, 1.0, Utc::now());

        let value = tracker.calculate_portfolio_value("strat-1").await.unwrap();
        assert!((value.token_a_value_usd - 300.0).abs() < 1e-6);
        assert!((value.token_b_value_usd - 300.0).abs() < 1e-6);
        assert!((value.total_value_usd - 600.0).abs() < 1e-6);

        // Allocated 2 SOL = 300 USD, holdings worth 600 USD
        assert!((value.allocation_utilized.unwrap() - 2.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_price_values_position_at_zero() {
        let tracker = tracker().await;
        tracker
            .update_holdings(&holdings(2_000_000_000, 300_000_000))
            .await
            .unwrap();

        // Only USDC priced; SOL side contributes zero and utilization is unknown
        tracker.price_feed.publish(USDC_MINT, 1.0, Utc::now());

        let value = tracker.calculate_portfolio_value("strat-1").await.unwrap();
        assert_eq!(value.token_a_value_usd, 0.0);
        assert!((value.token_b_value_usd - 300.0).abs() < 1e-6);
        assert!(value.allocation_utilized.is_none());
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_not_found() {
        let tracker = tracker().await;
        let result = tracker.calculate_portfolio_value("missing").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
