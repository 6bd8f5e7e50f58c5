//! Pair-trade execution
//!
//! Two entry points: the one-time initial allocation that converts a
//! strategy's SOL budget into its recommended starting side, and the
//! signal-driven trade that rebalances between the pair's two sides. Every
//! attempt is recorded in the trade ledger before the swap is submitted and
//! finalized with what actually settled, so partial fills reconcile against
//! reality rather than the request.

use crate::chain::ChainClient;
use crate::config::AppConfig;
use crate::constants::SOL_MINT;
use crate::db::PairStrategy;
use crate::error::{AppError, AppResult};
use crate::holdings::HoldingsTracker;
use crate::models::{
    PairTradeSignal, SignalAction, StrategyHoldings, TargetToken, TokenPosition, TradeRecord,
};
use crate::swap::{execute_swap, QuoteRequest, SwapGateway, SwapWallet};
use crate::valuation::{ValuationError, ValuationService};
use chrono::Utc;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Settled outcome of one signal-driven trade
#[derive(Debug, Clone)]
pub struct SignalTradeOutcome {
    pub trade_id: i64,
    pub signature: String,
    /// Input actually consumed, in raw units of the source side
    pub filled_amount: Decimal,
    pub output_amount: Decimal,
    /// What was requested before the fill settled
    pub requested_amount: Decimal,
    pub partial_fill: bool,
    /// Percentage of the source holding actually traded
    pub actual_percentage: f64,
}

/// Outcome of a strategy's initial allocation
#[derive(Debug, Clone)]
pub struct InitialAllocationOutcome {
    pub allocated_lamports: Decimal,
    pub recommended: TargetToken,
    pub confidence: f64,
    pub signature: Option<String>,
}

pub struct PairTradeExecutor {
    gateway: Arc<dyn SwapGateway>,
    chain: Arc<dyn ChainClient>,
    holdings: Arc<HoldingsTracker>,
    valuation: Arc<ValuationService>,
    config: Arc<AppConfig>,
}

impl PairTradeExecutor {
    pub fn new(
        gateway: Arc<dyn SwapGateway>,
        chain: Arc<dyn ChainClient>,
        holdings: Arc<HoldingsTracker>,
        valuation: Arc<ValuationService>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            gateway,
            chain,
            holdings,
            valuation,
            config,
        }
    }

    /// Convert a new strategy's SOL budget into its starting position
    ///
    /// The allocation is carved out of the wallet's current balance by the
    /// strategy's percentage, the valuation verdict picks which side to
    /// hold, and the resulting one-sided holdings become the strategy's
    /// durable baseline. A dead valuation oracle degrades to the low
    /// confidence fallback instead of blocking the allocation.
    pub async fn execute_initial_allocation(
        &self,
        strategy: &PairStrategy,
        wallet: &SwapWallet,
    ) -> AppResult<InitialAllocationOutcome> {
        if !(0.0..=100.0).contains(&strategy.allocation_percentage) {
            return Err(AppError::Validation(format!(
                "allocation percentage out of range: {}",
                strategy.allocation_percentage
            )));
        }

        let balance = Decimal::from(self.chain.native_balance(&wallet.pubkey).await?);
        let fraction =
            Decimal::from_f64(strategy.allocation_percentage / 100.0).unwrap_or(Decimal::ZERO);
        let allocation = (balance * fraction).trunc();

        if allocation <= Decimal::ZERO {
            return Err(AppError::Execution(format!(
                "strategy {}: allocation of {} lamports is not tradeable",
                strategy.strategy_id, allocation
            )));
        }
        if allocation > balance {
            return Err(AppError::Execution(format!(
                "strategy {}: allocation exceeds wallet balance",
                strategy.strategy_id
            )));
        }

        let verdict = match self
            .valuation
            .get_undervalued_token(&strategy.token_a_mint, &strategy.token_b_mint)
            .await
        {
            Ok(verdict) => verdict,
            Err(ValuationError::Validation(msg)) => return Err(AppError::Validation(msg)),
            Err(e) => {
                tracing::warn!(
                    strategy_id = %strategy.strategy_id,
                    error = %e,
                    "Valuation unavailable, using fallback recommendation"
                );
                self.valuation.fallback_recommendation()
            }
        };

        let target_mint = match verdict.recommended {
            TargetToken::A => &strategy.token_a_mint,
            TargetToken::B => &strategy.token_b_mint,
        };

        let mut record = TradeRecord::pending(
            &strategy.strategy_id,
            "initial_allocation",
            SOL_MINT,
            target_mint.clone(),
            allocation,
        )
        .with_slippage(strategy.max_slippage_bps)
        .with_percentage(strategy.allocation_percentage);
        let trade_id = self.holdings.record_trade(&record).await?;

        // The allocation may already be denominated in the recommended side
        let (signature, acquired) = if target_mint == SOL_MINT {
            record
                .mark_filled(String::new(), allocation, allocation)
                .map_err(AppError::Persistence)?;
            record.signature = None;
            (None, allocation)
        } else {
            let request = QuoteRequest {
                input_mint: SOL_MINT.to_string(),
                output_mint: target_mint.clone(),
                amount: allocation,
                slippage_bps: strategy.max_slippage_bps,
            };

            match execute_swap(
                self.gateway.as_ref(),
                &request,
                wallet,
                self.config.swap.fee_account.as_deref(),
                &self.config.swap,
            )
            .await
            {
                Ok(receipt) => {
                    record
                        .mark_filled(
                            receipt.signature.clone(),
                            receipt.input_amount,
                            receipt.output_amount,
                        )
                        .map_err(AppError::Persistence)?;
                    (Some(receipt.signature), receipt.output_amount)
                }
                Err(e) => {
                    let message = format!(
                        "strategy {}: initial allocation swap failed: {}",
                        strategy.strategy_id, e
                    );
                    record
                        .mark_failed(message.clone())
                        .map_err(AppError::Persistence)?;
                    self.holdings.finalize_trade(trade_id, &record).await?;
                    return Err(AppError::Execution(message));
                }
            }
        };
        self.holdings.finalize_trade(trade_id, &record).await?;

        let (a_amount, b_amount) = match verdict.recommended {
            TargetToken::A => (acquired, Decimal::ZERO),
            TargetToken::B => (Decimal::ZERO, acquired),
        };
        self.holdings
            .update_holdings(&StrategyHoldings {
                strategy_id: strategy.strategy_id.clone(),
                token_a: TokenPosition::new(&strategy.token_a_mint, a_amount),
                token_b: TokenPosition::new(&strategy.token_b_mint, b_amount),
                total_allocated_sol: allocation,
                last_updated: Utc::now(),
            })
            .await?;

        tracing::info!(
            strategy_id = %strategy.strategy_id,
            allocated_lamports = %allocation,
            recommended = %verdict.recommended,
            confidence = verdict.confidence,
            "Initial allocation complete"
        );

        Ok(InitialAllocationOutcome {
            allocated_lamports: allocation,
            recommended: verdict.recommended,
            confidence: verdict.confidence,
            signature,
        })
    }

    /// Execute one signal against one strategy
    ///
    /// The trade amount is carved out of the recorded source holding and can
    /// never exceed it. The ledger row is written before submission and
    /// finalized with what actually filled; holdings move by the settled
    /// amounts, so a partial fill leaves the remainder on the source side.
    pub async fn execute_signal_trade(
        &self,
        strategy: &PairStrategy,
        signal: &PairTradeSignal,
        wallet: &SwapWallet,
    ) -> AppResult<SignalTradeOutcome> {
        let holdings = self
            .holdings
            .get_holdings(&strategy.strategy_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "strategy {}: no holdings recorded, initial allocation missing",
                    strategy.strategy_id
                ))
            })?;

        // Selling the target trades it away; buying it spends the other side
        let source_side = match signal.action {
            SignalAction::Sell => signal.target_token,
            SignalAction::Buy => signal.target_token.other(),
        };
        let source = holdings.position(source_side).clone();
        let dest = holdings.position(source_side.other()).clone();

        let fraction = Decimal::from_f64(signal.percentage / 100.0).unwrap_or(Decimal::ZERO);
        let requested = (source.amount * fraction).trunc().min(source.amount);

        if requested <= Decimal::ZERO {
            return Err(AppError::Execution(format!(
                "strategy {}: nothing to trade, source holding {} is {}",
                strategy.strategy_id, source.mint, source.amount
            )));
        }

        let slippage_bps = signal.max_slippage_bps.unwrap_or(strategy.max_slippage_bps);

        let mut record = TradeRecord::pending(
            &strategy.strategy_id,
            "signal_trade",
            source.mint.clone(),
            dest.mint.clone(),
            requested,
        )
        .with_percentage(signal.percentage)
        .with_slippage(slippage_bps)
        .with_signal_data(serde_json::to_value(signal).unwrap_or_default());
        let trade_id = self.holdings.record_trade(&record).await?;

        let request = QuoteRequest {
            input_mint: source.mint.clone(),
            output_mint: dest.mint.clone(),
            amount: requested,
            slippage_bps,
        };

        let receipt = match execute_swap(
            self.gateway.as_ref(),
            &request,
            wallet,
            self.config.swap.fee_account.as_deref(),
            &self.config.swap,
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let message = format!(
                    "strategy {}: signal trade failed: {}",
                    strategy.strategy_id, e
                );
                record
                    .mark_failed(message.clone())
                    .map_err(AppError::Persistence)?;
                self.holdings.finalize_trade(trade_id, &record).await?;
                return Err(AppError::Execution(message));
            }
        };

        let filled = receipt.input_amount.min(requested);
        record
            .mark_filled(receipt.signature.clone(), filled, receipt.output_amount)
            .map_err(AppError::Persistence)?;
        self.holdings.finalize_trade(trade_id, &record).await?;

        let mut updated = holdings;
        updated.apply_fill(source_side, filled, receipt.output_amount);
        self.holdings.update_holdings(&updated).await?;

        // Reconcile the reported percentage against what actually settled
        let actual_percentage = if source.amount > Decimal::ZERO {
            (filled / source.amount * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };
        let partial_fill = filled < requested;

        if partial_fill {
            tracing::warn!(
                strategy_id = %strategy.strategy_id,
                requested = %requested,
                filled = %filled,
                actual_percentage,
                "Signal trade partially filled"
            );
        }

        tracing::info!(
            strategy_id = %strategy.strategy_id,
            signature = %receipt.signature,
            from_mint = %source.mint,
            to_mint = %dest.mint,
            filled = %filled,
            output = %receipt.output_amount,
            "Signal trade settled"
        );

        Ok(SignalTradeOutcome {
            trade_id,
            signature: receipt.signature,
            filled_amount: filled,
            output_amount: receipt.output_amount,
            requested_amount: requested,
            partial_fill,
            actual_percentage,
        })
    }
}
