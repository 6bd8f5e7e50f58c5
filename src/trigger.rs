//! Signal ingestion and dispatch
//!
//! Validates each incoming pair-trade signal, resolves the strategies bound
//! to its pair and executes them in isolation: one strategy's failure never
//! blocks the others. Every signal is written to the audit log whether it
//! was accepted, rejected or found no strategies.

use crate::db::{self, DbPool};
use crate::error::{AppError, AppResult};
use crate::executor::PairTradeExecutor;
use crate::models::{PairTradeSignal, ProcessingResult};
use crate::swap::SwapWallet;
use chrono::Utc;
use secrecy::SecretString;
use std::sync::Arc;

/// Resolves the signing credential for a strategy's trading wallet
///
/// Production wires this to the key store; tests stub it.
pub trait WalletKeyResolver: Send + Sync {
    fn resolve(&self, trading_wallet_pubkey: &str) -> AppResult<SecretString>;
}

/// Key resolver backed by the process environment
///
/// Looks up `WALLET_KEY_<pubkey>`; the single-wallet `WALLET_KEY` variable
/// acts as a fallback for deployments trading from one wallet.
pub struct EnvWalletKeyResolver;

impl WalletKeyResolver for EnvWalletKeyResolver {
    fn resolve(&self, trading_wallet_pubkey: &str) -> AppResult<SecretString> {
        std::env::var(format!("WALLET_KEY_{}", trading_wallet_pubkey))
            .or_else(|_| std::env::var("WALLET_KEY"))
            .map(SecretString::new)
            .map_err(|_| {
                AppError::Internal(format!(
                    "no signing key configured for wallet {}",
                    trading_wallet_pubkey
                ))
            })
    }
}

pub struct TriggerService {
    pool: DbPool,
    executor: Arc<PairTradeExecutor>,
    keys: Arc<dyn WalletKeyResolver>,
}

impl TriggerService {
    pub fn new(
        pool: DbPool,
        executor: Arc<PairTradeExecutor>,
        keys: Arc<dyn WalletKeyResolver>,
    ) -> Self {
        Self {
            pool,
            executor,
            keys,
        }
    }

    /// Process one incoming pair-trade signal end to end
    ///
    /// Validation failures reject the whole signal before any strategy is
    /// touched. Execution failures are per-strategy: each error lands in
    /// the aggregated result, named by strategy id, while the remaining
    /// strategies still run.
    pub async fn process_pair_trade_signal(
        &self,
        signal: &PairTradeSignal,
    ) -> AppResult<ProcessingResult> {
        let received_at = Utc::now();
        let audit_id = signal.audit_id(received_at);
        let payload = serde_json::to_string(signal).unwrap_or_default();

        if let Err(message) = signal.validate() {
            self.audit(&audit_id, &payload, "rejected", Some(&message))
                .await;
            return Err(AppError::Validation(message));
        }

        let strategies =
            db::get_active_pair_strategies(&self.pool, &signal.token_a_mint, &signal.token_b_mint)
                .await?;

        if strategies.is_empty() {
            tracing::info!(
                audit_id = %audit_id,
                token_a = %signal.token_a_mint,
                token_b = %signal.token_b_mint,
                "No active strategies for signal pair"
            );
            self.audit(&audit_id, &payload, "no_strategies", None).await;
            return Ok(ProcessingResult::default());
        }

        let mut result = ProcessingResult {
            processed_strategies: strategies.len() as u32,
            ..Default::default()
        };

        for strategy in &strategies {
            let outcome = match self.keys.resolve(&strategy.trading_wallet_pubkey) {
                Ok(secret) => {
                    let wallet = SwapWallet {
                        pubkey: strategy.trading_wallet_pubkey.clone(),
                        secret,
                    };
                    self.executor
                        .execute_signal_trade(strategy, signal, &wallet)
                        .await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(outcome) => {
                    result.successful_trades += 1;
                    result.total_volume += outcome.filled_amount;
                }
                Err(e) => {
                    // Isolation: record and move on to the next strategy
                    let message = match &e {
                        AppError::Execution(m) | AppError::NotFound(m) => m.clone(),
                        other => format!("strategy {}: {}", strategy.strategy_id, other),
                    };
                    tracing::error!(
                        audit_id = %audit_id,
                        strategy_id = %strategy.strategy_id,
                        error = %message,
                        "Strategy execution failed"
                    );
                    result.failed_trades += 1;
                    result.errors.push(message);
                }
            }
        }

        let outcome_label = if result.failed_trades == 0 {
            "processed"
        } else if result.successful_trades > 0 {
            "partial"
        } else {
            "failed"
        };
        let error_summary = (!result.errors.is_empty()).then(|| result.errors.join("; "));
        self.audit(&audit_id, &payload, outcome_label, error_summary.as_deref())
            .await;

        tracing::info!(
            audit_id = %audit_id,
            processed = result.processed_strategies,
            successful = result.successful_trades,
            failed = result.failed_trades,
            total_volume = %result.total_volume,
            "Signal processed"
        );

        Ok(result)
    }

    /// Audit writes never fail signal processing
    async fn audit(&self, audit_id: &str, payload: &str, outcome: &str, error: Option<&str>) {
        if let Err(e) =
            db::insert_signal_audit(&self.pool, audit_id, payload, outcome, error).await
        {
            tracing::error!(audit_id, error = %e, "Failed to write signal audit row");
        }
    }
}
