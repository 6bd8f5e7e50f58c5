//! Price-ladder worker
//!
//! Evaluates an ordered list of levels against each price tick. At most one
//! level executes per tick, the first eligible one in list order; cooldowns
//! and the retrigger budget gate re-execution per level.

use super::{swap_wallet, Worker, WorkerDeps, WorkerState};
use crate::constants::{SOL_MINT, USDC_MINT};
use crate::error::{AppError, AppResult};
use crate::models::{Job, JobKind, Level, LevelSizing, LevelsMode};
use crate::swap::{execute_swap, QuoteRequest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// First eligible level in list order, if any
///
/// List order is the precedence rule: when several levels qualify at the
/// same tick, the earliest one in the configured list wins and the rest
/// wait for a later tick.
pub fn select_level(
    levels: &[Level],
    price: f64,
    now: DateTime<Utc>,
    max_retriggers: u32,
) -> Option<usize> {
    levels
        .iter()
        .position(|level| level.is_eligible(price, now, max_retriggers))
}

pub struct LevelsWorker {
    job: Arc<RwLock<Job>>,
    job_id: String,
    deps: WorkerDeps,
    state: Arc<Mutex<WorkerState>>,
    shutdown: Mutex<CancellationToken>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl LevelsWorker {
    pub fn new(job: Arc<RwLock<Job>>, deps: WorkerDeps) -> Self {
        let job_id = job.try_read().map(|j| j.id.clone()).unwrap_or_default();
        Self {
            job,
            job_id,
            deps,
            state: Arc::new(Mutex::new(WorkerState::Stopped)),
            shutdown: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        self.deps.price_feed.track(SOL_MINT);
        let mut ticks = self.deps.price_feed.subscribe();
        let cooldown = Duration::seconds(self.deps.config.jobs.trigger_cooldown_secs);
        let mut suppressed_until: Option<DateTime<Utc>> = None;

        tracing::info!(job_id = %self.job_id, "Levels worker started");

        loop {
            let tick = tokio::select! {
                _ = shutdown.cancelled() => break,
                tick = ticks.recv() => match tick {
                    Ok(tick) => tick,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(job_id = %self.job_id, skipped, "Price stream lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            if tick.mint != SOL_MINT {
                continue;
            }
            if suppressed_until.is_some_and(|until| tick.at < until) {
                continue;
            }

            if let Err(e) = self.evaluate_tick(tick.price_usd).await {
                tracing::error!(job_id = %self.job_id, error = %e, "Level execution failed");
                suppressed_until = Some(Utc::now() + cooldown);
            }
        }

        tracing::info!(job_id = %self.job_id, "Levels worker stopped");
    }

    async fn evaluate_tick(&self, price: f64) -> AppResult<()> {
        let now = Utc::now();

        let (index, sizing, mode, cooldown_hours, max_retriggers) = {
            let job = self.job.read().await;
            let JobKind::Levels {
                levels,
                mode,
                cooldown_hours,
                max_retriggers,
            } = &job.kind
            else {
                return Ok(());
            };
            let Some(index) = select_level(levels, price, now, *max_retriggers) else {
                return Ok(());
            };
            (
                index,
                levels[index].sizing.clone(),
                *mode,
                *cooldown_hours,
                *max_retriggers,
            )
        };

        let signature = self.execute_level(price, mode, &sizing).await?;

        let mut job = self.job.write().await;
        job.touch();
        if let JobKind::Levels { levels, .. } = &mut job.kind {
            if let Some(level) = levels.get_mut(index) {
                level.record_execution(
                    price,
                    Some(signature),
                    Duration::hours(cooldown_hours as i64),
                    max_retriggers,
                    now,
                );
                tracing::info!(
                    job_id = %self.job_id,
                    level_price = level.price,
                    kind = %level.kind,
                    executed_count = level.executed_count,
                    permanently_disabled = level.permanently_disabled,
                    "Level executed"
                );
            }
        }
        drop(job);

        super::refresh_profit(&self.job, &self.deps).await;
        Ok(())
    }

    async fn execute_level(
        &self,
        price: f64,
        mode: LevelsMode,
        sizing: &LevelSizing,
    ) -> AppResult<String> {
        let pubkey = self.job.read().await.trading_wallet_pubkey.clone();
        let policy = &self.deps.config.mirror;

        let (input_mint, output_mint, amount) = match (mode, sizing) {
            (LevelsMode::Buy, LevelSizing::UsdcAmount(usdc)) => {
                let balance = self.deps.chain.token_balance(&pubkey, USDC_MINT).await?;
                let amount = (*usdc).min(balance).trunc();
                if amount < Decimal::from(policy.min_token_amount) {
                    return Err(AppError::Execution(
                        "insufficient USDC for level buy".to_string(),
                    ));
                }
                (USDC_MINT, SOL_MINT, amount)
            }
            (LevelsMode::Sell, LevelSizing::SolPercentage(pct)) => {
                let balance = Decimal::from(self.deps.chain.native_balance(&pubkey).await?);
                let available =
                    (balance - Decimal::from(policy.fee_reserve_lamports)).max(Decimal::ZERO);
                let fraction = Decimal::from_f64(pct / 100.0).unwrap_or(Decimal::ZERO);
                let amount = (available * fraction).trunc();
                if amount < Decimal::from(policy.min_native_lamports) {
                    return Err(AppError::Execution(
                        "level sell amount below minimum trade size".to_string(),
                    ));
                }
                (SOL_MINT, USDC_MINT, amount)
            }
            _ => {
                return Err(AppError::Validation(format!(
                    "level sizing {:?} does not match mode {:?}",
                    sizing, mode
                )))
            }
        };

        let request = QuoteRequest {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            amount,
            slippage_bps: self.deps.config.swap.default_slippage_bps,
        };

        let wallet = swap_wallet(&*self.job.read().await);
        let receipt = execute_swap(
            self.deps.gateway.as_ref(),
            &request,
            &wallet,
            self.deps.config.swap.fee_account.as_deref(),
            &self.deps.config.swap,
        )
        .await
        .map_err(|e| AppError::Execution(format!("level swap failed: {}", e)))?;

        tracing::info!(
            job_id = %self.job_id,
            price,
            signature = %receipt.signature,
            amount = %amount,
            "Level trade submitted"
        );

        Ok(receipt.signature)
    }
}

#[async_trait]
impl Worker for LevelsWorker {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    async fn start(&self) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            if *state == WorkerState::Running {
                return Ok(());
            }
            *state = WorkerState::Running;
        }

        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();

        let worker = Arc::new(Self {
            job: Arc::clone(&self.job),
            job_id: self.job_id.clone(),
            deps: self.deps.clone(),
            state: Arc::clone(&self.state),
            shutdown: Mutex::new(token.clone()),
            handle: Mutex::new(None),
        });
        *self.handle.lock() = Some(tokio::spawn(worker.run(token)));

        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.lock().cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        *self.state.lock() = WorkerState::Stopped;
    }
}
