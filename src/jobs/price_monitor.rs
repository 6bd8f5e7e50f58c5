//! One-shot price trigger worker
//!
//! Watches the native-asset price stream and, the first time the configured
//! threshold is crossed in the configured direction, sells a percentage of
//! the native balance into USDC. The job then completes permanently; the
//! manager retires it when it receives the completion event.

use super::{swap_wallet, JobEvent, Worker, WorkerDeps, WorkerState};
use crate::constants::{SOL_MINT, USDC_MINT};
use crate::error::{AppError, AppResult};
use crate::models::{Job, JobKind, PriceDirection};
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

/// Whether the observed price crosses the trigger threshold
pub fn trigger_met(price: f64, target: f64, direction: PriceDirection) -> bool {
    match direction {
        PriceDirection::Above => price >= target,
        PriceDirection::Below => price <= target,
    }
}

pub struct PriceMonitorWorker {
    job: Arc<RwLock<Job>>,
    job_id: String,
    deps: WorkerDeps,
    state: Arc<Mutex<WorkerState>>,
    shutdown: Mutex<CancellationToken>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PriceMonitorWorker {
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
        let (target_price, direction, percentage_to_sell) = {
            let job = self.job.read().await;
            let JobKind::PriceTrigger {
                target_price,
                direction,
                percentage_to_sell,
                ..
            } = &job.kind
            else {
                tracing::error!(job_id = %self.job_id, "Price worker built for wrong job kind");
                return;
            };
            (*target_price, *direction, *percentage_to_sell)
        };

        self.deps.price_feed.track(SOL_MINT);
        let mut ticks = self.deps.price_feed.subscribe();
        let cooldown = Duration::seconds(self.deps.config.jobs.trigger_cooldown_secs);
        let mut suppressed_until: Option<DateTime<Utc>> = None;

        tracing::info!(
            job_id = %self.job_id,
            target_price,
            ?direction,
            "Price trigger armed"
        );

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

            if tick.mint != SOL_MINT || !trigger_met(tick.price_usd, target_price, direction) {
                continue;
            }
            if suppressed_until.is_some_and(|until| tick.at < until) {
                continue;
            }

            match self.fire(tick.price_usd, percentage_to_sell).await {
                Ok(()) => {
                    *self.state.lock() = WorkerState::Completed;
                    let _ = self
                        .deps
                        .events
                        .send(JobEvent::Completed {
                            job_id: self.job_id.clone(),
                        })
                        .await;
                    break;
                }
                Err(e) => {
                    // Trigger not consumed; the next qualifying tick after
                    // the cooldown retries
                    tracing::error!(job_id = %self.job_id, error = %e, "Trigger execution failed");
                    suppressed_until = Some(Utc::now() + cooldown);
                }
            }
        }
    }

    async fn fire(&self, price: f64, percentage_to_sell: f64) -> AppResult<()> {
        let pubkey = self.job.read().await.trading_wallet_pubkey.clone();
        let policy = &self.deps.config.mirror;

        let balance = Decimal::from(self.deps.chain.native_balance(&pubkey).await?);
        let available = (balance - Decimal::from(policy.fee_reserve_lamports)).max(Decimal::ZERO);

        let fraction = Decimal::from_f64(percentage_to_sell / 100.0).unwrap_or(Decimal::ZERO);
        let amount = (available * fraction).trunc();

        if amount < Decimal::from(policy.min_native_lamports) {
            return Err(AppError::Execution(format!(
                "trigger amount {} below minimum trade size",
                amount
            )));
        }

        let request = QuoteRequest {
            input_mint: SOL_MINT.to_string(),
            output_mint: USDC_MINT.to_string(),
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
        .map_err(|e| AppError::Execution(format!("trigger swap failed: {}", e)))?;

        tracing::info!(
            job_id = %self.job_id,
            price,
            signature = %receipt.signature,
            amount = %amount,
            "Price trigger fired"
        );

        {
            let mut job = self.job.write().await;
            job.touch();
            job.is_active = false;
            if let JobKind::PriceTrigger {
                last_trigger_price, ..
            } = &mut job.kind
            {
                *last_trigger_price = Some(price);
            }
        }

        super::refresh_profit(&self.job, &self.deps).await;
        Ok(())
    }
}

#[async_trait]
impl Worker for PriceMonitorWorker {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    async fn start(&self) -> AppResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                WorkerState::Running => return Ok(()),
                // One-shot: a completed trigger never re-arms
                WorkerState::Completed => {
                    return Err(AppError::Execution(format!(
                        "job {} already completed",
                        self.job_id
                    )))
                }
                WorkerState::Stopped => *state = WorkerState::Running,
            }
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
        let mut state = self.state.lock();
        if *state != WorkerState::Completed {
            *state = WorkerState::Stopped;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_direction_above() {
        assert!(trigger_met(151.0, 150.0, PriceDirection::Above));
        assert!(trigger_met(150.0, 150.0, PriceDirection::Above));
        assert!(!trigger_met(149.0, 150.0, PriceDirection::Above));
    }

    #[test]
    fn test_trigger_direction_below() {
        assert!(trigger_met(95.0, 100.0, PriceDirection::Below));
        assert!(!trigger_met(105.0, 100.0, PriceDirection::Below));
    }
}
