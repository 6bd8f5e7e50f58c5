//! Job lifecycle management
//!
//! One worker per active job, keyed by job id. The manager owns the map,
//! builds the right worker for each job kind, and listens for completion
//! events so one-shot workers are retired without an external caller.

pub mod levels;
pub mod price_monitor;
pub mod wallet_monitor;

use crate::chain::ChainClient;
use crate::config::AppConfig;
use crate::db::{self, DbPool, PairStrategy};
use crate::error::{AppError, AppResult};
use crate::holdings::HoldingsTracker;
use crate::models::{Job, JobKind};
use crate::price_feed::PriceFeedService;
use crate::swap::{SwapGateway, SwapWallet};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Lifecycle state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
    /// Terminal; the worker finished its purpose and never restarts
    Completed,
}

/// A running strategy worker
#[async_trait]
pub trait Worker: Send + Sync {
    fn job_id(&self) -> &str;

    fn state(&self) -> WorkerState;

    /// Spawn the worker's loop; idempotent while running
    async fn start(&self) -> AppResult<()>;

    /// Signal shutdown and mark the worker stopped
    async fn stop(&self);
}

/// Events workers emit back to the manager
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A one-shot worker reached its terminal state
    Completed { job_id: String },
}

/// Shared services handed to every worker
#[derive(Clone)]
pub struct WorkerDeps {
    pub chain: Arc<dyn ChainClient>,
    pub gateway: Arc<dyn SwapGateway>,
    pub price_feed: Arc<PriceFeedService>,
    pub holdings: Arc<HoldingsTracker>,
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub events: mpsc::Sender<JobEvent>,
}

/// Signing identity for a job's trading wallet
pub fn swap_wallet(job: &Job) -> SwapWallet {
    SwapWallet {
        pubkey: job.trading_wallet_pubkey.clone(),
        secret: job.trading_wallet_secret.clone(),
    }
}

/// Refresh a job's profit tracking from the wallet's native balance and the
/// cached native-asset price. Called where trades settle; failures only cost
/// a stale reading, so they are logged and swallowed.
pub async fn refresh_profit(job: &Arc<RwLock<Job>>, deps: &WorkerDeps) {
    let pubkey = job.read().await.trading_wallet_pubkey.clone();

    let balance = match deps.chain.native_balance(&pubkey).await {
        Ok(balance) => balance,
        Err(e) => {
            tracing::warn!(error = %e, "Balance fetch failed, skipping profit refresh");
            return;
        }
    };
    let Some(price) = deps.price_feed.get_price_usd(crate::constants::SOL_MINT) else {
        tracing::debug!("No cached native price, skipping profit refresh");
        return;
    };

    let value_usd = balance as f64 / crate::constants::LAMPORTS_PER_SOL as f64 * price;
    let mut job = job.write().await;
    job.profit.observe(Decimal::from(balance), value_usd);
    tracing::debug!(
        job_id = %job.id,
        value_usd,
        profit_percent = job.profit.profit_percent(),
        "Profit refreshed"
    );
}

struct JobEntry {
    job: Arc<RwLock<Job>>,
    worker: Arc<dyn Worker>,
}

/// Owns all jobs and their workers
pub struct JobManager {
    jobs: Mutex<HashMap<String, JobEntry>>,
    deps: WorkerDeps,
}

impl JobManager {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            deps,
        }
    }

    /// Register a job and start its worker
    ///
    /// Adding an id that already exists is a warned no-op; the running
    /// worker is left untouched.
    pub async fn add_job(&self, job: Job) -> AppResult<()> {
        let mut jobs = self.jobs.lock().await;

        if jobs.contains_key(&job.id) {
            tracing::warn!(job_id = %job.id, "Job already registered, ignoring");
            return Ok(());
        }

        let job_id = job.id.clone();
        let kind = job.kind.name();
        let active = job.is_active;
        let shared = Arc::new(RwLock::new(job));
        let worker = self.build_worker(Arc::clone(&shared)).await?;

        // A job added paused stays paused until toggled on
        if active {
            worker.start().await?;
        }
        jobs.insert(
            job_id.clone(),
            JobEntry {
                job: shared,
                worker,
            },
        );

        tracing::info!(job_id = %job_id, kind, active, "Job added");
        Ok(())
    }

    /// Stop a job's worker and discard the job
    pub async fn remove_job(&self, job_id: &str) -> AppResult<()> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs
            .remove(job_id)
            .ok_or_else(|| AppError::NotFound(format!("no job with id {}", job_id)))?;

        entry.worker.stop().await;
        tracing::info!(job_id, "Job removed");
        Ok(())
    }

    /// Set a job active or paused without rebuilding it; idempotent
    pub async fn toggle_job(&self, job_id: &str, active: bool) -> AppResult<bool> {
        let jobs = self.jobs.lock().await;
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| AppError::NotFound(format!("no job with id {}", job_id)))?;

        entry.job.write().await.is_active = active;
        if active {
            entry.worker.start().await?;
        } else {
            entry.worker.stop().await;
        }

        tracing::info!(job_id, active, "Job toggled");
        Ok(active)
    }

    /// Snapshot of a job's current state
    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        let jobs = self.jobs.lock().await;
        match jobs.get(job_id) {
            Some(entry) => Some(entry.job.read().await.clone()),
            None => None,
        }
    }

    pub async fn job_ids(&self) -> Vec<String> {
        self.jobs.lock().await.keys().cloned().collect()
    }

    /// Stop every worker and the shared price feed
    pub async fn stop_all(&self) {
        let jobs = self.jobs.lock().await;
        for entry in jobs.values() {
            entry.worker.stop().await;
        }
        self.deps.price_feed.stop();
        tracing::info!(count = jobs.len(), "All workers stopped");
    }

    /// Listen for worker events and retire completed one-shot jobs
    pub fn spawn_event_listener(self: &Arc<Self>, mut events: mpsc::Receiver<JobEvent>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    JobEvent::Completed { job_id } => {
                        tracing::info!(job_id = %job_id, "Worker completed, retiring job");
                        let mut jobs = manager.jobs.lock().await;
                        if let Some(entry) = jobs.remove(&job_id) {
                            entry.job.write().await.is_active = false;
                        }
                    }
                }
            }
        });
    }

    async fn build_worker(&self, job: Arc<RwLock<Job>>) -> AppResult<Arc<dyn Worker>> {
        let kind = job.read().await.kind.clone();
        let worker: Arc<dyn Worker> = match kind {
            JobKind::WalletMirror { .. } => Arc::new(wallet_monitor::WalletMonitorWorker::new(
                job,
                self.deps.clone(),
            )),
            JobKind::PriceTrigger { .. } => Arc::new(price_monitor::PriceMonitorWorker::new(
                job,
                self.deps.clone(),
            )),
            JobKind::Levels { .. } => {
                Arc::new(levels::LevelsWorker::new(job, self.deps.clone()))
            }
            JobKind::PairTrade { .. } => {
                Arc::new(PairStrategyWorker::new(job, self.deps.clone()).await?)
            }
        };
        Ok(worker)
    }
}

/// Registry-backed worker for signal-driven pair strategies
///
/// Pair trades execute on incoming signals rather than a polling loop, so
/// this worker only keeps the strategy registry row in sync with the job's
/// active flag.
pub struct PairStrategyWorker {
    job_id: String,
    pool: DbPool,
    state: parking_lot::Mutex<WorkerState>,
}

impl PairStrategyWorker {
    pub async fn new(job: Arc<RwLock<Job>>, deps: WorkerDeps) -> AppResult<Self> {
        let (job_id, strategy) = {
            let job = job.read().await;
            let JobKind::PairTrade {
                token_a_mint,
                token_b_mint,
                allocation_percentage,
                max_slippage_bps,
            } = &job.kind
            else {
                return Err(AppError::Internal(
                    "pair strategy worker built for wrong job kind".to_string(),
                ));
            };
            (
                job.id.clone(),
                PairStrategy {
                    strategy_id: job.id.clone(),
                    trading_wallet_pubkey: job.trading_wallet_pubkey.clone(),
                    token_a_mint: token_a_mint.clone(),
                    token_b_mint: token_b_mint.clone(),
                    allocation_percentage: *allocation_percentage,
                    max_slippage_bps: *max_slippage_bps,
                    is_active: job.is_active,
                },
            )
        };

        db::upsert_pair_strategy(&deps.pool, &strategy).await?;

        Ok(Self {
            job_id,
            pool: deps.pool,
            state: parking_lot::Mutex::new(WorkerState::Stopped),
        })
    }
}

#[async_trait]
impl Worker for PairStrategyWorker {
    fn job_id(&self) -> &str {
        &self.job_id
    }

    fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    async fn start(&self) -> AppResult<()> {
        db::set_pair_strategy_active(&self.pool, &self.job_id, true).await?;
        *self.state.lock() = WorkerState::Running;
        Ok(())
    }

    async fn stop(&self) {
        if let Err(e) = db::set_pair_strategy_active(&self.pool, &self.job_id, false).await {
            tracing::error!(job_id = %self.job_id, error = %e, "Failed to deactivate strategy");
        }
        *self.state.lock() = WorkerState::Stopped;
    }
}
