//! Wallet mirror worker
//!
//! Polls a monitored wallet's recent transactions, classifies each confirmed
//! swap from its balance deltas, and mirrors it proportionally from the
//! job's trading wallet. Signature dedupe guarantees each source swap is
//! mirrored at most once even across overlapping polls.

use super::{swap_wallet, Worker, WorkerDeps, WorkerState};
use crate::chain::TransactionDeltas;
use crate::config::MirrorPolicy;
use crate::constants::SOL_MINT;
use crate::error::{AppError, AppResult};
use crate::models::{push_recent_transaction, Job, JobKind};
use crate::swap::{execute_swap, QuoteRequest};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Dedupe cache for processed source-wallet signatures
///
/// Bounded LRU plus age-based eviction, with an in-flight set so a signature
/// being mirrored right now cannot be picked up by the next poll.
pub struct SignatureCache {
    inner: Mutex<CacheInner>,
    max_age: Duration,
}

struct CacheInner {
    seen: LruCache<String, DateTime<Utc>>,
    in_flight: HashSet<String>,
}

impl SignatureCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                seen: LruCache::new(capacity),
                in_flight: HashSet::new(),
            }),
            max_age,
        }
    }

    /// Claim a signature for processing; false if it was already processed
    /// recently or is being processed right now
    pub fn try_begin(&self, signature: &str) -> bool {
        let mut inner = self.inner.lock();

        let cutoff = Utc::now() - self.max_age;
        let aged: Vec<String> = inner
            .seen
            .iter()
            .filter(|(_, at)| **at < cutoff)
            .map(|(sig, _)| sig.clone())
            .collect();
        for sig in aged {
            inner.seen.pop(&sig);
        }

        if inner.seen.contains(signature) {
            return false;
        }
        inner.in_flight.insert(signature.to_string())
    }

    /// Release a claim; `processed` marks the signature as seen so it is
    /// never picked up again, false leaves it eligible for a retry
    pub fn finish(&self, signature: &str, processed: bool) {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(signature);
        if processed {
            inner.seen.put(signature.to_string(), Utc::now());
        }
    }

    /// Mark a signature seen without processing it
    pub fn mark_seen(&self, signature: &str) {
        self.inner.lock().seen.put(signature.to_string(), Utc::now());
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.inner.lock().seen.contains(signature)
    }
}

/// One leg of a detected swap
#[derive(Debug, Clone, PartialEq)]
pub enum SwapLeg {
    Native,
    Token(String),
}

impl SwapLeg {
    pub fn mint(&self) -> &str {
        match self {
            SwapLeg::Native => SOL_MINT,
            SwapLeg::Token(mint) => mint,
        }
    }
}

/// A source-wallet swap reconstructed from balance deltas
#[derive(Debug, Clone)]
pub struct DetectedSwap {
    pub input: SwapLeg,
    pub output: SwapLeg,
    /// Raw units the source wallet spent on the input side
    pub their_input_amount: Decimal,
    /// The source wallet's input-side balance before the swap
    pub their_pre_balance: Decimal,
}

impl DetectedSwap {
    /// What fraction of their input-side balance the source wallet traded,
    /// as a percentage
    pub fn sold_percentage(&self) -> Decimal {
        if self.their_pre_balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.their_input_amount / self.their_pre_balance * Decimal::ONE_HUNDRED
    }
}

/// Classify a transaction's balance deltas as a swap, if it is one
///
/// The input leg is the most-decreased token balance, or the native balance
/// when it moved beyond the fee-noise threshold and no token decreased. The
/// output leg mirrors that on the increase side. Both legs are required.
pub fn detect_swap(deltas: &TransactionDeltas, policy: &MirrorPolicy) -> Option<DetectedSwap> {
    let token_in = deltas
        .token_deltas
        .iter()
        .filter(|d| d.delta() < Decimal::ZERO)
        .min_by_key(|d| d.delta());
    let token_out = deltas
        .token_deltas
        .iter()
        .filter(|d| d.delta() > Decimal::ZERO)
        .max_by_key(|d| d.delta());

    let native_delta = deltas.native_delta();
    let noise = policy.native_threshold_lamports as i128;

    let (input, their_input_amount, their_pre_balance) = if let Some(d) = token_in {
        (SwapLeg::Token(d.mint.clone()), -d.delta(), d.pre_amount)
    } else if native_delta < -noise {
        // Lamport deltas fit comfortably in 64 bits
        (
            SwapLeg::Native,
            Decimal::from((-native_delta) as u64),
            Decimal::from(deltas.native_pre_lamports),
        )
    } else {
        return None;
    };

    let output = if let Some(d) = token_out {
        SwapLeg::Token(d.mint.clone())
    } else if native_delta > noise {
        SwapLeg::Native
    } else {
        return None;
    };

    if input == output {
        return None;
    }

    Some(DetectedSwap {
        input,
        output,
        their_input_amount,
        their_pre_balance,
    })
}

/// Sizing verdict for one mirror trade
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorDecision {
    Trade { amount: Decimal },
    /// The proportional amount is below the minimum trade size and the
    /// balance cannot cover the floor
    BelowFloor,
    InsufficientBalance,
}

/// Size our side of a mirrored swap
///
/// Token inputs mirror the source wallet's sold percentage directly; native
/// inputs additionally scale by the job's allocation percentage. A source
/// wallet selling above the dust threshold is treated as a full exit and we
/// mirror our entire balance, so no unsellable remainder is left behind.
/// Amounts below the minimum trade size are rounded up to it when the
/// balance covers it, and the result never exceeds the available balance.
pub fn mirror_amount(
    swap: &DetectedSwap,
    our_balance: Decimal,
    job_percentage: f64,
    policy: &MirrorPolicy,
) -> MirrorDecision {
    if our_balance <= Decimal::ZERO {
        return MirrorDecision::InsufficientBalance;
    }

    let sold_pct = swap.sold_percentage();
    if sold_pct <= Decimal::ZERO {
        return MirrorDecision::BelowFloor;
    }

    let dust_threshold =
        Decimal::from_f64(policy.dust_threshold_pct).unwrap_or(Decimal::ONE_HUNDRED);

    let mut amount = if sold_pct > dust_threshold {
        // Full exit by the source wallet: mirror everything we hold
        our_balance
    } else {
        let fraction = sold_pct / Decimal::ONE_HUNDRED;
        match swap.input {
            SwapLeg::Native => {
                let allocation =
                    Decimal::from_f64(job_percentage / 100.0).unwrap_or(Decimal::ZERO);
                our_balance * allocation * fraction
            }
            SwapLeg::Token(_) => our_balance * fraction,
        }
    };
    amount = amount.trunc();

    let floor = Decimal::from(match swap.input {
        SwapLeg::Native => policy.min_native_lamports,
        SwapLeg::Token(_) => policy.min_token_amount,
    });

    if amount < floor {
        if our_balance >= floor {
            amount = floor;
        } else {
            return MirrorDecision::BelowFloor;
        }
    }

    if amount > our_balance {
        amount = our_balance.trunc();
    }
    if amount <= Decimal::ZERO {
        return MirrorDecision::BelowFloor;
    }

    MirrorDecision::Trade { amount }
}

/// Polls the monitored wallet and mirrors its swaps
pub struct WalletMonitorWorker {
    job: Arc<RwLock<Job>>,
    job_id: String,
    deps: WorkerDeps,
    cache: Arc<SignatureCache>,
    state: Arc<Mutex<WorkerState>>,
    shutdown: Mutex<CancellationToken>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WalletMonitorWorker {
    pub fn new(job: Arc<RwLock<Job>>, deps: WorkerDeps) -> Self {
        // The lock is freshly created by the manager and uncontended here
        let job_id = job.try_read().map(|j| j.id.clone()).unwrap_or_default();
        let cache = Arc::new(SignatureCache::new(
            deps.config.jobs.seen_signature_capacity,
            Duration::seconds(deps.config.jobs.seen_signature_max_age_secs),
        ));
        Self {
            job,
            job_id,
            deps,
            cache,
            state: Arc::new(Mutex::new(WorkerState::Stopped)),
            shutdown: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        }
    }

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let (wallet_address, poll_interval, fetch_limit) = {
            let job = self.job.read().await;
            let JobKind::WalletMirror { wallet_address, .. } = &job.kind else {
                tracing::error!(job_id = %self.job_id, "Mirror worker built for wrong job kind");
                return;
            };
            (
                wallet_address.clone(),
                self.deps.config.jobs.wallet_poll_interval_secs,
                self.deps.config.jobs.signature_fetch_limit,
            )
        };

        // Baseline: existing history is not mirrored, only activity from now on
        match self
            .deps
            .chain
            .recent_signatures(&wallet_address, fetch_limit)
            .await
        {
            Ok(signatures) => {
                for sig in &signatures {
                    self.cache.mark_seen(sig);
                }
                tracing::info!(
                    job_id = %self.job_id,
                    wallet = %wallet_address,
                    baseline = signatures.len(),
                    "Wallet mirror started"
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "Baseline fetch failed");
            }
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_interval));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_once(&wallet_address, fetch_limit).await {
                        tracing::warn!(job_id = %self.job_id, error = %e, "Wallet poll failed");
                    }
                }
            }
        }

        tracing::info!(job_id = %self.job_id, "Wallet mirror stopped");
    }

    async fn poll_once(&self, wallet_address: &str, fetch_limit: usize) -> AppResult<()> {
        let signatures = self
            .deps
            .chain
            .recent_signatures(wallet_address, fetch_limit)
            .await?;

        // Oldest first, so mirrors land in source order
        for signature in signatures.iter().rev() {
            if !self.cache.try_begin(signature) {
                continue;
            }

            match self.mirror_signature(signature, wallet_address).await {
                Ok(()) => self.cache.finish(signature, true),
                Err(e) => {
                    tracing::warn!(
                        job_id = %self.job_id,
                        signature,
                        error = %e,
                        "Mirror attempt failed, will retry on a later poll"
                    );
                    self.cache.finish(signature, false);
                }
            }
        }

        Ok(())
    }

    async fn mirror_signature(&self, signature: &str, wallet_address: &str) -> AppResult<()> {
        let policy = &self.deps.config.mirror;

        let Some(deltas) = self
            .deps
            .chain
            .transaction_deltas(signature, wallet_address)
            .await?
        else {
            return Ok(());
        };

        let Some(swap) = detect_swap(&deltas, policy) else {
            tracing::debug!(signature, "Transaction is not a swap, skipping");
            return Ok(());
        };

        let (our_pubkey, job_percentage) = {
            let job = self.job.read().await;
            let JobKind::WalletMirror { percentage, .. } = &job.kind else {
                return Ok(());
            };
            (job.trading_wallet_pubkey.clone(), *percentage)
        };

        let fee_reserve = Decimal::from(policy.fee_reserve_lamports);
        let native_balance = Decimal::from(self.deps.chain.native_balance(&our_pubkey).await?);

        let our_balance = match &swap.input {
            SwapLeg::Native => {
                // The reserve is never traded away
                (native_balance - fee_reserve).max(Decimal::ZERO)
            }
            SwapLeg::Token(mint) => {
                if native_balance < fee_reserve {
                    tracing::warn!(
                        job_id = %self.job_id,
                        signature,
                        "Native balance below fee reserve, skipping mirror"
                    );
                    return Ok(());
                }
                self.deps.chain.token_balance(&our_pubkey, mint).await?
            }
        };

        let amount = match mirror_amount(&swap, our_balance, job_percentage, policy) {
            MirrorDecision::Trade { amount } => amount,
            MirrorDecision::BelowFloor => {
                tracing::debug!(signature, "Mirror amount below floor, skipping");
                return Ok(());
            }
            MirrorDecision::InsufficientBalance => {
                tracing::warn!(job_id = %self.job_id, signature, "No balance to mirror with");
                return Ok(());
            }
        };

        let request = QuoteRequest {
            input_mint: swap.input.mint().to_string(),
            output_mint: swap.output.mint().to_string(),
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
        .map_err(|e| AppError::Execution(format!("mirror swap failed: {}", e)))?;

        tracing::info!(
            job_id = %self.job_id,
            source_signature = signature,
            mirror_signature = %receipt.signature,
            input_mint = %request.input_mint,
            output_mint = %request.output_mint,
            amount = %amount,
            "Mirrored source wallet swap"
        );

        let mut job = self.job.write().await;
        job.touch();
        if let JobKind::WalletMirror {
            mirrored_tokens,
            recent_transactions,
            ..
        } = &mut job.kind
        {
            if let SwapLeg::Token(mint) = &swap.output {
                *mirrored_tokens.entry(mint.clone()).or_insert(Decimal::ZERO) +=
                    receipt.output_amount;
            }
            push_recent_transaction(recent_transactions, receipt.signature);
        }
        drop(job);

        super::refresh_profit(&self.job, &self.deps).await;
        Ok(())
    }
}

#[async_trait]
impl Worker for WalletMonitorWorker {
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
            cache: Arc::clone(&self.cache),
            state: Arc::clone(&self.state),
            shutdown: Mutex::new(token.clone()),
            handle: Mutex::new(None),
        });
        *self.handle.lock() = Some(tokio::spawn(worker.run(token)));

        Ok(())
    }

    async fn stop(&self) {
        self.shutdown.lock().cancel();
        // No trade fires after stop resolves
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        *self.state.lock() = WorkerState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TokenDelta;

    const MINT_X: &str = "MintX1111111111111111111111111111111111111";

    fn policy() -> MirrorPolicy {
        MirrorPolicy::default()
    }

    fn token_sell_deltas(pre: i64, post: i64) -> TransactionDeltas {
        TransactionDeltas {
            signature: "sig".to_string(),
            native_pre_lamports: 1_000_000_000,
            native_post_lamports: 1_499_000_000,
            token_deltas: vec![TokenDelta {
                mint: MINT_X.to_string(),
                pre_amount: Decimal::from(pre),
                post_amount: Decimal::from(post),
            }],
        }
    }

    fn native_buy_deltas(pre_lamports: u64, post_lamports: u64) -> TransactionDeltas {
        TransactionDeltas {
            signature: "sig".to_string(),
            native_pre_lamports: pre_lamports,
            native_post_lamports: post_lamports,
            token_deltas: vec![TokenDelta {
                mint: MINT_X.to_string(),
                pre_amount: Decimal::ZERO,
                post_amount: Decimal::from(500_000),
            }],
        }
    }

    #[test]
    fn test_detect_token_sell() {
        let swap = detect_swap(&token_sell_deltas(1_000_000, 600_000), &policy()).unwrap();
        assert_eq!(swap.input, SwapLeg::Token(MINT_X.to_string()));
        assert_eq!(swap.output, SwapLeg::Native);
        assert_eq!(swap.their_input_amount, Decimal::from(400_000));
        assert_eq!(swap.their_pre_balance, Decimal::from(1_000_000));
    }

    #[test]
    fn test_detect_native_buy() {
        let swap = detect_swap(&native_buy_deltas(5_000_000_000, 4_000_000_000), &policy()).unwrap();
        assert_eq!(swap.input, SwapLeg::Native);
        assert_eq!(swap.output, SwapLeg::Token(MINT_X.to_string()));
        assert_eq!(swap.their_input_amount, Decimal::from(1_000_000_000));
    }

    #[test]
    fn test_fee_noise_is_not_a_swap() {
        let deltas = TransactionDeltas {
            signature: "sig".to_string(),
            native_pre_lamports: 1_000_000_000,
            native_post_lamports: 999_995_000,
            token_deltas: vec![],
        };
        assert!(detect_swap(&deltas, &policy()).is_none());
    }

    #[test]
    fn test_token_mirror_is_proportional() {
        // Source sold 40% of their token balance; we sell 40% of ours
        let swap = detect_swap(&token_sell_deltas(1_000_000, 600_000), &policy()).unwrap();
        let decision = mirror_amount(&swap, Decimal::from(2_000_000), 50.0, &policy());
        assert_eq!(
            decision,
            MirrorDecision::Trade {
                amount: Decimal::from(800_000)
            }
        );
    }

    #[test]
    fn test_native_mirror_scales_by_allocation() {
        // Source spent 20% of their SOL; with a 50% allocation we spend
        // 10% of our available balance
        let swap = detect_swap(&native_buy_deltas(5_000_000_000, 4_000_000_000), &policy()).unwrap();
        let decision = mirror_amount(&swap, Decimal::from(10_000_000_000u64), 50.0, &policy());
        assert_eq!(
            decision,
            MirrorDecision::Trade {
                amount: Decimal::from(1_000_000_000)
            }
        );
    }

    #[test]
    fn test_dust_rule_mirrors_entire_balance() {
        // Source exited 99% of their position: we exit fully, allocation
        // percentage notwithstanding
        let swap = detect_swap(&token_sell_deltas(1_000_000, 10_000), &policy()).unwrap();
        let decision = mirror_amount(&swap, Decimal::from(123_456_789), 25.0, &policy());
        assert_eq!(
            decision,
            MirrorDecision::Trade {
                amount: Decimal::from(123_456_789)
            }
        );
    }

    #[test]
    fn test_floor_rounds_up_when_balance_covers() {
        // Proportional amount of 400 is below the 1000 floor; balance covers
        // the floor so the trade is rounded up to it
        let swap = detect_swap(&token_sell_deltas(1_000_000, 600_000), &policy()).unwrap();
        let decision = mirror_amount(&swap, Decimal::from(1_000), 50.0, &policy());
        assert_eq!(
            decision,
            MirrorDecision::Trade {
                amount: Decimal::from(1_000)
            }
        );
    }

    #[test]
    fn test_below_floor_without_coverage_skips() {
        let swap = detect_swap(&token_sell_deltas(1_000_000, 600_000), &policy()).unwrap();
        let decision = mirror_amount(&swap, Decimal::from(500), 50.0, &policy());
        assert_eq!(decision, MirrorDecision::BelowFloor);
    }

    #[test]
    fn test_zero_balance_is_insufficient() {
        let swap = detect_swap(&token_sell_deltas(1_000_000, 600_000), &policy()).unwrap();
        assert_eq!(
            mirror_amount(&swap, Decimal::ZERO, 50.0, &policy()),
            MirrorDecision::InsufficientBalance
        );
    }

    #[test]
    fn test_zero_pre_balance_never_trades() {
        let swap = DetectedSwap {
            input: SwapLeg::Token(MINT_X.to_string()),
            output: SwapLeg::Native,
            their_input_amount: Decimal::from(100),
            their_pre_balance: Decimal::ZERO,
        };
        assert_eq!(
            mirror_amount(&swap, Decimal::from(1_000_000), 50.0, &policy()),
            MirrorDecision::BelowFloor
        );
    }

    #[test]
    fn test_signature_cache_replay_is_idempotent() {
        let cache = SignatureCache::new(50, Duration::hours(1));

        assert!(cache.try_begin("sig1"));
        cache.finish("sig1", true);

        // Replayed signature is refused
        assert!(!cache.try_begin("sig1"));
    }

    #[test]
    fn test_signature_cache_blocks_in_flight() {
        let cache = SignatureCache::new(50, Duration::hours(1));

        assert!(cache.try_begin("sig1"));
        // Still being processed: a concurrent poll cannot claim it
        assert!(!cache.try_begin("sig1"));

        // A failed attempt releases the claim for retry
        cache.finish("sig1", false);
        assert!(cache.try_begin("sig1"));
    }

    #[test]
    fn test_signature_cache_bounded_capacity() {
        let cache = SignatureCache::new(3, Duration::hours(1));
        for i in 0..5 {
            let sig = format!("sig{}", i);
            assert!(cache.try_begin(&sig));
            cache.finish(&sig, true);
        }
        // Oldest entries were evicted by the LRU bound
        assert!(!cache.contains("sig0"));
        assert!(cache.contains("sig4"));
    }
}
