//! Shared test fixtures: in-memory database, scripted chain and swap mocks.

use async_trait::async_trait;
use chrono::Utc;
use mirror_engine::chain::{ChainClient, TransactionDeltas};
use mirror_engine::config::{AppConfig, DatabaseConfig};
use mirror_engine::db::{self, DbPool, PairStrategy};
use mirror_engine::error::AppResult;
use mirror_engine::holdings::HoldingsTracker;
use mirror_engine::models::{StrategyHoldings, TokenPosition};
use mirror_engine::price_feed::PriceFeedService;
use mirror_engine::swap::{
    QuoteRequest, SwapError, SwapGateway, SwapQuote, SwapReceipt, SwapWallet,
};
use mirror_engine::trigger::WalletKeyResolver;
use mirror_engine::valuation::{ValuationError, ValuationOracle, ValuationResult};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

pub const MINT_A: &str = "So11111111111111111111111111111111111111112";
pub const MINT_B: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
pub const WALLET_1: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
pub const WALLET_2: &str = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T";

pub async fn memory_pool() -> DbPool {
    let config = DatabaseConfig {
        path: PathBuf::from(":memory:"),
        max_connections: 1,
    };
    let pool = db::init_pool(&config).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn test_config() -> Arc<AppConfig> {
    Arc::new(AppConfig::default())
}

pub fn price_feed(config: &AppConfig) -> Arc<PriceFeedService> {
    Arc::new(PriceFeedService::new(&config.price_feed))
}

pub fn pair_strategy(strategy_id: &str, wallet: &str, allocation: f64) -> PairStrategy {
    PairStrategy {
        strategy_id: strategy_id.to_string(),
        trading_wallet_pubkey: wallet.to_string(),
        token_a_mint: MINT_A.to_string(),
        token_b_mint: MINT_B.to_string(),
        allocation_percentage: allocation,
        max_slippage_bps: 100,
        is_active: true,
    }
}

pub async fn seed_holdings(
    tracker: &HoldingsTracker,
    strategy_id: &str,
    token_a_amount: i64,
    token_b_amount: i64,
) {
    tracker
        .update_holdings(&StrategyHoldings {
            strategy_id: strategy_id.to_string(),
            token_a: TokenPosition::new(MINT_A, Decimal::from(token_a_amount)),
            token_b: TokenPosition::new(MINT_B, Decimal::from(token_b_amount)),
            total_allocated_sol: Decimal::from(token_a_amount),
            last_updated: Utc::now(),
        })
        .await
        .unwrap();
}

/// Scripted swap gateway: per-wallet failures and a configurable fill ratio.
pub struct MockSwapGateway {
    pub fail_wallets: Mutex<HashSet<String>>,
    /// `filled_input = requested * fill_numerator / fill_denominator`
    pub fill_numerator: Decimal,
    pub fill_denominator: Decimal,
    pub executions: Mutex<Vec<SwapReceipt>>,
}

impl MockSwapGateway {
    pub fn new() -> Self {
        Self {
            fail_wallets: Mutex::new(HashSet::new()),
            fill_numerator: Decimal::ONE,
            fill_denominator: Decimal::ONE,
            executions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fill_ratio(numerator: i64, denominator: i64) -> Self {
        Self {
            fill_numerator: Decimal::from(numerator),
            fill_denominator: Decimal::from(denominator),
            ..Self::new()
        }
    }

    pub fn fail_for(&self, wallet: &str) {
        self.fail_wallets.lock().insert(wallet.to_string());
    }

    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }
}

#[async_trait]
impl SwapGateway for MockSwapGateway {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, SwapError> {
        Ok(SwapQuote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount: request.amount,
            out_amount: request.amount / Decimal::TWO,
            route: serde_json::json!({}),
        })
    }

    async fn execute(
        &self,
        quote: &SwapQuote,
        wallet: &SwapWallet,
        _fee_account: Option<&str>,
    ) -> Result<SwapReceipt, SwapError> {
        if self.fail_wallets.lock().contains(&wallet.pubkey) {
            return Err(SwapError::Build("scripted failure".to_string()));
        }

        let filled = (quote.in_amount * self.fill_numerator / self.fill_denominator).trunc();
        let receipt = SwapReceipt {
            signature: format!("mock-sig-{}", self.executions.lock().len() + 1),
            input_amount: filled,
            output_amount: (filled / Decimal::TWO).trunc(),
        };
        self.executions.lock().push(receipt.clone());
        Ok(receipt)
    }
}

/// Scripted chain client with fixed balances and transaction history.
pub struct MockChainClient {
    pub signatures: Mutex<Vec<String>>,
    pub deltas: Mutex<HashMap<String, TransactionDeltas>>,
    pub native_balances: Mutex<HashMap<String, u64>>,
    pub token_balances: Mutex<HashMap<(String, String), Decimal>>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            signatures: Mutex::new(Vec::new()),
            deltas: Mutex::new(HashMap::new()),
            native_balances: Mutex::new(HashMap::new()),
            token_balances: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_native_balance(&self, wallet: &str, lamports: u64) {
        self.native_balances
            .lock()
            .insert(wallet.to_string(), lamports);
    }

    pub fn set_token_balance(&self, wallet: &str, mint: &str, amount: Decimal) {
        self.token_balances
            .lock()
            .insert((wallet.to_string(), mint.to_string()), amount);
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn recent_signatures(&self, _wallet: &str, limit: usize) -> AppResult<Vec<String>> {
        Ok(self.signatures.lock().iter().take(limit).cloned().collect())
    }

    async fn transaction_deltas(
        &self,
        signature: &str,
        _wallet: &str,
    ) -> AppResult<Option<TransactionDeltas>> {
        Ok(self.deltas.lock().get(signature).cloned())
    }

    async fn native_balance(&self, wallet: &str) -> AppResult<u64> {
        Ok(*self.native_balances.lock().get(wallet).unwrap_or(&0))
    }

    async fn token_balance(&self, wallet: &str, mint: &str) -> AppResult<Decimal> {
        Ok(*self
            .token_balances
            .lock()
            .get(&(wallet.to_string(), mint.to_string()))
            .unwrap_or(&Decimal::ZERO))
    }
}

/// Oracle returning a fixed verdict, or a scripted error.
pub struct StaticOracle {
    pub result: Mutex<Option<ValuationResult>>,
    pub calls: Mutex<u32>,
}

impl StaticOracle {
    pub fn recommending(result: ValuationResult) -> Self {
        Self {
            result: Mutex::new(Some(result)),
            calls: Mutex::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            result: Mutex::new(None),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ValuationOracle for StaticOracle {
    async fn evaluate_pair(
        &self,
        _token_a_mint: &str,
        _token_b_mint: &str,
    ) -> Result<ValuationResult, ValuationError> {
        *self.calls.lock() += 1;
        self.result
            .lock()
            .clone()
            .ok_or_else(|| ValuationError::Unavailable("scripted outage".to_string()))
    }
}

/// Key resolver that signs everything with a fixed test credential.
pub struct StaticKeyResolver;

impl WalletKeyResolver for StaticKeyResolver {
    fn resolve(&self, _trading_wallet_pubkey: &str) -> AppResult<SecretString> {
        Ok(SecretString::new("test-signing-key".to_string()))
    }
}
