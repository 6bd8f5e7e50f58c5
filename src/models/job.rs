//! Job models - the tagged union of strategy jobs and their mutable state

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Per-job profit tracking
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfitTracking {
    /// Native-asset balance when the job was created, in lamports
    pub initial_balance: Decimal,
    /// USD value of the wallet when the job was created
    pub initial_value_usd: f64,
    /// Latest observed native-asset balance, in lamports
    pub current_balance: Decimal,
    /// Latest observed USD value
    pub current_value_usd: f64,
}

impl ProfitTracking {
    /// Derived profit percentage against the initial value
    pub fn profit_percent(&self) -> f64 {
        if self.initial_value_usd <= 0.0 {
            return 0.0;
        }
        (self.current_value_usd - self.initial_value_usd) / self.initial_value_usd * 100.0
    }

    /// Record the latest observed balance and value; the first observation
    /// seeds the baseline the profit percentage is measured against
    pub fn observe(&mut self, balance: Decimal, value_usd: f64) {
        if self.initial_value_usd <= 0.0 {
            self.initial_balance = balance;
            self.initial_value_usd = value_usd;
        }
        self.current_balance = balance;
        self.current_value_usd = value_usd;
    }
}

/// Direction of a one-shot price trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Above,
    Below,
}

/// Level kind in a price ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    LimitBuy,
    StopLoss,
    TakeProfit,
}

impl LevelKind {
    /// Whether this level's price condition is met at the given price
    pub fn condition_met(&self, level_price: f64, current_price: f64) -> bool {
        match self {
            // Buy the dip / cut the loss: trigger at or below the level
            LevelKind::LimitBuy | LevelKind::StopLoss => current_price <= level_price,
            // Take profit: trigger at or above the level
            LevelKind::TakeProfit => current_price >= level_price,
        }
    }
}

impl std::fmt::Display for LevelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelKind::LimitBuy => write!(f, "limit_buy"),
            LevelKind::StopLoss => write!(f, "stop_loss"),
            LevelKind::TakeProfit => write!(f, "take_profit"),
        }
    }
}

/// How a level sizes its trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSizing {
    /// Spend a fixed USDC amount (raw units)
    UsdcAmount(Decimal),
    /// Sell a percentage of the native-asset balance
    SolPercentage(f64),
}

/// One executed trigger of a level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelExecution {
    pub price: f64,
    pub signature: Option<String>,
    pub at: DateTime<Utc>,
}

/// One rung of a Levels ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub kind: LevelKind,
    pub sizing: LevelSizing,
    /// Times this level has executed; never exceeds the job's max_retriggers
    pub executed_count: u32,
    /// Suppresses re-execution until this instant
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Once set, the level never re-executes
    pub permanently_disabled: bool,
    pub execution_history: Vec<LevelExecution>,
}

impl Level {
    pub fn new(price: f64, kind: LevelKind, sizing: LevelSizing) -> Self {
        Self {
            price,
            kind,
            sizing,
            executed_count: 0,
            cooldown_until: None,
            permanently_disabled: false,
            execution_history: Vec::new(),
        }
    }

    /// Whether this level may execute at the given price and time
    pub fn is_eligible(&self, current_price: f64, now: DateTime<Utc>, max_retriggers: u32) -> bool {
        if self.permanently_disabled || self.executed_count >= max_retriggers {
            return false;
        }
        if let Some(until) = self.cooldown_until {
            if now < until {
                return false;
            }
        }
        self.kind.condition_met(self.price, current_price)
    }

    /// Record an execution: bump the counter, start the cooldown, disable
    /// permanently once the retrigger budget is exhausted
    pub fn record_execution(
        &mut self,
        price: f64,
        signature: Option<String>,
        cooldown: Duration,
        max_retriggers: u32,
        now: DateTime<Utc>,
    ) {
        self.executed_count += 1;
        self.cooldown_until = Some(now + cooldown);
        self.execution_history.push(LevelExecution {
            price,
            signature,
            at: now,
        });
        if self.executed_count >= max_retriggers {
            self.permanently_disabled = true;
        }
    }
}

/// Trading direction of a Levels job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelsMode {
    Buy,
    Sell,
}

/// Type-specific job state (tagged union by kind)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobKind {
    /// Mirror another wallet's swaps proportionally
    WalletMirror {
        /// The monitored wallet
        wallet_address: String,
        /// Allocation percentage applied to native-asset mirrors
        percentage: f64,
        /// Tokens mirrored so far and their accumulated raw amounts
        #[serde(default)]
        mirrored_tokens: HashMap<String, Decimal>,
        /// Ring of recently mirrored signatures, most recent last
        #[serde(default)]
        recent_transactions: VecDeque<String>,
    },
    /// One-shot price trigger
    PriceTrigger {
        target_price: f64,
        direction: PriceDirection,
        /// Percentage of the native-asset balance to sell when triggered
        percentage_to_sell: f64,
        #[serde(default)]
        last_trigger_price: Option<f64>,
    },
    /// Multi-level price ladder
    Levels {
        levels: Vec<Level>,
        mode: LevelsMode,
        cooldown_hours: u32,
        max_retriggers: u32,
    },
    /// Signal-driven pair trading
    PairTrade {
        token_a_mint: String,
        token_b_mint: String,
        allocation_percentage: f64,
        max_slippage_bps: u16,
    },
}

impl JobKind {
    /// Stable name of the variant, used in logs and persistence
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::WalletMirror { .. } => "wallet_mirror",
            JobKind::PriceTrigger { .. } => "price_trigger",
            JobKind::Levels { .. } => "levels",
            JobKind::PairTrade { .. } => "pair_trade",
        }
    }
}

/// A strategy job attached to a trading wallet
///
/// Exactly one live worker runs per active job id; the id is the join key
/// across the manager, persistence and the API.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub trading_wallet_pubkey: String,
    /// Opaque signing credential, never logged
    pub trading_wallet_secret: SecretString,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub profit: ProfitTracking,
    pub kind: JobKind,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        trading_wallet_pubkey: impl Into<String>,
        trading_wallet_secret: SecretString,
        kind: JobKind,
    ) -> Self {
        Self {
            id: id.into(),
            trading_wallet_pubkey: trading_wallet_pubkey.into(),
            trading_wallet_secret,
            is_active: true,
            created_at: Utc::now(),
            last_activity: None,
            profit: ProfitTracking::default(),
            kind,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

/// Cap on the recent-transactions ring carried by mirror jobs
pub const RECENT_TRANSACTIONS_CAP: usize = 20;

/// Push a signature onto a mirror job's recent-transactions ring
pub fn push_recent_transaction(ring: &mut VecDeque<String>, signature: String) {
    ring.push_back(signature);
    while ring.len() > RECENT_TRANSACTIONS_CAP {
        ring.pop_front();
    }
}
