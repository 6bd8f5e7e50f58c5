//! Database module for the strategy execution engine
//!
//! Manages a SQLite connection pool with WAL mode and provides the durable
//! tables: per-strategy holdings, the append-only trade ledger, the
//! pair-strategy registry and the signal audit log.

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::models::{ExecutionStatus, StrategyHoldings, TokenPosition, TradeRecord};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{info, warn};

/// Type alias for the SQLite connection pool
pub type DbPool = Pool<Sqlite>;

/// Embedded schema applied at startup
const SCHEMA: &str = include_str!("../database/schema.sql");

/// Initialize the database connection pool
pub async fn init_pool(config: &DatabaseConfig) -> AppResult<DbPool> {
    // Ensure data directory exists
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(format!("Failed to create database directory: {}", e))
            })?;
            info!("Created database directory: {:?}", parent);
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", config.path.display());

    let connect_options = SqliteConnectOptions::from_str(&db_url)
        .map_err(AppError::Database)?
        // Enable WAL mode for concurrent reads
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5))
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect_with(connect_options)
        .await?;

    info!(
        "Database pool initialized: {:?} (max {} connections)",
        config.path, config.max_connections
    );

    Ok(pool)
}

/// Apply the embedded schema
pub async fn run_migrations(pool: &DbPool) -> AppResult<()> {
    // Comment lines go first: they may contain semicolons, which would
    // corrupt the statement split below
    let schema: String = SCHEMA
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    // SQLite doesn't support multiple statements in one query
    for statement in schema.split(';') {
        let stmt = statement.trim();
        if stmt.is_empty() {
            continue;
        }

        if let Err(e) = sqlx::query(stmt).execute(pool).await {
            if e.to_string().contains("already exists") {
                warn!("Table/index already exists, skipping: {}", e);
                continue;
            }
            return Err(AppError::Database(e));
        }
    }

    info!("Database schema applied successfully");
    Ok(())
}

fn parse_decimal(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|_| {
        warn!(raw, "Unparseable decimal in database, defaulting to zero");
        Decimal::ZERO
    })
}

fn parse_datetime(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// =============================================================================
// STRATEGY HOLDINGS
// =============================================================================

/// Upsert a strategy's holdings: update the existing row if one exists,
/// insert otherwise
pub async fn upsert_holdings(pool: &DbPool, holdings: &StrategyHoldings) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO strategy_holdings (
            strategy_id, token_a_mint, token_a_amount,
            token_b_mint, token_b_amount, total_allocated_sol, last_updated
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(strategy_id) DO UPDATE SET
            token_a_mint = excluded.token_a_mint,
            token_a_amount = excluded.token_a_amount,
            token_b_mint = excluded.token_b_mint,
            token_b_amount = excluded.token_b_amount,
            total_allocated_sol = excluded.total_allocated_sol,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(&holdings.strategy_id)
    .bind(&holdings.token_a.mint)
    .bind(holdings.token_a.amount.to_string())
    .bind(&holdings.token_b.mint)
    .bind(holdings.token_b.amount.to_string())
    .bind(holdings.total_allocated_sol.to_string())
    .bind(holdings.last_updated.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a strategy's holdings
pub async fn get_holdings(pool: &DbPool, strategy_id: &str) -> AppResult<Option<StrategyHoldings>> {
    let row: Option<(String, String, String, String, String, String)> = sqlx::query_as(
        r#"
        SELECT token_a_mint, token_a_amount, token_b_mint, token_b_amount,
               total_allocated_sol, last_updated
        FROM strategy_holdings
        WHERE strategy_id = ?
        "#,
    )
    .bind(strategy_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(a_mint, a_amount, b_mint, b_amount, allocated, updated)| StrategyHoldings {
            strategy_id: strategy_id.to_string(),
            token_a: TokenPosition::new(a_mint, parse_decimal(&a_amount)),
            token_b: TokenPosition::new(b_mint, parse_decimal(&b_amount)),
            total_allocated_sol: parse_decimal(&allocated),
            last_updated: parse_datetime(&updated),
        },
    ))
}

// =============================================================================
// TRADE LEDGER (append-only)
// =============================================================================

/// Insert a new trade row; always an insert, never an update
pub async fn insert_trade(pool: &DbPool, trade: &TradeRecord) -> AppResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO trade_history (
            strategy_id, trade_type, from_mint, to_mint, input_amount,
            output_amount, percentage_traded, slippage_bps, signature,
            signal_data, execution_status, error_message, created_at, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&trade.strategy_id)
    .bind(&trade.trade_type)
    .bind(&trade.from_mint)
    .bind(&trade.to_mint)
    .bind(trade.input_amount.to_string())
    .bind(trade.output_amount.map(|a| a.to_string()))
    .bind(trade.percentage_traded)
    .bind(trade.slippage_bps.map(|b| b as i64))
    .bind(&trade.signature)
    .bind(trade.signal_data.as_ref().map(|d| d.to_string()))
    .bind(trade.execution_status.to_string())
    .bind(&trade.error_message)
    .bind(trade.created_at.to_rfc3339())
    .bind(trade.completed_at.map(|t| t.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Move a pending trade row to its terminal status
///
/// `completed_at` is set only for fully completed trades. Rows already in a
/// terminal status are left untouched.
pub async fn finalize_trade(pool: &DbPool, id: i64, trade: &TradeRecord) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE trade_history
        SET execution_status = ?, signature = ?, output_amount = ?,
            error_message = ?, completed_at = ?
        WHERE id = ? AND execution_status = 'pending'
        "#,
    )
    .bind(trade.execution_status.to_string())
    .bind(&trade.signature)
    .bind(trade.output_amount.map(|a| a.to_string()))
    .bind(&trade.error_message)
    .bind(trade.completed_at.map(|t| t.to_rfc3339()))
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch all trades for a strategy, most recent first
pub async fn get_trades_for_strategy(
    pool: &DbPool,
    strategy_id: &str,
) -> AppResult<Vec<TradeRecord>> {
    type Row = (
        i64,
        String,
        String,
        String,
        String,
        Option<String>,
        Option<f64>,
        Option<i64>,
        Option<String>,
        Option<String>,
        String,
        Option<String>,
        String,
        Option<String>,
    );

    let rows: Vec<Row> = sqlx::query_as(
        r#"
        SELECT id, trade_type, from_mint, to_mint, input_amount, output_amount,
               percentage_traded, slippage_bps, signature, signal_data,
               execution_status, error_message, created_at, completed_at
        FROM trade_history
        WHERE strategy_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(strategy_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(
                id,
                trade_type,
                from_mint,
                to_mint,
                input_amount,
                output_amount,
                percentage_traded,
                slippage_bps,
                signature,
                signal_data,
                status,
                error_message,
                created_at,
                completed_at,
            )| TradeRecord {
                id: Some(id),
                strategy_id: strategy_id.to_string(),
                trade_type,
                from_mint,
                to_mint,
                input_amount: parse_decimal(&input_amount),
                output_amount: output_amount.as_deref().map(parse_decimal),
                percentage_traded,
                slippage_bps: slippage_bps.map(|b| b as u16),
                signature,
                signal_data: signal_data.and_then(|d| serde_json::from_str(&d).ok()),
                execution_status: status
                    .parse::<ExecutionStatus>()
                    .unwrap_or(ExecutionStatus::Failed),
                error_message,
                created_at: parse_datetime(&created_at),
                completed_at: completed_at.as_deref().map(parse_datetime),
            },
        )
        .collect())
}

// =============================================================================
// PAIR STRATEGY REGISTRY
// =============================================================================

/// Registered pair-trade strategy, resolved on each signal
#[derive(Debug, Clone)]
pub struct PairStrategy {
    pub strategy_id: String,
    pub trading_wallet_pubkey: String,
    pub token_a_mint: String,
    pub token_b_mint: String,
    pub allocation_percentage: f64,
    pub max_slippage_bps: u16,
    pub is_active: bool,
}

/// Upsert a pair strategy row
pub async fn upsert_pair_strategy(pool: &DbPool, strategy: &PairStrategy) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO pair_strategies (
            strategy_id, trading_wallet_pubkey, token_a_mint, token_b_mint,
            allocation_percentage, max_slippage_bps, is_active, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(strategy_id) DO UPDATE SET
            trading_wallet_pubkey = excluded.trading_wallet_pubkey,
            token_a_mint = excluded.token_a_mint,
            token_b_mint = excluded.token_b_mint,
            allocation_percentage = excluded.allocation_percentage,
            max_slippage_bps = excluded.max_slippage_bps,
            is_active = excluded.is_active
        "#,
    )
    .bind(&strategy.strategy_id)
    .bind(&strategy.trading_wallet_pubkey)
    .bind(&strategy.token_a_mint)
    .bind(&strategy.token_b_mint)
    .bind(strategy.allocation_percentage)
    .bind(strategy.max_slippage_bps as i64)
    .bind(if strategy.is_active { 1 } else { 0 })
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// All active strategies bound to exactly this ordered pair
pub async fn get_active_pair_strategies(
    pool: &DbPool,
    token_a_mint: &str,
    token_b_mint: &str,
) -> AppResult<Vec<PairStrategy>> {
    let rows: Vec<(String, String, f64, i64)> = sqlx::query_as(
        r#"
        SELECT strategy_id, trading_wallet_pubkey, allocation_percentage, max_slippage_bps
        FROM pair_strategies
        WHERE token_a_mint = ? AND token_b_mint = ? AND is_active = 1
        ORDER BY created_at
        "#,
    )
    .bind(token_a_mint)
    .bind(token_b_mint)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(strategy_id, trading_wallet_pubkey, allocation_percentage, max_slippage_bps)| {
                PairStrategy {
                    strategy_id,
                    trading_wallet_pubkey,
                    token_a_mint: token_a_mint.to_string(),
                    token_b_mint: token_b_mint.to_string(),
                    allocation_percentage,
                    max_slippage_bps: max_slippage_bps as u16,
                    is_active: true,
                }
            },
        )
        .collect())
}

/// Activate or deactivate a pair strategy
pub async fn set_pair_strategy_active(
    pool: &DbPool,
    strategy_id: &str,
    is_active: bool,
) -> AppResult<()> {
    sqlx::query("UPDATE pair_strategies SET is_active = ? WHERE strategy_id = ?")
        .bind(if is_active { 1 } else { 0 })
        .bind(strategy_id)
        .execute(pool)
        .await?;

    Ok(())
}

// =============================================================================
// SIGNAL AUDIT LOG
// =============================================================================

/// Record an incoming signal and its outcome; written for every signal,
/// accepted or rejected
pub async fn insert_signal_audit(
    pool: &DbPool,
    audit_id: &str,
    payload: &str,
    outcome: &str,
    error_message: Option<&str>,
) -> AppResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO signal_audit (audit_id, payload, outcome, error_message, received_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(audit_id)
    .bind(payload)
    .bind(outcome)
    .bind(error_message)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}
