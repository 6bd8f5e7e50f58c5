//! Job lifecycle: registration, toggling, removal, completion events.

mod common;

use common::*;
use mirror_engine::db::{self, DbPool};
use mirror_engine::holdings::HoldingsTracker;
use mirror_engine::jobs::{refresh_profit, JobEvent, JobManager, WorkerDeps};
use mirror_engine::models::{Job, JobKind, Level, LevelKind, LevelSizing, LevelsMode};
use rust_decimal::Decimal;
use secrecy::SecretString;
use sqlx::Row;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

async fn manager() -> (Arc<JobManager>, DbPool, mpsc::Sender<JobEvent>) {
    let pool = memory_pool().await;
    let config = test_config();
    let feed = price_feed(&config);
    let holdings = Arc::new(HoldingsTracker::new(pool.clone(), Arc::clone(&feed)));
    let (events_tx, events_rx) = mpsc::channel(16);

    let manager = Arc::new(JobManager::new(WorkerDeps {
        chain: Arc::new(MockChainClient::new()),
        gateway: Arc::new(MockSwapGateway::new()),
        price_feed: feed,
        holdings,
        pool: pool.clone(),
        config,
        events: events_tx.clone(),
    }));
    manager.spawn_event_listener(events_rx);

    (manager, pool, events_tx)
}

fn pair_trade_job(id: &str) -> Job {
    Job::new(
        id,
        WALLET_1,
        SecretString::new("test-signing-key".to_string()),
        JobKind::PairTrade {
            token_a_mint: MINT_A.to_string(),
            token_b_mint: MINT_B.to_string(),
            allocation_percentage: 50.0,
            max_slippage_bps: 100,
        },
    )
}

fn mirror_job(id: &str) -> Job {
    Job::new(
        id,
        WALLET_1,
        SecretString::new("test-signing-key".to_string()),
        JobKind::WalletMirror {
            wallet_address: WALLET_2.to_string(),
            percentage: 50.0,
            mirrored_tokens: HashMap::new(),
            recent_transactions: VecDeque::new(),
        },
    )
}

async fn strategy_active(pool: &DbPool, strategy_id: &str) -> bool {
    sqlx::query("SELECT is_active FROM pair_strategies WHERE strategy_id = ?")
        .bind(strategy_id)
        .fetch_one(pool)
        .await
        .unwrap()
        .get::<i64, _>(0)
        == 1
}

#[tokio::test]
async fn test_add_registers_job_and_strategy_row() {
    let (manager, pool, _) = manager().await;

    manager.add_job(pair_trade_job("job-1")).await.unwrap();

    assert_eq!(manager.job_ids().await, vec!["job-1".to_string()]);
    assert!(strategy_active(&pool, "job-1").await);

    let strategies = db::get_active_pair_strategies(&pool, MINT_A, MINT_B)
        .await
        .unwrap();
    assert_eq!(strategies.len(), 1);
    assert_eq!(strategies[0].trading_wallet_pubkey, WALLET_1);
}

#[tokio::test]
async fn test_duplicate_add_is_a_noop() {
    let (manager, _, _) = manager().await;

    manager.add_job(pair_trade_job("job-1")).await.unwrap();
    manager.add_job(pair_trade_job("job-1")).await.unwrap();

    assert_eq!(manager.job_ids().await.len(), 1);
}

#[tokio::test]
async fn test_toggle_sets_active_state_without_rebuilding() {
    let (manager, pool, _) = manager().await;
    manager.add_job(pair_trade_job("job-1")).await.unwrap();

    let active = manager.toggle_job("job-1", false).await.unwrap();
    assert!(!active);
    assert!(!strategy_active(&pool, "job-1").await);
    assert!(!manager.get_job("job-1").await.unwrap().is_active);

    // Idempotent: pausing a paused job lands on the same state
    let active = manager.toggle_job("job-1", false).await.unwrap();
    assert!(!active);

    let active = manager.toggle_job("job-1", true).await.unwrap();
    assert!(active);
    assert!(strategy_active(&pool, "job-1").await);
}

#[tokio::test]
async fn test_paused_job_stays_paused_until_toggled() {
    let (manager, pool, _) = manager().await;

    let mut job = pair_trade_job("paused-1");
    job.is_active = false;
    manager.add_job(job).await.unwrap();

    let snapshot = manager.get_job("paused-1").await.unwrap();
    assert!(!snapshot.is_active);
    assert!(!strategy_active(&pool, "paused-1").await);

    manager.toggle_job("paused-1", true).await.unwrap();
    assert!(manager.get_job("paused-1").await.unwrap().is_active);
    assert!(strategy_active(&pool, "paused-1").await);
}

#[tokio::test]
async fn test_remove_stops_and_discards() {
    let (manager, pool, _) = manager().await;
    manager.add_job(pair_trade_job("job-1")).await.unwrap();

    manager.remove_job("job-1").await.unwrap();

    assert!(manager.job_ids().await.is_empty());
    assert!(!strategy_active(&pool, "job-1").await);
    assert!(manager.remove_job("job-1").await.is_err());
}

#[tokio::test]
async fn test_completion_event_retires_the_job() {
    let (manager, _, events) = manager().await;
    manager.add_job(mirror_job("job-1")).await.unwrap();

    events
        .send(JobEvent::Completed {
            job_id: "job-1".to_string(),
        })
        .await
        .unwrap();

    // The listener runs on a spawned task; give it a beat
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(manager.job_ids().await.is_empty());
}

#[tokio::test]
async fn test_profit_tracking_follows_wallet_value() {
    let pool = memory_pool().await;
    let config = test_config();
    let feed = price_feed(&config);
    let holdings = Arc::new(HoldingsTracker::new(pool.clone(), Arc::clone(&feed)));
    let chain = Arc::new(MockChainClient::new());
    let (events_tx, _events_rx) = mpsc::channel(16);
    let deps = WorkerDeps {
        chain: chain.clone(),
        gateway: Arc::new(MockSwapGateway::new()),
        price_feed: Arc::clone(&feed),
        holdings,
        pool,
        config,
        events: events_tx,
    };

    // 10 SOL at $150 seeds the baseline
    chain.set_native_balance(WALLET_1, 10_000_000_000);
    feed.publish(MINT_A, 150.0, chrono::Utc::now());

    let job = Arc::new(tokio::sync::RwLock::new(mirror_job("job-1")));
    refresh_profit(&job, &deps).await;
    {
        let job = job.read().await;
        assert_eq!(job.profit.initial_value_usd, 1_500.0);
        assert_eq!(job.profit.profit_percent(), 0.0);
    }

    // The wallet grows to 12 SOL; the baseline stays put
    chain.set_native_balance(WALLET_1, 12_000_000_000);
    refresh_profit(&job, &deps).await;
    {
        let job = job.read().await;
        assert_eq!(job.profit.initial_value_usd, 1_500.0);
        assert_eq!(job.profit.current_value_usd, 1_800.0);
        assert!((job.profit.profit_percent() - 20.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn test_price_trigger_fires_once_then_retires() {
    let pool = memory_pool().await;
    let config = test_config();
    let feed = price_feed(&config);
    let holdings = Arc::new(HoldingsTracker::new(pool.clone(), Arc::clone(&feed)));
    let chain = Arc::new(MockChainClient::new());
    let gateway = Arc::new(MockSwapGateway::new());
    let (events_tx, events_rx) = mpsc::channel(16);

    let manager = Arc::new(JobManager::new(WorkerDeps {
        chain: chain.clone(),
        gateway: gateway.clone(),
        price_feed: Arc::clone(&feed),
        holdings,
        pool,
        config,
        events: events_tx,
    }));
    manager.spawn_event_listener(events_rx);

    chain.set_native_balance(WALLET_1, 10_000_000_000);
    let job = Job::new(
        "job-1",
        WALLET_1,
        SecretString::new("test-signing-key".to_string()),
        JobKind::PriceTrigger {
            target_price: 150.0,
            direction: mirror_engine::models::PriceDirection::Above,
            percentage_to_sell: 25.0,
            last_trigger_price: None,
        },
    );
    manager.add_job(job).await.unwrap();

    // Let the worker subscribe before the tick arrives
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    feed.publish(MINT_A, 151.0, chrono::Utc::now());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // One trade, then the completion event retires the job
    assert_eq!(gateway.execution_count(), 1);
    assert!(manager.job_ids().await.is_empty());

    // A later qualifying tick finds no listener
    feed.publish(MINT_A, 160.0, chrono::Utc::now());
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(gateway.execution_count(), 1);
}

#[tokio::test]
async fn test_level_buy_spends_at_most_the_token_balance() {
    let pool = memory_pool().await;
    let config = test_config();
    let feed = price_feed(&config);
    let holdings = Arc::new(HoldingsTracker::new(pool.clone(), Arc::clone(&feed)));
    let chain = Arc::new(MockChainClient::new());
    let gateway = Arc::new(MockSwapGateway::new());
    let (events_tx, events_rx) = mpsc::channel(16);

    let manager = Arc::new(JobManager::new(WorkerDeps {
        chain: chain.clone(),
        gateway: gateway.clone(),
        price_feed: Arc::clone(&feed),
        holdings,
        pool,
        config,
        events: events_tx,
    }));
    manager.spawn_event_listener(events_rx);

    // The level wants 500k USDC but the wallet only holds 300k
    chain.set_token_balance(WALLET_1, MINT_B, Decimal::from(300_000));
    let job = Job::new(
        "job-1",
        WALLET_1,
        SecretString::new("test-signing-key".to_string()),
        JobKind::Levels {
            levels: vec![Level::new(
                100.0,
                LevelKind::LimitBuy,
                LevelSizing::UsdcAmount(Decimal::from(500_000)),
            )],
            mode: LevelsMode::Buy,
            cooldown_hours: 1,
            max_retriggers: 3,
        },
    );
    manager.add_job(job).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    feed.publish(MINT_A, 99.0, chrono::Utc::now());
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    assert_eq!(gateway.execution_count(), 1);
    assert_eq!(
        gateway.executions.lock()[0].input_amount,
        Decimal::from(300_000)
    );
}

#[tokio::test]
async fn test_stop_all_halts_every_worker() {
    let (manager, _, _) = manager().await;
    manager.add_job(pair_trade_job("job-1")).await.unwrap();
    manager.add_job(mirror_job("job-2")).await.unwrap();

    manager.stop_all().await;

    // Jobs remain registered; only their workers are stopped
    assert_eq!(manager.job_ids().await.len(), 2);
}
