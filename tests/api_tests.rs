//! HTTP surface: envelope shape and status mapping.

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::*;
use mirror_engine::db;
use mirror_engine::executor::PairTradeExecutor;
use mirror_engine::handlers::{self, EngineState};
use mirror_engine::holdings::HoldingsTracker;
use mirror_engine::jobs::{JobManager, WorkerDeps};
use mirror_engine::trigger::TriggerService;
use mirror_engine::valuation::ValuationService;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

async fn server() -> (TestServer, db::DbPool, Arc<HoldingsTracker>) {
    let pool = memory_pool().await;
    let config = test_config();
    let feed = price_feed(&config);
    let gateway = Arc::new(MockSwapGateway::new());
    let chain = Arc::new(MockChainClient::new());
    let holdings = Arc::new(HoldingsTracker::new(pool.clone(), Arc::clone(&feed)));
    let valuation = Arc::new(ValuationService::new(
        Arc::new(StaticOracle::unavailable()),
        &config.valuation,
    ));
    let executor = Arc::new(PairTradeExecutor::new(
        gateway.clone(),
        chain.clone(),
        Arc::clone(&holdings),
        valuation,
        Arc::clone(&config),
    ));
    let trigger = Arc::new(TriggerService::new(
        pool.clone(),
        executor,
        Arc::new(StaticKeyResolver),
    ));

    let (events_tx, events_rx) = mpsc::channel(16);
    let job_manager = Arc::new(JobManager::new(WorkerDeps {
        chain,
        gateway,
        price_feed: feed,
        holdings: Arc::clone(&holdings),
        pool: pool.clone(),
        config,
        events: events_tx,
    }));
    job_manager.spawn_event_listener(events_rx);

    let state = Arc::new(EngineState {
        trigger,
        holdings: Arc::clone(&holdings),
        job_manager,
    });

    (
        TestServer::new(handlers::router(state)).unwrap(),
        pool,
        holdings,
    )
}

fn signal_body(percentage: f64) -> Value {
    json!({
        "tokenAMint": MINT_A,
        "tokenBMint": MINT_B,
        "action": "sell",
        "targetToken": "A",
        "percentage": percentage,
    })
}

#[tokio::test]
async fn test_pair_trade_returns_success_envelope() {
    let (server, pool, holdings) = server().await;
    db::upsert_pair_strategy(&pool, &pair_strategy("strat-1", WALLET_1, 50.0))
        .await
        .unwrap();
    seed_holdings(&holdings, "strat-1", 1_000, 0).await;

    let response = server
        .post("/triggers/pair-trade")
        .json(&signal_body(50.0))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["processedStrategies"], json!(1));
    assert_eq!(body["data"]["successfulTrades"], json!(1));
    assert_eq!(body["data"]["failedTrades"], json!(0));
}

#[tokio::test]
async fn test_invalid_signal_maps_to_bad_request_envelope() {
    let (server, _, _) = server().await;

    let response = server
        .post("/triggers/pair-trade")
        .json(&signal_body(150.0))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"], json!("validation_failed"));
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("percentage"));
}

#[tokio::test]
async fn test_unknown_action_rejected_at_deserialization() {
    let (server, _, _) = server().await;

    let mut body = signal_body(50.0);
    body["action"] = json!("hold");

    let response = server.post("/triggers/pair-trade").json(&body).await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_portfolio_for_unknown_strategy_is_not_found() {
    let (server, _, _) = server().await;

    let response = server.get("/strategies/nope/portfolio").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _, _) = server().await;

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], json!("ok"));
}
