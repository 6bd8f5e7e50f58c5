//! Strategy execution engine entrypoint
//!
//! Composition root: configuration, database, shared services, the job
//! manager and the HTTP ingress, with graceful shutdown tearing the
//! workers down before the server exits.

use anyhow::Context;
use mirror_engine::chain::RpcChainClient;
use mirror_engine::config::AppConfig;
use mirror_engine::db;
use mirror_engine::executor::PairTradeExecutor;
use mirror_engine::handlers::{self, EngineState};
use mirror_engine::holdings::HoldingsTracker;
use mirror_engine::jobs::{JobManager, WorkerDeps};
use mirror_engine::price_feed::PriceFeedService;
use mirror_engine::swap::JupiterGateway;
use mirror_engine::trigger::{EnvWalletKeyResolver, TriggerService};
use mirror_engine::valuation::{HttpValuationOracle, ValuationService};
use solana_client::nonblocking::rpc_client::RpcClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Arc::new(AppConfig::load()?);
    config.validate()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Starting strategy execution engine"
    );

    let pool = db::init_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let rpc = Arc::new(RpcClient::new(config.rpc.url.clone()));
    let chain = Arc::new(RpcChainClient::new(config.rpc.url.clone()));
    let gateway = Arc::new(JupiterGateway::new(
        Arc::clone(&rpc),
        config.swap.quote_endpoint.clone(),
        config.swap.swap_endpoint.clone(),
    ));

    let price_feed = Arc::new(PriceFeedService::new(&config.price_feed));
    price_feed.start();

    let holdings = Arc::new(HoldingsTracker::new(pool.clone(), Arc::clone(&price_feed)));
    let valuation = Arc::new(ValuationService::new(
        Arc::new(HttpValuationOracle::new(config.valuation.endpoint.clone())),
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
        Arc::new(EnvWalletKeyResolver),
    ));

    let (events_tx, events_rx) = mpsc::channel(64);
    let job_manager = Arc::new(JobManager::new(WorkerDeps {
        chain,
        gateway,
        price_feed,
        holdings: Arc::clone(&holdings),
        pool,
        config: Arc::clone(&config),
        events: events_tx,
    }));
    job_manager.spawn_event_listener(events_rx);

    let state = Arc::new(EngineState {
        trigger,
        holdings,
        job_manager: Arc::clone(&job_manager),
    });

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(job_manager))
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal(job_manager: Arc<JobManager>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received, stopping workers");
    job_manager.stop_all().await;
}
