//! Shared price feed
//!
//! One polling loop serves every price-driven worker: tracked mints are
//! fetched in a single request per interval, cached with a TTL, and fanned
//! out as ticks over a broadcast channel.

use crate::config::PriceFeedConfig;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// One observed price for one mint
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub mint: String,
    pub price_usd: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price_usd: f64,
    fetched_at: DateTime<Utc>,
}

/// Polls the price API for all tracked mints and fans ticks out to
/// subscribed workers
pub struct PriceFeedService {
    http: reqwest::Client,
    endpoint: String,
    poll_interval_secs: u64,
    cache_ttl: Duration,
    tracked: RwLock<HashSet<String>>,
    cache: RwLock<HashMap<String, CachedPrice>>,
    ticks: broadcast::Sender<PriceTick>,
    shutdown: CancellationToken,
}

impl PriceFeedService {
    pub fn new(config: &PriceFeedConfig) -> Self {
        let (ticks, _) = broadcast::channel(256);
        Self {
            http: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            poll_interval_secs: config.poll_interval_secs,
            cache_ttl: Duration::seconds(config.cache_ttl_secs),
            tracked: RwLock::new(HashSet::new()),
            cache: RwLock::new(HashMap::new()),
            ticks,
            shutdown: CancellationToken::new(),
        }
    }

    /// Subscribe to the tick stream
    pub fn subscribe(&self) -> broadcast::Receiver<PriceTick> {
        self.ticks.subscribe()
    }

    /// Add a mint to the polling set
    pub fn track(&self, mint: &str) {
        self.tracked.write().insert(mint.to_string());
    }

    /// Remove a mint from the polling set; its cached price expires naturally
    pub fn untrack(&self, mint: &str) {
        self.tracked.write().remove(mint);
    }

    /// Latest cached price if it is still within the TTL
    pub fn get_price_usd(&self, mint: &str) -> Option<f64> {
        let cache = self.cache.read();
        let entry = cache.get(mint)?;
        if Utc::now() - entry.fetched_at > self.cache_ttl {
            return None;
        }
        Some(entry.price_usd)
    }

    /// Spawn the polling loop; runs until [`Self::stop`]
    pub fn start(self: &Arc<Self>) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(service.poll_interval_secs));
            tracing::info!(endpoint = %service.endpoint, "Price feed started");

            loop {
                tokio::select! {
                    _ = service.shutdown.cancelled() => {
                        tracing::info!("Price feed stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = service.poll_once().await {
                            tracing::warn!(error = %e, "Price poll failed");
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    async fn poll_once(&self) -> Result<(), reqwest::Error> {
        let mints: Vec<String> = self.tracked.read().iter().cloned().collect();
        if mints.is_empty() {
            return Ok(());
        }

        let ids = mints.join(",");
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("ids", ids.as_str())])
            .send()
            .await?
            .error_for_status()?;

        let payload: Value = response.json().await?;
        let now = Utc::now();

        if let Some(data) = payload.get("data").and_then(Value::as_object) {
            for mint in &mints {
                let Some(price) = data
                    .get(mint)
                    .and_then(|entry| entry.get("price"))
                    .and_then(Value::as_f64)
                else {
                    continue;
                };
                self.publish(mint, price, now);
            }
        }

        Ok(())
    }

    /// Cache a price and broadcast the tick. Also the injection point for
    /// tests, which drive ticks without a live endpoint.
    pub fn publish(&self, mint: &str, price_usd: f64, at: DateTime<Utc>) {
        self.cache.write().insert(
            mint.to_string(),
            CachedPrice {
                price_usd,
                fetched_at: at,
            },
        );
        // Send fails only when no worker is subscribed, which is fine
        let _ = self.ticks.send(PriceTick {
            mint: mint.to_string(),
            price_usd,
            at,
        });
    }
}
