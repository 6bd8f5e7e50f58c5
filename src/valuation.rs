//! Relative valuation of a trading pair
//!
//! Asks an external analysis endpoint which side of the pair looks
//! undervalued, with a TTL cache keyed by the ordered pair so repeated
//! signals inside the window reuse the verdict. Distinguishes timeouts
//! from upstream failure so callers can decide whether to fall back.

use crate::config::ValuationConfig;
use crate::models::TargetToken;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Verdict on which side of a pair to accumulate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResult {
    pub recommended: TargetToken,
    pub reasoning: String,
    /// 0.0 to 1.0; fallback verdicts carry low confidence
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("valuation request timed out")]
    Timeout,

    #[error("valuation service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid valuation input: {0}")]
    Validation(String),
}

/// The upstream analysis call, behind a trait so tests can count and stub it
#[async_trait::async_trait]
pub trait ValuationOracle: Send + Sync {
    async fn evaluate_pair(
        &self,
        token_a_mint: &str,
        token_b_mint: &str,
    ) -> Result<ValuationResult, ValuationError>;
}

/// HTTP implementation of the oracle
pub struct HttpValuationOracle {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpValuationOracle {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait::async_trait]
impl ValuationOracle for HttpValuationOracle {
    async fn evaluate_pair(
        &self,
        token_a_mint: &str,
        token_b_mint: &str,
    ) -> Result<ValuationResult, ValuationError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "tokenAMint": token_a_mint,
                "tokenBMint": token_b_mint,
            }))
            .send()
            .await
            .map_err(|e| ValuationError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ValuationError::Unavailable(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ValuationError::Unavailable(format!("malformed response: {}", e)))?;

        let recommended = match payload.get("recommended").and_then(Value::as_str) {
            Some("a") => TargetToken::A,
            Some("b") => TargetToken::B,
            other => {
                return Err(ValuationError::Unavailable(format!(
                    "unexpected recommendation: {:?}",
                    other
                )))
            }
        };

        Ok(ValuationResult {
            recommended,
            reasoning: payload
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            confidence: payload
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.5),
            timestamp: Utc::now(),
        })
    }
}

/// Caches oracle verdicts per ordered pair
pub struct ValuationService {
    oracle: Arc<dyn ValuationOracle>,
    cache: RwLock<HashMap<(String, String), ValuationResult>>,
    cache_ttl: Duration,
    request_timeout: std::time::Duration,
}

impl ValuationService {
    pub fn new(oracle: Arc<dyn ValuationOracle>, config: &ValuationConfig) -> Self {
        Self {
            oracle,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::seconds(config.cache_ttl_secs),
            request_timeout: std::time::Duration::from_millis(config.request_timeout_ms),
        }
    }

    /// Which side of the pair to accumulate
    ///
    /// Cache hits inside the TTL never reach the oracle. A slow oracle is
    /// reported as [`ValuationError::Timeout`] rather than left hanging.
    pub async fn get_undervalued_token(
        &self,
        token_a_mint: &str,
        token_b_mint: &str,
    ) -> Result<ValuationResult, ValuationError> {
        for mint in [token_a_mint, token_b_mint] {
            Pubkey::from_str(mint)
                .map_err(|_| ValuationError::Validation(format!("invalid mint: {}", mint)))?;
        }

        let key = (token_a_mint.to_string(), token_b_mint.to_string());

        if let Some(cached) = self.cache.read().get(&key) {
            if Utc::now() - cached.timestamp <= self.cache_ttl {
                tracing::debug!(token_a = token_a_mint, token_b = token_b_mint, "Valuation cache hit");
                return Ok(cached.clone());
            }
        }

        let verdict = tokio::time::timeout(
            self.request_timeout,
            self.oracle.evaluate_pair(token_a_mint, token_b_mint),
        )
        .await
        .map_err(|_| ValuationError::Timeout)??;

        self.cache.write().insert(key, verdict.clone());
        Ok(verdict)
    }

    /// Conservative verdict used when the oracle cannot be reached and the
    /// caller must still proceed
    pub fn fallback_recommendation(&self) -> ValuationResult {
        ValuationResult {
            recommended: TargetToken::A,
            reasoning: "valuation unavailable, defaulting to first pair token".to_string(),
            confidence: 0.1,
            timestamp: Utc::now(),
        }
    }
}
