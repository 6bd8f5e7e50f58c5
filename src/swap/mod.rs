//! Swap gateway abstraction
//!
//! Every mirror/trigger/level/pair execution path goes through the same
//! two-step contract: quote, then execute. The aggregator-backed
//! implementation lives in [`jupiter`]; tests substitute mock gateways.

pub mod jupiter;

pub use jupiter::JupiterGateway;

use crate::config::SwapConfig;
use async_trait::async_trait;
use rust_decimal::Decimal;
use secrecy::SecretString;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

/// Quote request against the aggregator
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Input amount in raw smallest units
    pub amount: Decimal,
    pub slippage_bps: u16,
}

/// Quoted route
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: Decimal,
    pub out_amount: Decimal,
    /// Opaque route payload forwarded to the execution endpoint
    pub route: serde_json::Value,
}

/// Result of a submitted swap
///
/// `input_amount` is the input the gateway reports as actually consumed;
/// callers compare it against the requested amount to detect partial fills.
#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub signature: String,
    pub input_amount: Decimal,
    pub output_amount: Decimal,
}

/// Wallet identity handed to the gateway for signing
#[derive(Clone)]
pub struct SwapWallet {
    pub pubkey: String,
    pub secret: SecretString,
}

/// Swap gateway errors
#[derive(Debug, Error)]
pub enum SwapError {
    /// Quote rejected or malformed; never retried
    #[error("quote failed: {0}")]
    Quote(String),

    /// Transaction build failed
    #[error("swap build failed: {0}")]
    Build(String),

    /// Submission failed; transient, retried with a fresh route/blockhash
    #[error("swap submission failed: {0}")]
    Submission(String),

    /// Rate limited by the aggregator
    #[error("rate limited by swap gateway")]
    RateLimited,

    /// Overall deadline exceeded
    #[error("swap abandoned after deadline")]
    Timeout,
}

impl SwapError {
    /// Whether a retry with a fresh quote may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SwapError::Submission(_) | SwapError::RateLimited)
    }
}

/// The two-step swap contract all execution paths call
#[async_trait]
pub trait SwapGateway: Send + Sync {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, SwapError>;

    async fn execute(
        &self,
        quote: &SwapQuote,
        wallet: &SwapWallet,
        fee_account: Option<&str>,
    ) -> Result<SwapReceipt, SwapError>;
}

/// Quote and execute with bounded retry
///
/// Each attempt re-quotes so the rebuilt transaction carries a fresh
/// blockhash. Transient submission failures retry up to
/// `config.max_attempts` with jittered backoff; the whole operation is
/// abandoned after `config.deadline_secs` and reported as [`SwapError::Timeout`],
/// never dropped silently.
pub async fn execute_swap(
    gateway: &dyn SwapGateway,
    request: &QuoteRequest,
    wallet: &SwapWallet,
    fee_account: Option<&str>,
    config: &SwapConfig,
) -> Result<SwapReceipt, SwapError> {
    let deadline = Duration::from_secs(config.deadline_secs);

    let attempts = async {
        let mut last_error = SwapError::Submission("no attempts made".to_string());

        for attempt in 1..=config.max_attempts {
            let quote = gateway.quote(request).await?;

            match gateway.execute(&quote, wallet, fee_account).await {
                Ok(receipt) => {
                    tracing::info!(
                        signature = %receipt.signature,
                        attempt,
                        input_amount = %receipt.input_amount,
                        output_amount = %receipt.output_amount,
                        "Swap executed"
                    );
                    return Ok(receipt);
                }
                Err(e) if e.is_transient() && attempt < config.max_attempts => {
                    tracing::warn!(attempt, error = %e, "Swap attempt failed, retrying");
                    last_error = e;

                    let jitter_ms = 200 + rand::random::<u64>() % 300;
                    tokio::time::sleep(Duration::from_millis(attempt as u64 * jitter_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    };

    match timeout(deadline, attempts).await {
        Ok(result) => result,
        Err(_) => Err(SwapError::Timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FlakyGateway {
        failures_before_success: Mutex<u32>,
        quote_calls: Mutex<u32>,
    }

    #[async_trait]
    impl SwapGateway for FlakyGateway {
        async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, SwapError> {
            *self.quote_calls.lock() += 1;
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
            _wallet: &SwapWallet,
            _fee_account: Option<&str>,
        ) -> Result<SwapReceipt, SwapError> {
            let mut failures = self.failures_before_success.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SwapError::Submission("blockhash expired".to_string()));
            }
            Ok(SwapReceipt {
                signature: "sig".to_string(),
                input_amount: quote.in_amount,
                output_amount: quote.out_amount,
            })
        }
    }

    fn test_wallet() -> SwapWallet {
        SwapWallet {
            pubkey: "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU".to_string(),
            secret: SecretString::new("secret".to_string()),
        }
    }

    fn request() -> QuoteRequest {
        QuoteRequest {
            input_mint: "MintA".to_string(),
            output_mint: "MintB".to_string(),
            amount: Decimal::from(1_000),
            slippage_bps: 100,
        }
    }

    #[tokio::test]
    async fn test_retries_requote_for_fresh_blockhash() {
        let gateway = FlakyGateway {
            failures_before_success: Mutex::new(2),
            quote_calls: Mutex::new(0),
        };
        let config = SwapConfig::default();

        let receipt = execute_swap(&gateway, &request(), &test_wallet(), None, &config)
            .await
            .unwrap();

        assert_eq!(receipt.signature, "sig");
        // Each attempt re-quotes: two failures plus the success
        assert_eq!(*gateway.quote_calls.lock(), 3);
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let gateway = FlakyGateway {
            failures_before_success: Mutex::new(10),
            quote_calls: Mutex::new(0),
        };
        let config = SwapConfig::default();

        let result = execute_swap(&gateway, &request(), &test_wallet(), None, &config).await;
        assert!(result.is_err());
        assert_eq!(*gateway.quote_calls.lock(), config.max_attempts);
    }
}
