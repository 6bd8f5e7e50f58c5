//! Jupiter-backed swap gateway
//!
//! Quote via the aggregator's GET endpoint, build the transaction via the
//! POST endpoint, sign locally and submit through RPC. The build step is
//! repeated on every attempt so the transaction always carries a fresh
//! blockhash.

use super::{QuoteRequest, SwapError, SwapGateway, SwapQuote, SwapReceipt, SwapWallet};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct JupiterGateway {
    http: reqwest::Client,
    rpc: Arc<RpcClient>,
    quote_endpoint: String,
    swap_endpoint: String,
}

impl JupiterGateway {
    pub fn new(
        rpc: Arc<RpcClient>,
        quote_endpoint: impl Into<String>,
        swap_endpoint: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            http,
            rpc,
            quote_endpoint: quote_endpoint.into(),
            swap_endpoint: swap_endpoint.into(),
        }
    }

    fn keypair_from_secret(wallet: &SwapWallet) -> Result<Keypair, SwapError> {
        let bytes = bs58::decode(wallet.secret.expose_secret())
            .into_vec()
            .map_err(|_| SwapError::Build("invalid signing key encoding".to_string()))?;
        Keypair::from_bytes(&bytes)
            .map_err(|_| SwapError::Build("invalid signing key".to_string()))
    }

    /// Sign the aggregator-built transaction in place. The fee payer slot
    /// must exist; a transaction without one is malformed upstream output.
    fn sign_transaction(
        tx: &mut VersionedTransaction,
        keypair: &Keypair,
    ) -> Result<(), SwapError> {
        let message_bytes = tx.message.serialize();
        let slot = tx
            .signatures
            .get_mut(0)
            .ok_or_else(|| SwapError::Build("transaction has no signature slot".to_string()))?;
        *slot = keypair.sign_message(&message_bytes);
        Ok(())
    }

    fn decimal_field(value: &Value, field: &str) -> Result<Decimal, SwapError> {
        value
            .get(field)
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
            .ok_or_else(|| SwapError::Quote(format!("missing or invalid {} in quote", field)))
    }
}

#[async_trait]
impl SwapGateway for JupiterGateway {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote, SwapError> {
        // Raw integer amount; the aggregator rejects decimals
        let amount = request.amount.trunc().to_string();

        let response = self
            .http
            .get(&self.quote_endpoint)
            .query(&[
                ("inputMint", request.input_mint.as_str()),
                ("outputMint", request.output_mint.as_str()),
                ("amount", amount.as_str()),
                ("slippageBps", &request.slippage_bps.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SwapError::Quote(format!("quote request failed: {}", e)))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(SwapError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SwapError::Quote(format!(
                "quote returned {}: {}",
                status, body
            )));
        }

        let route: Value = response
            .json()
            .await
            .map_err(|e| SwapError::Quote(format!("malformed quote response: {}", e)))?;

        let in_amount = Self::decimal_field(&route, "inAmount")?;
        let out_amount = Self::decimal_field(&route, "outAmount")?;

        tracing::debug!(
            input_mint = %request.input_mint,
            output_mint = %request.output_mint,
            %in_amount,
            %out_amount,
            "Quote received"
        );

        Ok(SwapQuote {
            input_mint: request.input_mint.clone(),
            output_mint: request.output_mint.clone(),
            in_amount,
            out_amount,
            route,
        })
    }

    async fn execute(
        &self,
        quote: &SwapQuote,
        wallet: &SwapWallet,
        fee_account: Option<&str>,
    ) -> Result<SwapReceipt, SwapError> {
        let mut body = json!({
            "quoteResponse": quote.route,
            "userPublicKey": wallet.pubkey,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
        });
        if let Some(fee_account) = fee_account {
            body["feeAccount"] = json!(fee_account);
        }

        let response = self
            .http
            .post(&self.swap_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SwapError::Build(format!("swap build request failed: {}", e)))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(SwapError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(SwapError::Build(format!(
                "swap build returned {}: {}",
                status, text
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| SwapError::Build(format!("malformed swap response: {}", e)))?;

        let tx_base64 = payload
            .get("swapTransaction")
            .and_then(Value::as_str)
            .ok_or_else(|| SwapError::Build("missing swapTransaction".to_string()))?;

        let tx_bytes = base64::engine::general_purpose::STANDARD
            .decode(tx_base64)
            .map_err(|e| SwapError::Build(format!("invalid transaction encoding: {}", e)))?;

        let mut tx: VersionedTransaction = bincode::deserialize(&tx_bytes)
            .map_err(|e| SwapError::Build(format!("transaction deserialization failed: {}", e)))?;

        let keypair = Self::keypair_from_secret(wallet)?;
        Self::sign_transaction(&mut tx, &keypair)?;

        let signature = self
            .rpc
            .send_transaction(&tx)
            .await
            .map_err(|e| SwapError::Submission(format!("transaction submission failed: {}", e)))?;

        Ok(SwapReceipt {
            signature: signature.to_string(),
            input_amount: quote.in_amount,
            output_amount: quote.out_amount,
        })
    }
}
