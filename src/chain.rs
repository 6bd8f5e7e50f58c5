//! Chain data access
//!
//! Wraps the RPC client behind a trait so workers can be tested without a
//! live endpoint, and parses confirmed transactions into the balance deltas
//! the mirror algorithm consumes.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_request::TokenAccountsFilter;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::UiTransactionEncoding;
use std::str::FromStr;
use std::sync::Arc;

/// Pre/post balance of one token the wallet touched in a transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TokenDelta {
    pub mint: String,
    /// Raw-unit balance before the transaction
    pub pre_amount: Decimal,
    /// Raw-unit balance after the transaction
    pub post_amount: Decimal,
}

impl TokenDelta {
    pub fn delta(&self) -> Decimal {
        self.post_amount - self.pre_amount
    }
}

/// Balance movement of one wallet across one confirmed transaction
#[derive(Debug, Clone)]
pub struct TransactionDeltas {
    pub signature: String,
    pub native_pre_lamports: u64,
    pub native_post_lamports: u64,
    pub token_deltas: Vec<TokenDelta>,
}

impl TransactionDeltas {
    /// Native-asset movement in lamports, negative when the wallet spent
    pub fn native_delta(&self) -> i128 {
        self.native_post_lamports as i128 - self.native_pre_lamports as i128
    }
}

/// Read-only chain access used by the workers
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Most recent transaction signatures touching a wallet, newest first
    async fn recent_signatures(&self, wallet: &str, limit: usize) -> AppResult<Vec<String>>;

    /// Balance deltas of `wallet` across a confirmed transaction; None when
    /// the transaction is absent, incomplete or failed on-chain
    async fn transaction_deltas(
        &self,
        signature: &str,
        wallet: &str,
    ) -> AppResult<Option<TransactionDeltas>>;

    /// Native-asset balance in lamports
    async fn native_balance(&self, wallet: &str) -> AppResult<u64>;

    /// Raw-unit balance of one token across the wallet's token accounts
    async fn token_balance(&self, wallet: &str, mint: &str) -> AppResult<Decimal>;
}

/// RPC-backed chain client
pub struct RpcChainClient {
    client: Arc<RpcClient>,
}

impl RpcChainClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Arc::new(RpcClient::new(url.into())),
        }
    }

    fn parse_pubkey(wallet: &str) -> AppResult<Pubkey> {
        Pubkey::from_str(wallet)
            .map_err(|_| AppError::Validation(format!("invalid wallet address: {}", wallet)))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn recent_signatures(&self, wallet: &str, limit: usize) -> AppResult<Vec<String>> {
        let pubkey = Self::parse_pubkey(wallet)?;

        let signatures = self
            .client
            .get_signatures_for_address(&pubkey)
            .await
            .map_err(|e| AppError::Rpc(format!("failed to fetch signatures: {}", e)))?;

        Ok(signatures
            .into_iter()
            .take(limit)
            .map(|info| info.signature)
            .collect())
    }

    async fn transaction_deltas(
        &self,
        signature: &str,
        wallet: &str,
    ) -> AppResult<Option<TransactionDeltas>> {
        let sig = Signature::from_str(signature)
            .map_err(|_| AppError::Validation(format!("invalid signature: {}", signature)))?;

        let tx = match self
            .client
            .get_transaction(&sig, UiTransactionEncoding::Json)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                // Absent or not yet confirmed; the caller skips this signature
                tracing::debug!(signature, error = %e, "Transaction not available");
                return Ok(None);
            }
        };

        let tx_json = serde_json::to_value(&tx.transaction)
            .map_err(|e| AppError::Internal(format!("transaction serialization failed: {}", e)))?;

        Ok(parse_transaction_deltas(&tx_json, signature, wallet))
    }

    async fn native_balance(&self, wallet: &str) -> AppResult<u64> {
        let pubkey = Self::parse_pubkey(wallet)?;
        self.client
            .get_balance(&pubkey)
            .await
            .map_err(|e| AppError::Rpc(format!("failed to fetch balance: {}", e)))
    }

    async fn token_balance(&self, wallet: &str, mint: &str) -> AppResult<Decimal> {
        let owner = Self::parse_pubkey(wallet)?;
        let mint_pubkey = Self::parse_pubkey(mint)?;

        let accounts = self
            .client
            .get_token_accounts_by_owner(&owner, TokenAccountsFilter::Mint(mint_pubkey))
            .await
            .map_err(|e| AppError::Rpc(format!("failed to fetch token accounts: {}", e)))?;

        let mut total = Decimal::ZERO;
        for keyed in accounts {
            let data = serde_json::to_value(&keyed.account.data)
                .map_err(|e| AppError::Internal(format!("account serialization failed: {}", e)))?;

            if let Some(amount) = data
                .get("parsed")
                .and_then(|p| p.get("info"))
                .and_then(|i| i.get("tokenAmount"))
                .and_then(|t| t.get("amount"))
                .and_then(|a| a.as_str())
            {
                total += Decimal::from_str(amount).unwrap_or(Decimal::ZERO);
            }
        }

        Ok(total)
    }
}

/// Parse a confirmed transaction (JSON encoding) into the monitored wallet's
/// balance deltas
///
/// Expects the `{transaction, meta}` node of the RPC response. Returns None
/// when the transaction is incomplete, failed on-chain, or does not involve
/// the wallet.
pub fn parse_transaction_deltas(
    tx_json: &Value,
    signature: &str,
    wallet: &str,
) -> Option<TransactionDeltas> {
    let meta = tx_json.get("meta")?;

    // Skip transactions that failed on-chain
    if !meta.get("err").map(Value::is_null).unwrap_or(false) {
        return None;
    }

    let account_keys = tx_json
        .get("transaction")?
        .get("message")?
        .get("accountKeys")?
        .as_array()?;

    let wallet_index = account_keys.iter().position(|key| {
        key.as_str() == Some(wallet)
            || key.get("pubkey").and_then(Value::as_str) == Some(wallet)
    })?;

    let native_pre = meta
        .get("preBalances")?
        .as_array()?
        .get(wallet_index)?
        .as_u64()?;
    let native_post = meta
        .get("postBalances")?
        .as_array()?
        .get(wallet_index)?
        .as_u64()?;

    // Owner-filtered token balances, keyed by mint
    let mut pre_by_mint = std::collections::HashMap::new();
    let mut post_by_mint = std::collections::HashMap::new();

    for (field, map) in [
        ("preTokenBalances", &mut pre_by_mint),
        ("postTokenBalances", &mut post_by_mint),
    ] {
        if let Some(balances) = meta.get(field).and_then(Value::as_array) {
            for balance in balances {
                if balance.get("owner").and_then(Value::as_str) != Some(wallet) {
                    continue;
                }
                let (Some(mint), Some(amount)) = (
                    balance.get("mint").and_then(Value::as_str),
                    balance
                        .get("uiTokenAmount")
                        .and_then(|a| a.get("amount"))
                        .and_then(Value::as_str),
                ) else {
                    continue;
                };

                let amount = Decimal::from_str(amount).unwrap_or(Decimal::ZERO);
                *map.entry(mint.to_string()).or_insert(Decimal::ZERO) += amount;
            }
        }
    }

    let mints: std::collections::HashSet<String> = pre_by_mint
        .keys()
        .chain(post_by_mint.keys())
        .cloned()
        .collect();

    let mut token_deltas: Vec<TokenDelta> = mints
        .into_iter()
        .map(|mint| {
            let pre = pre_by_mint.get(&mint).copied().unwrap_or(Decimal::ZERO);
            let post = post_by_mint.get(&mint).copied().unwrap_or(Decimal::ZERO);
            TokenDelta {
                mint,
                pre_amount: pre,
                post_amount: post,
            }
        })
        .collect();
    token_deltas.sort_by(|a, b| a.mint.cmp(&b.mint));

    Some(TransactionDeltas {
        signature: signature.to_string(),
        native_pre_lamports: native_pre,
        native_post_lamports: native_post,
        token_deltas,
    })
}
