//! Signal models - incoming pair-trade signals and batch results

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

/// Trade action requested by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Buy => write!(f, "buy"),
            SignalAction::Sell => write!(f, "sell"),
        }
    }
}

/// Which side of the pair the signal targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetToken {
    A,
    B,
}

impl TargetToken {
    /// The opposite side of the pair
    pub fn other(&self) -> TargetToken {
        match self {
            TargetToken::A => TargetToken::B,
            TargetToken::B => TargetToken::A,
        }
    }
}

impl std::fmt::Display for TargetToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetToken::A => write!(f, "A"),
            TargetToken::B => write!(f, "B"),
        }
    }
}

/// Incoming pair-trade signal payload
///
/// Body of `POST /triggers/pair-trade`. Validation runs before any side
/// effect; a rejected signal never touches a strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairTradeSignal {
    /// Mint address of side A
    pub token_a_mint: String,
    /// Mint address of side B
    pub token_b_mint: String,
    /// Trade action
    pub action: SignalAction,
    /// Which side is being traded
    pub target_token: TargetToken,
    /// Percentage of the source holding to trade, 1-100
    pub percentage: f64,
    /// Optional signal timestamp (RFC 3339)
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Optional slippage override in basis points
    #[serde(default)]
    pub max_slippage_bps: Option<u16>,
}

impl PairTradeSignal {
    /// Validate the signal payload
    ///
    /// Checks mint well-formedness, percentage range, pair distinctness and
    /// timestamp parseability. Fails fast with a descriptive message.
    pub fn validate(&self) -> Result<(), String> {
        if Pubkey::from_str(&self.token_a_mint).is_err() {
            return Err(format!("tokenAMint is not a valid address: {}", self.token_a_mint));
        }

        if Pubkey::from_str(&self.token_b_mint).is_err() {
            return Err(format!("tokenBMint is not a valid address: {}", self.token_b_mint));
        }

        if self.token_a_mint == self.token_b_mint {
            return Err("tokenAMint and tokenBMint must differ".to_string());
        }

        if !(1.0..=100.0).contains(&self.percentage) {
            return Err(format!(
                "percentage must be between 1 and 100, got {}",
                self.percentage
            ));
        }

        if let Some(ref ts) = self.timestamp {
            if DateTime::parse_from_rfc3339(ts).is_err() {
                return Err(format!("timestamp is not valid RFC 3339: {}", ts));
            }
        }

        if let Some(bps) = self.max_slippage_bps {
            if bps == 0 || bps > 5_000 {
                return Err(format!("maxSlippage must be between 1 and 5000 bps, got {}", bps));
            }
        }

        Ok(())
    }

    /// Deterministic audit id for this signal
    ///
    /// SHA256 over the pair, action, target, percentage and receipt time, so
    /// replayed deliveries of the same signal share an id in the audit log.
    pub fn audit_id(&self, received_at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.token_a_mint.as_bytes());
        hasher.update(self.token_b_mint.as_bytes());
        hasher.update(self.action.to_string().as_bytes());
        hasher.update(self.target_token.to_string().as_bytes());
        hasher.update(self.percentage.to_string().as_bytes());
        hasher.update(
            self.timestamp
                .clone()
                .unwrap_or_else(|| received_at.timestamp().to_string())
                .as_bytes(),
        );

        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

/// Aggregated outcome of dispatching one signal across matching strategies
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    /// Strategies resolved for the signal's pair
    pub processed_strategies: u32,
    /// Trades that completed (fully or partially filled)
    pub successful_trades: u32,
    /// Trades that failed
    pub failed_trades: u32,
    /// Per-strategy error messages, each naming the strategy id
    pub errors: Vec<String>,
    /// Total input volume actually filled, in raw units of the source side
    pub total_volume: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{SOL_MINT, USDC_MINT};

    fn valid_signal() -> PairTradeSignal {
        PairTradeSignal {
            token_a_mint: SOL_MINT.to_string(),
            token_b_mint: USDC_MINT.to_string(),
            action: SignalAction::Sell,
            target_token: TargetToken::A,
            percentage: 50.0,
            timestamp: None,
            max_slippage_bps: None,
        }
    }

    #[test]
    fn test_valid_signal_passes() {
        assert!(valid_signal().validate().is_ok());
    }

    #[test]
    fn test_malformed_mint_rejected() {
        let mut signal = valid_signal();
        signal.token_a_mint = "not-a-mint".to_string();
        assert!(signal.validate().is_err());
    }

    #[test]
    fn test_identical_mints_rejected() {
        let mut signal = valid_signal();
        signal.token_b_mint = signal.token_a_mint.clone();
        assert!(signal.validate().is_err());
    }

    #[test]
    fn test_percentage_bounds() {
        let mut signal = valid_signal();

        signal.percentage = 0.5;
        assert!(signal.validate().is_err());

        signal.percentage = 100.1;
        assert!(signal.validate().is_err());

        signal.percentage = 1.0;
        assert!(signal.validate().is_ok());

        signal.percentage = 100.0;
        assert!(signal.validate().is_ok());
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut signal = valid_signal();
        signal.timestamp = Some("yesterday at noon".to_string());
        assert!(signal.validate().is_err());

        signal.timestamp = Some("2026-08-30T12:00:00Z".to_string());
        assert!(signal.validate().is_ok());
    }

    #[test]
    fn test_audit_id_deterministic() {
        let signal = valid_signal();
        let at = Utc::now();
        assert_eq!(signal.audit_id(at), signal.audit_id(at));
    }

    #[test]
    fn test_action_parsing() {
        let json = r#"{
            "tokenAMint": "So11111111111111111111111111111111111111112",
            "tokenBMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "action": "sell",
            "targetToken": "A",
            "percentage": 50
        }"#;

        let signal: PairTradeSignal = serde_json::from_str(json).unwrap();
        assert_eq!(signal.action, SignalAction::Sell);
        assert_eq!(signal.target_token, TargetToken::A);

        // Unknown actions are rejected at deserialization, before any side effect
        let bad = json.replace("\"sell\"", "\"hold\"");
        assert!(serde_json::from_str::<PairTradeSignal>(&bad).is_err());
    }
}
