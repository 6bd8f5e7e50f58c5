//! Trade ledger models - append-only execution records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Execution status of a recorded trade
///
/// `Completed`, `Failed` and `Partial` are terminal: a row never mutates
/// again once it reaches one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Attempt recorded, swap in flight
    Pending,
    /// Swap confirmed, requested input fully consumed
    Completed,
    /// Swap failed or abandoned after retries
    Failed,
    /// Swap confirmed but consumed less input than requested
    Partial,
}

impl ExecutionStatus {
    /// Terminal rows are immutable
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Pending)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Partial => write!(f, "partial"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ExecutionStatus::Pending),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "partial" => Ok(ExecutionStatus::Partial),
            _ => Err(format!("Unknown execution status: {}", s)),
        }
    }
}

/// One row of the append-only trade ledger
///
/// A record is created on every execution attempt and updated exactly once
/// to a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Database ID
    pub id: Option<i64>,
    /// Owning strategy or job id
    pub strategy_id: String,
    /// Kind of trade: initial_allocation, signal_trade, mirror, price_trigger, level
    pub trade_type: String,
    /// Input mint
    pub from_mint: String,
    /// Output mint
    pub to_mint: String,
    /// Requested input amount in raw units
    pub input_amount: Decimal,
    /// Actual output amount in raw units (set at completion)
    pub output_amount: Option<Decimal>,
    /// Percentage of the source holding this trade represents
    pub percentage_traded: Option<f64>,
    /// Slippage tolerance used, in basis points
    pub slippage_bps: Option<u16>,
    /// Transaction signature (set at completion)
    pub signature: Option<String>,
    /// Originating signal payload, if signal-driven
    pub signal_data: Option<serde_json::Value>,
    /// Current status
    pub execution_status: ExecutionStatus,
    /// Error message when failed
    pub error_message: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Completion timestamp, set only for completed trades
    pub completed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    /// Create a pending record for a new execution attempt
    pub fn pending(
        strategy_id: impl Into<String>,
        trade_type: impl Into<String>,
        from_mint: impl Into<String>,
        to_mint: impl Into<String>,
        input_amount: Decimal,
    ) -> Self {
        Self {
            id: None,
            strategy_id: strategy_id.into(),
            trade_type: trade_type.into(),
            from_mint: from_mint.into(),
            to_mint: to_mint.into(),
            input_amount,
            output_amount: None,
            percentage_traded: None,
            slippage_bps: None,
            signature: None,
            signal_data: None,
            execution_status: ExecutionStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Attach the originating signal payload
    pub fn with_signal_data(mut self, data: serde_json::Value) -> Self {
        self.signal_data = Some(data);
        self
    }

    /// Attach the percentage of the source holding being traded
    pub fn with_percentage(mut self, pct: f64) -> Self {
        self.percentage_traded = Some(pct);
        self
    }

    /// Attach the slippage tolerance
    pub fn with_slippage(mut self, bps: u16) -> Self {
        self.slippage_bps = Some(bps);
        self
    }

    /// Mark the trade completed (or partially filled)
    pub fn mark_filled(
        &mut self,
        signature: String,
        filled_input: Decimal,
        output_amount: Decimal,
    ) -> Result<(), String> {
        self.guard_not_terminal()?;
        self.execution_status = if filled_input < self.input_amount {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Completed
        };
        self.signature = Some(signature);
        self.output_amount = Some(output_amount);
        if self.execution_status == ExecutionStatus::Completed {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Mark the trade failed with an error message
    pub fn mark_failed(&mut self, error: String) -> Result<(), String> {
        self.guard_not_terminal()?;
        self.execution_status = ExecutionStatus::Failed;
        self.error_message = Some(error);
        Ok(())
    }

    fn guard_not_terminal(&self) -> Result<(), String> {
        if self.execution_status.is_terminal() {
            return Err(format!(
                "trade record is terminal ({}), refusing update",
                self.execution_status
            ));
        }
        Ok(())
    }
}
