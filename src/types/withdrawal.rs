//! Withdrawal Types
//!
//! State machine and plan types for the withdrawal liquidation pipeline.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Basis-point denominator: 10000 bps = 100%
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Status of a withdrawal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    /// Request accepted, initiate transaction issued
    Requested,
    /// Liquidation plan computed
    Planned,
    /// Per-asset swap bundles issued, client signing/submitting
    Executing,
    /// Finalize transaction issued, awaiting confirmation
    Finalizing,
    /// Complete - settlement asset paid out, shares burned
    Finalized,
    /// Failed (terminal); a fresh request is required
    Failed,
}

impl Default for WithdrawalStatus {
    fn default() -> Self {
        Self::Requested
    }
}

impl WithdrawalStatus {
    /// Terminal states are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Planned => write!(f, "planned"),
            Self::Executing => write!(f, "executing"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Finalized => write!(f, "finalized"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(Self::Requested),
            "planned" => Ok(Self::Planned),
            "executing" => Ok(Self::Executing),
            "finalizing" => Ok(Self::Finalizing),
            "finalized" => Ok(Self::Finalized),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown withdrawal status: {}", other)),
        }
    }
}

/// Persisted withdrawal state
///
/// At most one non-terminal state may exist per (investor, fund); the store
/// enforces this on insert. Terminal states are never mutated, a new request
/// creates a fresh row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalState {
    /// Unique withdrawal handle
    pub id: String,
    /// Investor wallet (base58)
    pub investor: String,
    /// Fund address (base58)
    pub fund: String,
    /// Withdrawal fraction in basis points, 1..=10000
    pub fraction_bps: u16,
    /// Current status
    pub status: WithdrawalStatus,
    /// Timestamp when request was created
    pub created_at: u64,
    /// Timestamp of last update
    pub updated_at: u64,
    /// Error message if failed
    pub error: Option<String>,
}

impl WithdrawalState {
    /// Create a new withdrawal in `Requested` status
    pub fn new(investor: String, fund: String, fraction_bps: u16) -> Self {
        let now = epoch_secs();
        let id = format!("wd_{}_{:x}", now, rand::random::<u32>());

        Self {
            id,
            investor,
            fund,
            fraction_bps,
            status: WithdrawalStatus::Requested,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Mark as planned
    pub fn mark_planned(&mut self) {
        self.status = WithdrawalStatus::Planned;
        self.touch();
    }

    /// Mark as executing
    pub fn mark_executing(&mut self) {
        self.status = WithdrawalStatus::Executing;
        self.touch();
    }

    /// Mark as finalizing
    pub fn mark_finalizing(&mut self) {
        self.status = WithdrawalStatus::Finalizing;
        self.touch();
    }

    /// Mark as finalized
    pub fn mark_finalized(&mut self) {
        self.status = WithdrawalStatus::Finalized;
        self.touch();
    }

    /// Mark as failed
    pub fn mark_failed(&mut self, error: String) {
        self.error = Some(error);
        self.status = WithdrawalStatus::Failed;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = epoch_secs();
    }
}

fn epoch_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Why an asset was excluded from the executable plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Included in the executable plan
    None,
    /// Quoted value below the dust threshold
    Dust,
    /// No route found, even with direct routing
    NoRoute,
}

/// A validated quote for liquidating one asset into the settlement asset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// Expected output in settlement base units
    pub expected_out: u64,
    /// Minimum acceptable output after slippage
    pub min_out: u64,
    /// Opaque route reference, passed back to the routing service when
    /// requesting swap instructions
    pub route_ref: serde_json::Value,
}

/// One asset's entry in a liquidation plan
///
/// `allowed_amount = floor(available_amount * fraction_bps / 10000)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationPlanItem {
    /// Asset mint (base58)
    pub asset: String,
    /// Fund's full balance of this asset
    pub available_amount: u64,
    /// Portion allowed to liquidate for this withdrawal
    pub allowed_amount: u64,
    /// Quote, populated only for executable items
    pub quote: Option<Quote>,
    /// Exclusion reason; `None` means the item is executable
    pub excluded_reason: ExclusionReason,
}

impl LiquidationPlanItem {
    /// Whether the item belongs to the executable plan
    pub fn is_executable(&self) -> bool {
        self.excluded_reason == ExclusionReason::None && self.quote.is_some()
    }
}

/// Full planning output: every considered asset plus the executable subset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiquidationPlan {
    /// All considered assets, including excluded ones (for transparency)
    pub items: Vec<LiquidationPlanItem>,
}

impl LiquidationPlan {
    /// Executable subset of the plan
    pub fn executable(&self) -> Vec<&LiquidationPlanItem> {
        self.items.iter().filter(|i| i.is_executable()).collect()
    }
}

/// Compute the amount allowed to liquidate for a fraction of a balance
///
/// Floors toward zero; the result never exceeds the balance.
pub fn allowed_amount(balance: u64, fraction_bps: u16) -> u64 {
    ((balance as u128 * fraction_bps as u128) / BPS_DENOMINATOR as u128) as u64
}

/// A single held asset position of a fund
#[derive(Debug, Clone)]
pub struct HeldAsset {
    pub asset: Pubkey,
    pub balance: u64,
}

/// Read-only view of a fund consumed from the external ledger
#[derive(Debug, Clone)]
pub struct FundLedgerSnapshot {
    pub fund: Pubkey,
    pub shares_mint: Pubkey,
    pub total_deposits: u64,
    pub total_shares: u64,
    pub current_value: u64,
    pub held_assets: Vec<HeldAsset>,
}

/// An unsigned transaction bundle handed to the client for signing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxBundle {
    /// Asset this bundle liquidates, if per-asset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    /// Base64-encoded unsigned versioned transaction
    pub tx_base64: String,
    /// Recency token the transaction was compiled against
    pub blockhash: String,
    /// Expiry height; past this the bundle must be discarded and re-planned
    pub last_valid_block_height: u64,
    /// Lookup tables referenced by the compiled message (base58)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address_lookup_tables: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_amount_bounds() {
        for fraction_bps in [1u16, 17, 2500, 5000, 9999, 10000] {
            for balance in [0u64, 1, 999, 1_000_000, u64::MAX] {
                let allowed = allowed_amount(balance, fraction_bps);
                assert!(allowed <= balance, "allowed exceeds balance");
                if fraction_bps == 10_000 {
                    assert_eq!(allowed, balance);
                }
            }
        }
    }

    #[test]
    fn test_allowed_amount_floors() {
        // 2500 bps of 1,000,001 = 250,000.25 -> floor
        assert_eq!(allowed_amount(1_000_001, 2500), 250_000);
        assert_eq!(allowed_amount(1_000_000, 2500), 250_000);
        assert_eq!(allowed_amount(500_000, 2500), 125_000);
        // 1 bps of small balances floors to zero
        assert_eq!(allowed_amount(9_999, 1), 0);
    }

    #[test]
    fn test_state_machine_marks() {
        let mut state = WithdrawalState::new("inv".to_string(), "fund".to_string(), 2500);
        assert_eq!(state.status, WithdrawalStatus::Requested);
        assert!(!state.status.is_terminal());

        state.mark_planned();
        assert_eq!(state.status, WithdrawalStatus::Planned);
        state.mark_executing();
        state.mark_finalizing();
        state.mark_finalized();
        assert!(state.status.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            WithdrawalStatus::Requested,
            WithdrawalStatus::Planned,
            WithdrawalStatus::Executing,
            WithdrawalStatus::Finalizing,
            WithdrawalStatus::Finalized,
            WithdrawalStatus::Failed,
        ] {
            let parsed: WithdrawalStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_executable_filter() {
        let plan = LiquidationPlan {
            items: vec![
                LiquidationPlanItem {
                    asset: "X".to_string(),
                    available_amount: 100,
                    allowed_amount: 25,
                    quote: Some(Quote {
                        expected_out: 1_000_000_000,
                        min_out: 800_000_000,
                        route_ref: serde_json::json!({}),
                    }),
                    excluded_reason: ExclusionReason::None,
                },
                LiquidationPlanItem {
                    asset: "Y".to_string(),
                    available_amount: 100,
                    allowed_amount: 25,
                    quote: None,
                    excluded_reason: ExclusionReason::NoRoute,
                },
            ],
        };

        let exec = plan.executable();
        assert_eq!(exec.len(), 1);
        assert_eq!(exec[0].asset, "X");
    }
}
