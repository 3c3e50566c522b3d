//! Payment Types
//!
//! Records for operator-initiated proportional payouts and the per-investor
//! withdrawal history.

use serde::{Deserialize, Serialize};

/// A payout recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Wallet address (base58)
    pub wallet: String,
    /// Amount in settlement base units
    pub amount: u64,
}

/// A confirmed payout batch, appended to the fund's payment history
///
/// Keyed by `tx_ref`; re-recording the same reference is a no-op.
/// Recipient amounts sum to `total_value` within one base unit per recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Transaction reference (signature) of the confirmed batch
    pub tx_ref: String,
    /// Total value distributed by this batch
    pub total_value: u64,
    /// Per-recipient amounts
    pub recipients: Vec<Recipient>,
    /// Epoch seconds when the record was created
    pub timestamp: u64,
}

impl PaymentRecord {
    pub fn new(tx_ref: String, total_value: u64, recipients: Vec<Recipient>) -> Self {
        Self {
            tx_ref,
            total_value,
            recipients,
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
        }
    }

    /// Sum of recipient amounts
    pub fn distributed(&self) -> u64 {
        self.recipients.iter().map(|r| r.amount).sum()
    }
}

/// Per-investor withdrawal history entry
///
/// Appended once the finalize transaction confirms; keyed by `tx_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    /// Fund the withdrawal was taken from (base58)
    pub fund: String,
    /// Settlement amount paid out, in base units
    pub amount: u64,
    /// Finalize transaction reference
    pub tx_ref: String,
    /// Epoch seconds
    pub timestamp: u64,
    /// Optional caller-supplied detail (per-asset swap signatures, fees)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl WithdrawalRecord {
    pub fn new(fund: String, amount: u64, tx_ref: String, details: Option<serde_json::Value>) -> Self {
        Self {
            fund,
            amount,
            tx_ref,
            timestamp: chrono::Utc::now().timestamp().max(0) as u64,
            details,
        }
    }
}

/// Fee split for a payout, all values in settlement base units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutSplit {
    /// 1% of the distributed value
    pub platform_fee: u64,
    /// Performance fee taken from the post-platform remainder
    pub performance_fee: u64,
    /// Treasury's 20% cut of the performance fee
    pub treasury_perf_share: u64,
    /// Manager's 80% of the performance fee
    pub manager_perf_share: u64,
    /// What is left for investors, distributed pro rata by shares
    pub investors_pool: u64,
}

impl PayoutSplit {
    /// Total routed to the treasury
    pub fn treasury_total(&self) -> u64 {
        self.platform_fee + self.treasury_perf_share
    }
}
