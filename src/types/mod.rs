//! Domain Types
//!
//! Shared types for withdrawals and payments.

pub mod payment;
pub mod withdrawal;

pub use payment::{PaymentRecord, PayoutSplit, Recipient, WithdrawalRecord};
pub use withdrawal::{
    allowed_amount, ExclusionReason, FundLedgerSnapshot, HeldAsset, LiquidationPlan,
    LiquidationPlanItem, Quote, TxBundle, WithdrawalState, WithdrawalStatus, BPS_DENOMINATOR,
};
