//! deFunds Backend - Withdrawal Orchestration Services
//!
//! Server-side services for a marketplace of on-chain managed investment
//! funds. The backend only does what cannot run on the client: it reads the
//! ledger, quotes liquidations against the swap-routing service, assembles
//! unsigned transactions and keeps the idempotent payment/withdrawal books.
//! Signing and submission stay client-side.
//!
//! ## Services
//!
//! 1. **Withdrawal pipeline** - start / plan / finalize / confirm for
//!    converting an investor's proportional claim into the settlement asset
//! 2. **Payout ledger** - operator-triggered proportional distributions with
//!    fee splits, bounded batches and idempotent records

pub mod api;
pub mod common;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod oracle;
pub mod payment;
pub mod router_client;
pub mod storage;
pub mod types;
pub mod withdrawal;

// Re-exports: error taxonomy
pub use common::{OrchestratorError, Result};

// Re-exports: configuration
pub use config::{Network, OrchestratorConfig};

// Re-exports: ledger access
pub use ledger::{LedgerClient, LedgerError, RpcLedgerClient};

// Re-exports: routing-service client
pub use router_client::{RouteError, RouteQuote, RouteQuoteClient};

// Re-exports: withdrawal pipeline
pub use withdrawal::{
    FinalizationCoordinator, LiquidationPlanner, TransactionAssembler, WithdrawalService,
};

// Re-exports: payout ledger
pub use payment::{PaymentLedger, PayoutPlan};

// Re-exports: domain types
pub use types::{
    LiquidationPlan, LiquidationPlanItem, PaymentRecord, Recipient, TxBundle, WithdrawalState,
    WithdrawalStatus,
};
