//! Withdrawal Liquidation Pipeline
//!
//! Orchestrates the multi-step server-builds / client-signs flow: start
//! (initiate), plan (quotes + per-asset swap bundles), finalize (burn shares,
//! pay out) and confirm. The service is the front door; planner, assembler
//! and finalizer are its collaborators.

pub mod assembler;
pub mod finalizer;
pub mod planner;
pub mod service;

pub use assembler::{SwapInstructionSource, TransactionAssembler};
pub use finalizer::FinalizationCoordinator;
pub use planner::{LiquidationPlanner, QuoteSource};
pub use service::WithdrawalService;
