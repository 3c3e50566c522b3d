//! HTTP API
//!
//! Axum server exposing the withdrawal pipeline and payout ledger.

pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{create_router, start_server, AppState, SharedAppState};
