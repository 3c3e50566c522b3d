//! Common utilities shared across modules

pub mod error;

pub use error::{OrchestratorError, Result};
