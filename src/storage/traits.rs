//! Storage Trait Definitions
//!
//! Abstract storage interfaces for withdrawal state, per-investor withdrawal
//! history and per-fund payment history. Implementations use SQLite
//! (production) or in-memory maps (testing).
//!
//! History stores have "insert if tx_ref absent" semantics: recording the
//! same confirmed transaction twice is a no-op, which is what makes client
//! retries safe without locks spanning a whole fund document.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{PaymentRecord, WithdrawalRecord, WithdrawalState};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("connection error: {0}")]
    Connection(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Withdrawal state machine storage
///
/// Enforces the single-active invariant: at most one non-terminal state per
/// (investor, fund).
#[async_trait]
pub trait WithdrawalStateStore: Send + Sync {
    /// Insert a fresh state; fails with `Duplicate` while a non-terminal
    /// state exists for the same (investor, fund)
    async fn insert_if_no_active(&self, state: &WithdrawalState) -> StorageResult<()>;

    /// Update an existing state
    async fn update(&self, state: &WithdrawalState) -> StorageResult<()>;

    /// Get a state by withdrawal handle
    async fn get(&self, id: &str) -> StorageResult<Option<WithdrawalState>>;

    /// Get the non-terminal state for (investor, fund), if any
    async fn get_active(&self, investor: &str, fund: &str)
        -> StorageResult<Option<WithdrawalState>>;
}

/// Per-investor withdrawal history, append-only
#[async_trait]
pub trait WithdrawalHistoryStore: Send + Sync {
    /// Append a record unless its `tx_ref` is already present.
    /// Returns `true` when inserted, `false` when it was already recorded.
    async fn append_if_absent(
        &self,
        investor: &str,
        record: &WithdrawalRecord,
    ) -> StorageResult<bool>;

    /// All records for an investor
    async fn get_history(&self, investor: &str) -> StorageResult<Vec<WithdrawalRecord>>;
}

/// Per-fund payment history, append-only
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Append a record unless its `tx_ref` is already present.
    /// Returns `true` when inserted, `false` when it was already recorded.
    async fn append_if_absent(&self, fund: &str, record: &PaymentRecord) -> StorageResult<bool>;

    /// All payment records for a fund
    async fn get_history(&self, fund: &str) -> StorageResult<Vec<PaymentRecord>>;
}
