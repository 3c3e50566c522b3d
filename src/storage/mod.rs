//! Storage Layer
//!
//! Trait-based persistence with SQLite (production) and in-memory
//! (testing/dev) implementations.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::{MemoryPaymentStore, MemoryWithdrawalHistoryStore, MemoryWithdrawalStateStore};
pub use sqlite::SqliteStore;
pub use traits::{
    PaymentStore, StorageError, StorageResult, WithdrawalHistoryStore, WithdrawalStateStore,
};
