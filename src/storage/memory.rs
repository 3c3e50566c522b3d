//! In-Memory Storage Implementations
//!
//! Thread-safe stores for testing and development. Data is lost when the
//! service restarts.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::traits::{
    PaymentStore, StorageError, StorageResult, WithdrawalHistoryStore, WithdrawalStateStore,
};
use crate::types::{PaymentRecord, WithdrawalRecord, WithdrawalState};

/// In-memory withdrawal state store
///
/// Records indexed by withdrawal handle, with a (investor, fund) index onto
/// the active (non-terminal) state.
#[derive(Clone, Default)]
pub struct MemoryWithdrawalStateStore {
    records: Arc<RwLock<HashMap<String, WithdrawalState>>>,
    active: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl MemoryWithdrawalStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WithdrawalStateStore for MemoryWithdrawalStateStore {
    async fn insert_if_no_active(&self, state: &WithdrawalState) -> StorageResult<()> {
        let mut records = self.records.write().await;
        let mut active = self.active.write().await;

        let key = (state.investor.clone(), state.fund.clone());
        if let Some(existing_id) = active.get(&key) {
            // A stale index entry for a terminal state does not block
            if let Some(existing) = records.get(existing_id) {
                if !existing.status.is_terminal() {
                    return Err(StorageError::Duplicate(format!(
                        "active withdrawal {} for ({}, {})",
                        existing_id, state.investor, state.fund
                    )));
                }
            }
        }

        if records.contains_key(&state.id) {
            return Err(StorageError::Duplicate(format!("id: {}", state.id)));
        }

        active.insert(key, state.id.clone());
        records.insert(state.id.clone(), state.clone());

        Ok(())
    }

    async fn update(&self, state: &WithdrawalState) -> StorageResult<()> {
        let mut records = self.records.write().await;
        let mut active = self.active.write().await;

        if !records.contains_key(&state.id) {
            return Err(StorageError::NotFound(state.id.clone()));
        }

        if state.status.is_terminal() {
            let key = (state.investor.clone(), state.fund.clone());
            if active.get(&key) == Some(&state.id) {
                active.remove(&key);
            }
        }

        records.insert(state.id.clone(), state.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> StorageResult<Option<WithdrawalState>> {
        let records = self.records.read().await;
        Ok(records.get(id).cloned())
    }

    async fn get_active(
        &self,
        investor: &str,
        fund: &str,
    ) -> StorageResult<Option<WithdrawalState>> {
        let active = self.active.read().await;
        let id = match active.get(&(investor.to_string(), fund.to_string())) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        drop(active);

        let records = self.records.read().await;
        Ok(records
            .get(&id)
            .filter(|s| !s.status.is_terminal())
            .cloned())
    }
}

/// In-memory per-investor withdrawal history
#[derive(Clone, Default)]
pub struct MemoryWithdrawalHistoryStore {
    records: Arc<RwLock<HashMap<String, Vec<WithdrawalRecord>>>>,
}

impl MemoryWithdrawalHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WithdrawalHistoryStore for MemoryWithdrawalHistoryStore {
    async fn append_if_absent(
        &self,
        investor: &str,
        record: &WithdrawalRecord,
    ) -> StorageResult<bool> {
        let mut records = self.records.write().await;
        let history = records.entry(investor.to_string()).or_default();

        if history.iter().any(|r| r.tx_ref == record.tx_ref) {
            return Ok(false);
        }

        history.push(record.clone());
        Ok(true)
    }

    async fn get_history(&self, investor: &str) -> StorageResult<Vec<WithdrawalRecord>> {
        let records = self.records.read().await;
        Ok(records.get(investor).cloned().unwrap_or_default())
    }
}

/// In-memory per-fund payment history
#[derive(Clone, Default)]
pub struct MemoryPaymentStore {
    records: Arc<RwLock<HashMap<String, Vec<PaymentRecord>>>>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    async fn append_if_absent(&self, fund: &str, record: &PaymentRecord) -> StorageResult<bool> {
        let mut records = self.records.write().await;
        let history = records.entry(fund.to_string()).or_default();

        if history.iter().any(|r| r.tx_ref == record.tx_ref) {
            return Ok(false);
        }

        history.push(record.clone());
        Ok(true)
    }

    async fn get_history(&self, fund: &str) -> StorageResult<Vec<PaymentRecord>> {
        let records = self.records.read().await;
        Ok(records.get(fund).cloned().unwrap_or_default())
    }
}
