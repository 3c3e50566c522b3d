//! SQLite Persistent Storage
//!
//! Durable storage for withdrawal state, withdrawal history and payment
//! history that survives service restarts. Uses connection pooling via r2d2
//! for concurrent access.
//!
//! The single-active-withdrawal invariant is enforced by a partial unique
//! index over (investor, fund) that only covers non-terminal rows, so the
//! database is the arbiter even under concurrent starts.

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

use super::traits::{
    PaymentStore, StorageError, StorageResult, WithdrawalHistoryStore, WithdrawalStateStore,
};
use crate::types::{PaymentRecord, Recipient, WithdrawalRecord, WithdrawalState, WithdrawalStatus};

/// SQLite-backed store implementing all three storage traits
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Create a new store with the given database path
    ///
    /// Creates the database file and runs migrations if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations()?;

        Ok(store)
    }

    /// Get a connection from the pool
    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool
            .get()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS withdrawals (
                id TEXT PRIMARY KEY,
                investor TEXT NOT NULL,
                fund TEXT NOT NULL,
                fraction_bps INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'requested',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                error TEXT
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_withdrawals_active
                ON withdrawals(investor, fund)
                WHERE status NOT IN ('finalized', 'failed');

            CREATE INDEX IF NOT EXISTS idx_withdrawals_status ON withdrawals(status);
            CREATE INDEX IF NOT EXISTS idx_withdrawals_created_at ON withdrawals(created_at);

            CREATE TABLE IF NOT EXISTS withdrawal_history (
                investor TEXT NOT NULL,
                tx_ref TEXT NOT NULL,
                fund TEXT NOT NULL,
                amount INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                details TEXT,
                PRIMARY KEY (investor, tx_ref)
            );

            CREATE TABLE IF NOT EXISTS payments (
                fund TEXT NOT NULL,
                tx_ref TEXT NOT NULL,
                total_value INTEGER NOT NULL,
                recipients TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                PRIMARY KEY (fund, tx_ref)
            );
            "#,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Convert a database row to WithdrawalState
    fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<WithdrawalState> {
        let status_str: String = row.get("status")?;
        let status = status_str.parse().unwrap_or(WithdrawalStatus::Requested);

        Ok(WithdrawalState {
            id: row.get("id")?,
            investor: row.get("investor")?,
            fund: row.get("fund")?,
            fraction_bps: row.get::<_, i64>("fraction_bps")? as u16,
            status,
            created_at: row.get::<_, i64>("created_at")? as u64,
            updated_at: row.get::<_, i64>("updated_at")? as u64,
            error: row.get("error")?,
        })
    }

    // Synchronous helper methods for the trait implementations

    fn insert_state_sync(&self, state: &WithdrawalState) -> Result<(), StorageError> {
        let conn = self.conn()?;

        conn.execute(
            r#"
            INSERT INTO withdrawals (
                id, investor, fund, fraction_bps, status,
                created_at, updated_at, error
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                state.id,
                state.investor,
                state.fund,
                state.fraction_bps as i64,
                state.status.to_string(),
                state.created_at as i64,
                state.updated_at as i64,
                state.error,
            ],
        )
        .map_err(|e| {
            if let rusqlite::Error::SqliteFailure(ref err, _) = e {
                if err.extended_code == 1555 || err.extended_code == 2067 {
                    return StorageError::Duplicate(format!(
                        "active withdrawal for ({}, {})",
                        state.investor, state.fund
                    ));
                }
            }
            StorageError::Database(e.to_string())
        })?;

        Ok(())
    }

    fn update_state_sync(&self, state: &WithdrawalState) -> Result<(), StorageError> {
        let conn = self.conn()?;

        let rows_affected = conn
            .execute(
                r#"
            UPDATE withdrawals SET
                investor = ?2,
                fund = ?3,
                fraction_bps = ?4,
                status = ?5,
                updated_at = ?6,
                error = ?7
            WHERE id = ?1
            "#,
                params![
                    state.id,
                    state.investor,
                    state.fund,
                    state.fraction_bps as i64,
                    state.status.to_string(),
                    state.updated_at as i64,
                    state.error,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        if rows_affected == 0 {
            return Err(StorageError::NotFound(state.id.clone()));
        }

        Ok(())
    }

    fn get_state_sync(&self, id: &str) -> Result<Option<WithdrawalState>, StorageError> {
        let conn = self.conn()?;

        let state = conn
            .query_row(
                "SELECT * FROM withdrawals WHERE id = ?1",
                params![id],
                |row| Self::row_to_state(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(state)
    }

    fn get_active_sync(
        &self,
        investor: &str,
        fund: &str,
    ) -> Result<Option<WithdrawalState>, StorageError> {
        let conn = self.conn()?;

        let state = conn
            .query_row(
                r#"
            SELECT * FROM withdrawals
            WHERE investor = ?1 AND fund = ?2
              AND status NOT IN ('finalized', 'failed')
            "#,
                params![investor, fund],
                |row| Self::row_to_state(row),
            )
            .optional()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(state)
    }

    fn append_withdrawal_sync(
        &self,
        investor: &str,
        record: &WithdrawalRecord,
    ) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let details = record
            .details
            .as_ref()
            .map(|d| serde_json::to_string(d))
            .transpose()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let rows_affected = conn
            .execute(
                r#"
            INSERT OR IGNORE INTO withdrawal_history (
                investor, tx_ref, fund, amount, timestamp, details
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
                params![
                    investor,
                    record.tx_ref,
                    record.fund,
                    record.amount as i64,
                    record.timestamp as i64,
                    details,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows_affected > 0)
    }

    fn get_withdrawals_sync(&self, investor: &str) -> Result<Vec<WithdrawalRecord>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT fund, amount, tx_ref, timestamp, details
            FROM withdrawal_history
            WHERE investor = ?1
            ORDER BY timestamp ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let records = stmt
            .query_map(params![investor], |row| {
                let details: Option<String> = row.get("details")?;
                Ok(WithdrawalRecord {
                    fund: row.get("fund")?,
                    amount: row.get::<_, i64>("amount")? as u64,
                    tx_ref: row.get("tx_ref")?,
                    timestamp: row.get::<_, i64>("timestamp")? as u64,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                })
            })
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(records)
    }

    fn append_payment_sync(&self, fund: &str, record: &PaymentRecord) -> Result<bool, StorageError> {
        let conn = self.conn()?;

        let recipients = serde_json::to_string(&record.recipients)
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;

        let rows_affected = conn
            .execute(
                r#"
            INSERT OR IGNORE INTO payments (
                fund, tx_ref, total_value, recipients, timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
                params![
                    fund,
                    record.tx_ref,
                    record.total_value as i64,
                    recipients,
                    record.timestamp as i64,
                ],
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(rows_affected > 0)
    }

    fn get_payments_sync(&self, fund: &str) -> Result<Vec<PaymentRecord>, StorageError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                r#"
            SELECT tx_ref, total_value, recipients, timestamp
            FROM payments
            WHERE fund = ?1
            ORDER BY timestamp ASC
            "#,
            )
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let records = stmt
            .query_map(params![fund], |row| {
                let recipients_json: String = row.get("recipients")?;
                let recipients: Vec<Recipient> =
                    serde_json::from_str(&recipients_json).unwrap_or_default();
                Ok(PaymentRecord {
                    tx_ref: row.get("tx_ref")?,
                    total_value: row.get::<_, i64>("total_value")? as u64,
                    recipients,
                    timestamp: row.get::<_, i64>("timestamp")? as u64,
                })
            })
            .map_err(|e| StorageError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(records)
    }
}

#[async_trait]
impl WithdrawalStateStore for SqliteStore {
    async fn insert_if_no_active(&self, state: &WithdrawalState) -> StorageResult<()> {
        self.insert_state_sync(state)
    }

    async fn update(&self, state: &WithdrawalState) -> StorageResult<()> {
        self.update_state_sync(state)
    }

    async fn get(&self, id: &str) -> StorageResult<Option<WithdrawalState>> {
        self.get_state_sync(id)
    }

    async fn get_active(
        &self,
        investor: &str,
        fund: &str,
    ) -> StorageResult<Option<WithdrawalState>> {
        self.get_active_sync(investor, fund)
    }
}

#[async_trait]
impl WithdrawalHistoryStore for SqliteStore {
    async fn append_if_absent(
        &self,
        investor: &str,
        record: &WithdrawalRecord,
    ) -> StorageResult<bool> {
        self.append_withdrawal_sync(investor, record)
    }

    async fn get_history(&self, investor: &str) -> StorageResult<Vec<WithdrawalRecord>> {
        self.get_withdrawals_sync(investor)
    }
}

#[async_trait]
impl PaymentStore for SqliteStore {
    async fn append_if_absent(&self, fund: &str, record: &PaymentRecord) -> StorageResult<bool> {
        self.append_payment_sync(fund, record)
    }

    async fn get_history(&self, fund: &str) -> StorageResult<Vec<PaymentRecord>> {
        self.get_payments_sync(fund)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get_state() {
        let store = SqliteStore::in_memory().unwrap();
        let state = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 2500);

        store.insert_if_no_active(&state).await.unwrap();

        let retrieved = store.get(&state.id).await.unwrap().unwrap();
        assert_eq!(retrieved.investor, "inv1");
        assert_eq!(retrieved.fraction_bps, 2500);
        assert_eq!(retrieved.status, WithdrawalStatus::Requested);
    }

    #[tokio::test]
    async fn test_second_active_withdrawal_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let first = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 2500);
        store.insert_if_no_active(&first).await.unwrap();

        let second = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 5000);
        let result = store.insert_if_no_active(&second).await;

        assert!(matches!(result, Err(StorageError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_terminal_state_allows_new_withdrawal() {
        let store = SqliteStore::in_memory().unwrap();
        let mut first = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 2500);
        store.insert_if_no_active(&first).await.unwrap();

        first.mark_failed("route lookup failed".to_string());
        store.update(&first).await.unwrap();

        assert!(store.get_active("inv1", "fund1").await.unwrap().is_none());

        let second = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 5000);
        store.insert_if_no_active(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_state_transitions_persist() {
        let store = SqliteStore::in_memory().unwrap();
        let mut state = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 10_000);
        store.insert_if_no_active(&state).await.unwrap();

        state.mark_planned();
        store.update(&state).await.unwrap();
        state.mark_executing();
        store.update(&state).await.unwrap();

        let retrieved = store.get(&state.id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, WithdrawalStatus::Executing);
    }

    #[tokio::test]
    async fn test_update_missing_state() {
        let store = SqliteStore::in_memory().unwrap();
        let state = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 2500);

        let result = store.update(&state).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_withdrawal_history_dedup() {
        let store = SqliteStore::in_memory().unwrap();
        let record = WithdrawalRecord::new(
            "fund1".to_string(),
            500_000,
            "sig_abc".to_string(),
            Some(serde_json::json!({"assets_liquidated": 3})),
        );

        assert!(WithdrawalHistoryStore::append_if_absent(&store, "inv1", &record)
            .await
            .unwrap());
        assert!(!WithdrawalHistoryStore::append_if_absent(&store, "inv1", &record)
            .await
            .unwrap());

        let history: Vec<WithdrawalRecord> =
            WithdrawalHistoryStore::get_history(&store, "inv1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].amount, 500_000);
        assert!(history[0].details.is_some());
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("defunds.db");

        let mut state = WithdrawalState::new("inv1".to_string(), "fund1".to_string(), 7500);
        {
            let store = SqliteStore::new(&db_path).unwrap();
            store.insert_if_no_active(&state).await.unwrap();
            state.mark_planned();
            store.update(&state).await.unwrap();
        }

        let reopened = SqliteStore::new(&db_path).unwrap();
        let retrieved = reopened.get(&state.id).await.unwrap().unwrap();
        assert_eq!(retrieved.status, WithdrawalStatus::Planned);
        assert!(reopened.get_active("inv1", "fund1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_payment_history_dedup_scoped_by_fund() {
        let store = SqliteStore::in_memory().unwrap();
        let record = PaymentRecord::new(
            "sig_pay".to_string(),
            1_000,
            vec![
                Recipient {
                    wallet: "w1".to_string(),
                    amount: 600,
                },
                Recipient {
                    wallet: "w2".to_string(),
                    amount: 400,
                },
            ],
        );

        assert!(PaymentStore::append_if_absent(&store, "fund1", &record)
            .await
            .unwrap());
        assert!(!PaymentStore::append_if_absent(&store, "fund1", &record)
            .await
            .unwrap());
        // Same signature under another fund is a distinct row
        assert!(PaymentStore::append_if_absent(&store, "fund2", &record)
            .await
            .unwrap());

        let history: Vec<PaymentRecord> =
            PaymentStore::get_history(&store, "fund1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].recipients.len(), 2);
    }
}
