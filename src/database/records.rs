//! Submission records: the identifier → transaction-hash mapping behind
//! idempotent payment submission.
//!
//! Records are keyed by (source account, client resource id) and are never
//! deleted; later status queries depend on them. Only per-key atomicity is
//! required of an implementation.

use crate::database::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Pending,
    Validated,
    Failed,
}

impl SubmissionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "validated" => Some(Self::Validated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub source_account: String,
    pub client_resource_id: String,
    /// Empty until the node has assigned a hash at submit time.
    pub tx_hash: String,
    pub state: SubmissionState,
    pub ledger_index: Option<i64>,
    pub engine_result: Option<String>,
    pub result_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn pending(source_account: &str, client_resource_id: &str) -> Self {
        Self {
            source_account: source_account.to_string(),
            client_resource_id: client_resource_id.to_string(),
            tx_hash: String::new(),
            state: SubmissionState::Pending,
            ledger_index: None,
            engine_result: None,
            result_message: None,
            created_at: Utc::now(),
        }
    }
}

/// Keyed storage for submission records. `put` overwrites the whole record
/// for its key.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(
        &self,
        source_account: &str,
        client_resource_id: &str,
    ) -> Result<Option<SubmissionRecord>, DatabaseError>;

    async fn put(&self, record: &SubmissionRecord) -> Result<(), DatabaseError>;

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Option<SubmissionRecord>, DatabaseError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<(String, String), SubmissionRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(
        &self,
        source_account: &str,
        client_resource_id: &str,
    ) -> Result<Option<SubmissionRecord>, DatabaseError> {
        let key = (source_account.to_string(), client_resource_id.to_string());
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn put(&self, record: &SubmissionRecord) -> Result<(), DatabaseError> {
        let key = (
            record.source_account.clone(),
            record.client_resource_id.clone(),
        );
        self.records.write().await.insert(key, record.clone());
        Ok(())
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Option<SubmissionRecord>, DatabaseError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| r.tx_hash == tx_hash)
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Postgres store
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct SubmissionRow {
    source_account: String,
    client_resource_id: String,
    tx_hash: String,
    state: String,
    ledger_index: Option<i64>,
    engine_result: Option<String>,
    result_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl SubmissionRow {
    fn into_record(self) -> Result<SubmissionRecord, DatabaseError> {
        let state = SubmissionState::parse(&self.state).ok_or_else(|| {
            DatabaseError::Query(format!("unknown submission state '{}'", self.state))
        })?;
        Ok(SubmissionRecord {
            source_account: self.source_account,
            client_resource_id: self.client_resource_id,
            tx_hash: self.tx_hash,
            state,
            ledger_index: self.ledger_index,
            engine_result: self.engine_result,
            result_message: self.result_message,
            created_at: self.created_at,
        })
    }
}

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS submissions (
                 source_account     TEXT NOT NULL,
                 client_resource_id TEXT NOT NULL,
                 tx_hash            TEXT NOT NULL DEFAULT '',
                 state              TEXT NOT NULL,
                 ledger_index       BIGINT,
                 engine_result      TEXT,
                 result_message     TEXT,
                 created_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
                 updated_at         TIMESTAMPTZ NOT NULL DEFAULT now(),
                 PRIMARY KEY (source_account, client_resource_id)
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }
}

const SELECT_COLUMNS: &str = "source_account, client_resource_id, tx_hash, state, \
                              ledger_index, engine_result, result_message, created_at";

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get(
        &self,
        source_account: &str,
        client_resource_id: &str,
    ) -> Result<Option<SubmissionRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM submissions \
             WHERE source_account = $1 AND client_resource_id = $2"
        ))
        .bind(source_account)
        .bind(client_resource_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(SubmissionRow::into_record).transpose()
    }

    async fn put(&self, record: &SubmissionRecord) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO submissions \
                 (source_account, client_resource_id, tx_hash, state, \
                  ledger_index, engine_result, result_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (source_account, client_resource_id) DO UPDATE SET \
                 tx_hash = EXCLUDED.tx_hash, \
                 state = EXCLUDED.state, \
                 ledger_index = EXCLUDED.ledger_index, \
                 engine_result = EXCLUDED.engine_result, \
                 result_message = EXCLUDED.result_message, \
                 updated_at = now()",
        )
        .bind(&record.source_account)
        .bind(&record.client_resource_id)
        .bind(&record.tx_hash)
        .bind(record.state.as_str())
        .bind(record.ledger_index)
        .bind(&record.engine_result)
        .bind(&record.result_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn find_by_hash(&self, tx_hash: &str) -> Result<Option<SubmissionRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, SubmissionRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM submissions WHERE tx_hash = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        row.map(SubmissionRow::into_record).transpose()
    }
}
