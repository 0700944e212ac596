use crate::database::error::DatabaseError;
use crate::database::repository::TransactionStore;
use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

/// Stored outcome of one STK push, as delivered by the result callback.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct TransactionRecord {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    /// `None` until a callback has reported a result.
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub callback_metadata: Option<serde_json::Value>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Values written by a callback delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionUpsert {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub callback_metadata: Option<serde_json::Value>,
}

impl TransactionUpsert {
    pub fn into_record(self, updated_at: chrono::DateTime<chrono::Utc>) -> TransactionRecord {
        TransactionRecord {
            checkout_request_id: self.checkout_request_id,
            merchant_request_id: self.merchant_request_id,
            result_code: self.result_code,
            result_desc: self.result_desc,
            callback_metadata: self.callback_metadata,
            updated_at,
        }
    }
}

/// Postgres-backed store for `mpesa_transactions`
pub struct MpesaTransactionRepository {
    pool: PgPool,
}

impl MpesaTransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for MpesaTransactionRepository {
    async fn upsert(&self, record: &TransactionUpsert) -> Result<TransactionRecord, DatabaseError> {
        // ON CONFLICT serializes concurrent deliveries for the same id; last write wins.
        sqlx::query_as::<_, TransactionRecord>(
            "INSERT INTO mpesa_transactions
             (checkout_request_id, merchant_request_id, result_code, result_desc, callback_metadata)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (checkout_request_id) DO UPDATE
             SET merchant_request_id = EXCLUDED.merchant_request_id,
                 result_code = EXCLUDED.result_code,
                 result_desc = EXCLUDED.result_desc,
                 callback_metadata = EXCLUDED.callback_metadata,
                 updated_at = NOW()
             RETURNING checkout_request_id, merchant_request_id, result_code, result_desc,
                       callback_metadata, updated_at",
        )
        .bind(&record.checkout_request_id)
        .bind(&record.merchant_request_id)
        .bind(&record.result_code)
        .bind(&record.result_desc)
        .bind(&record.callback_metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        sqlx::query_as::<_, TransactionRecord>(
            "SELECT checkout_request_id, merchant_request_id, result_code, result_desc,
                    callback_metadata, updated_at
             FROM mpesa_transactions
             WHERE checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
