use async_trait::async_trait;

use crate::database::error::DatabaseError;
use crate::database::mpesa_transaction_repository::{TransactionRecord, TransactionUpsert};

/// Storage for STK push results, keyed by CheckoutRequestID.
///
/// Implementations must treat `upsert` as idempotent: applying the same
/// callback twice leaves exactly one record holding the latest values.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn upsert(&self, record: &TransactionUpsert) -> Result<TransactionRecord, DatabaseError>;

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError>;
}
