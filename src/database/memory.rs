//! In-memory transaction store, used when running without Postgres.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::database::error::DatabaseError;
use crate::database::mpesa_transaction_repository::{TransactionRecord, TransactionUpsert};
use crate::database::repository::TransactionStore;

#[derive(Default)]
pub struct InMemoryTransactionStore {
    records: RwLock<HashMap<String, TransactionRecord>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn upsert(&self, record: &TransactionUpsert) -> Result<TransactionRecord, DatabaseError> {
        let stored = record.clone().into_record(chrono::Utc::now());
        self.records
            .write()
            .await
            .insert(stored.checkout_request_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_checkout_request_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<TransactionRecord>, DatabaseError> {
        Ok(self.records.read().await.get(checkout_request_id).cloned())
    }
}
