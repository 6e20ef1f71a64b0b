//! Implementation of the FhirStorage trait for InMemoryStorage.

use async_trait::async_trait;
use serde_json::Value;

use fhirkit_storage::{
    FhirStorage, SearchParams, SearchResult, StorageError, StoredResource,
    Transaction as FhirTransaction,
};

use crate::storage::InMemoryStorage;
use crate::transaction::InMemoryTransaction;

#[async_trait]
impl FhirStorage for InMemoryStorage {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        let (stored, _) = self.insert_new(resource)?;
        tracing::trace!(reference = %stored.reference(), "created");
        Ok(stored)
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.get(resource_type, id))
    }

    async fn update(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        let (stored, _) = self.replace(resource, if_match)?;
        tracing::trace!(reference = %stored.reference(), version = %stored.version_id, "updated");
        Ok(stored)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        self.remove(resource_type, id);
        Ok(())
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        self.query(resource_type, params)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn FhirTransaction>, StorageError> {
        Ok(Box::new(InMemoryTransaction::new(self.clone())))
    }
}
