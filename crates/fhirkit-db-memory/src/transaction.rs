//! Journaled transactions for the in-memory backend.
//!
//! Writes are applied to the shared map immediately and the value each key
//! held before the write is recorded. Commit drops the journal; rollback
//! replays it in reverse. A transaction dropped without either is rolled
//! back. Other readers can observe uncommitted writes (read-uncommitted
//! isolation).

use async_trait::async_trait;
use serde_json::Value;

use fhirkit_storage::{SearchParams, SearchResult, StorageError, StoredResource, Transaction};

use crate::storage::{InMemoryStorage, Undo};

pub struct InMemoryTransaction {
    storage: InMemoryStorage,
    journal: Vec<Undo>,
}

impl InMemoryTransaction {
    pub(crate) fn new(storage: InMemoryStorage) -> Self {
        Self {
            storage,
            journal: Vec::new(),
        }
    }

    /// Number of writes recorded so far.
    pub fn pending_writes(&self) -> usize {
        self.journal.len()
    }

    fn undo_all(&mut self) -> usize {
        let journal = std::mem::take(&mut self.journal);
        let writes = journal.len();
        for undo in journal.into_iter().rev() {
            self.storage.restore(undo);
        }
        writes
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.journal.is_empty() {
            let writes = self.undo_all();
            tracing::warn!(writes, "in-memory transaction dropped without commit; rolled back");
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        let writes = std::mem::take(&mut self.journal).len();
        tracing::debug!(writes, "in-memory transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        let writes = self.undo_all();
        tracing::debug!(writes, "in-memory transaction rolled back");
        Ok(())
    }

    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        let (stored, undo) = self.storage.insert_new(resource)?;
        self.journal.push(undo);
        Ok(stored)
    }

    async fn update(
        &mut self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        let (stored, undo) = self.storage.replace(resource, if_match)?;
        self.journal.push(undo);
        Ok(stored)
    }

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        if let Some(undo) = self.storage.remove(resource_type, id) {
            self.journal.push(undo);
        }
        Ok(())
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.storage.get(resource_type, id))
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        self.storage.query(resource_type, params)
    }
}
