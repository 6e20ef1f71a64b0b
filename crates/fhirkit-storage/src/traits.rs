//! Storage traits every backend implements.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{SearchParams, SearchResult, StoredResource};

/// The main storage trait that all FHIR storage backends must implement.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use fhirkit_storage::{FhirStorage, StorageError, StoredResource};
///
/// async fn get_patient(storage: &dyn FhirStorage, id: &str) -> Result<StoredResource, StorageError> {
///     storage
///         .read("Patient", id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("Patient", id))
/// }
/// ```
#[async_trait]
pub trait FhirStorage: Send + Sync {
    // ==================== CRUD Operations ====================

    /// Creates a new resource.
    ///
    /// If the resource carries an `id` it is kept, otherwise the backend assigns one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a resource with the same type and ID exists.
    /// Returns `StorageError::InvalidResource` if the resource has no `resourceType`.
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Reads a resource by type and ID. Missing resources are `Ok(None)`.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Updates an existing resource.
    ///
    /// If `if_match` is provided, the update only succeeds when the current
    /// version id equals it.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the resource does not exist and no `if_match` was given.
    /// Returns `StorageError::VersionConflict` if `if_match` doesn't match (or the resource is absent).
    async fn update(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError>;

    /// Deletes a resource by type and ID. Deleting a missing resource succeeds.
    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError>;

    // ==================== Search ====================

    /// Searches for resources of a given type.
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;

    // ==================== Transactions ====================

    /// Begins a new transaction.
    ///
    /// The returned transaction must be either committed or rolled back.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if transactions are not supported.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;
}

/// A unit of work whose effects are applied or discarded together.
///
/// Reads and searches inside the transaction see its own uncommitted writes.
///
/// ```ignore
/// let mut tx = storage.begin_transaction().await?;
/// tx.create(&patient_json).await?;
/// tx.create(&observation_json).await?;
/// tx.commit().await?;
/// ```
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commits all operations. The transaction is consumed.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Undoes all operations. The transaction is consumed.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    /// See [`FhirStorage::create`].
    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// See [`FhirStorage::update`].
    async fn update(
        &mut self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError>;

    /// See [`FhirStorage::delete`].
    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError>;

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;
}
