//! In-memory FHIR storage backend for fhirkit.
//!
//! This crate provides an in-memory implementation of the `FhirStorage` trait
//! from `fhirkit-storage`, using a papaya lock-free HashMap for concurrent access
//! and journaled transactions that undo their writes on rollback.
//!
//! # Example
//!
//! ```ignore
//! use fhirkit_db_memory::InMemoryStorage;
//! use fhirkit_storage::FhirStorage;
//!
//! let storage = InMemoryStorage::new();
//! let patient = serde_json::json!({
//!     "resourceType": "Patient",
//!     "name": [{"family": "Smith"}]
//! });
//! let created = storage.create(&patient).await?;
//! ```

mod fhir_impl;
pub mod query;
pub mod storage;
pub mod transaction;

pub use fhirkit_storage::{DynStorage, FhirStorage, StorageError, StoredResource};
pub use query::{IdentifierToken, NamePart, QueryFilter};
pub use storage::{DEFAULT_PAGE_SIZE, InMemoryStorage, StorageKey};
pub use transaction::InMemoryTransaction;

/// Creates a new shareable in-memory storage instance.
pub fn create_storage() -> DynStorage {
    std::sync::Arc::new(InMemoryStorage::new())
}
