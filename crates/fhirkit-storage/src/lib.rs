//! # fhirkit-storage
//!
//! Storage abstraction layer for fhirkit.
//!
//! This crate defines the traits and types that all storage backends must implement.
//! Implementations live in separate crates (`fhirkit-db-memory`).
//!
//! The main trait is [`FhirStorage`]: create, read, update, delete, search and
//! [`Transaction`] support. Bundle processing relies on transactions for
//! all-or-nothing semantics.

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{FhirStorage, Transaction};
pub use types::{SearchParams, SearchResult, StoredResource};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Shared storage trait object.
pub type DynStorage = std::sync::Arc<dyn FhirStorage>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::{FhirStorage, Transaction};
    pub use crate::types::{SearchParams, SearchResult, StoredResource};
    pub use crate::{DynStorage, StorageResult};
}
