//! Search execution and de-identification for fhirkit.
//!
//! [`SearchResourceHandler`] runs a search through a [`SearchService`], passes
//! results of privacy-sensitive types through the [`Deidentifier`] and hands
//! the outcome to a [`BundleFactory`].

pub mod deidentify;
pub mod engine;
pub mod error;
pub mod factory;
pub mod handler;
pub mod parser;
pub mod result;

pub use deidentify::{DeidentifyError, Deidentifier, REDACTED_RESOURCE_TYPES, needs_redaction};
pub use engine::{SearchConfig, StorageSearchService};
pub use error::SearchError;
pub use factory::SearchBundleFactory;
pub use handler::{
    BundleFactory, SearchResourceHandler, SearchResourceRequest, SearchResourceResponse,
    SearchService,
};
pub use parser::{SearchParameterParser, SearchValidationError};
pub use result::{ResourceWrapper, SearchResult, SearchResultEntry};
