//! Search results as produced by a [`SearchService`](crate::SearchService).

use fhirkit_api::{RawJson, SearchEntryMode};
use fhirkit_storage::StoredResource;
use time::OffsetDateTime;

/// One stored resource together with its identity and version metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceWrapper {
    pub id: String,
    pub version_id: String,
    pub resource_type: String,
    /// Serialized resource body.
    pub raw: RawJson,
    pub last_modified: OffsetDateTime,
    pub is_deleted: bool,
}

impl ResourceWrapper {
    /// Same wrapper with a different body.
    #[must_use]
    pub fn with_raw(&self, raw: RawJson) -> Self {
        Self {
            raw,
            ..self.clone()
        }
    }
}

impl From<StoredResource> for ResourceWrapper {
    fn from(stored: StoredResource) -> Self {
        Self {
            id: stored.id,
            version_id: stored.version_id,
            resource_type: stored.resource_type,
            raw: RawJson::from(stored.resource),
            last_modified: stored.last_updated,
            is_deleted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResultEntry {
    pub resource: ResourceWrapper,
    pub mode: SearchEntryMode,
}

impl SearchResultEntry {
    pub fn matched(resource: ResourceWrapper) -> Self {
        Self {
            resource,
            mode: SearchEntryMode::Match,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub results: Vec<SearchResultEntry>,
    /// Total number of matches across all pages, when known.
    pub total: Option<u64>,
    /// Parameters the backend ignored, as (name, value).
    pub unsupported_search_parameters: Vec<(String, String)>,
    pub unsupported_sorting_parameters: Vec<(String, String)>,
    /// Opaque token for the next page, absent on the last page.
    pub continuation_token: Option<String>,
}

impl SearchResult {
    /// Ignored parameters as human readable warnings.
    pub fn warnings(&self) -> Vec<String> {
        let search = self
            .unsupported_search_parameters
            .iter()
            .map(|(name, _)| format!("The search parameter '{name}' is not supported and was ignored."));
        let sort = self
            .unsupported_sorting_parameters
            .iter()
            .map(|(_, value)| format!("Sorting by '{value}' is not supported and was ignored."));
        search.chain(sort).collect()
    }
}
