use async_trait::async_trait;
use fhirkit_storage::DynStorage;

use crate::error::SearchError;
use crate::handler::SearchService;
use crate::parser::{SearchParameterParser, encode_continuation_token};
use crate::result::{ResourceWrapper, SearchResult, SearchResultEntry};

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub default_count: u32,
    pub max_count: u32,
    /// Parameters passed on to the backend; anything else is reported as unsupported.
    pub allowed_params: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_count: 10,
            max_count: 100,
            allowed_params: [
                "_id",
                "identifier",
                "name",
                "family",
                "given",
                "gender",
                "birthdate",
                "active",
                "status",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl SearchConfig {
    pub fn allows(&self, param: &str) -> bool {
        self.allowed_params.iter().any(|p| p == param)
    }
}

/// [`SearchService`] over any [`FhirStorage`](fhirkit_storage::FhirStorage) backend.
pub struct StorageSearchService {
    storage: DynStorage,
    config: SearchConfig,
}

impl StorageSearchService {
    pub fn new(storage: DynStorage, config: SearchConfig) -> Self {
        Self { storage, config }
    }
}

#[async_trait]
impl SearchService for StorageSearchService {
    async fn search(
        &self,
        resource_type: &str,
        queries: &[(String, String)],
    ) -> Result<SearchResult, SearchError> {
        let classified = SearchParameterParser::classify(queries, &self.config)?;
        let page = self.storage.search(resource_type, &classified.params).await?;

        let returned = u32::try_from(page.entries.len()).unwrap_or(u32::MAX);
        let continuation_token = (page.has_more && returned > 0)
            .then(|| encode_continuation_token(classified.offset.saturating_add(returned)));

        tracing::debug!(
            resource_type,
            returned,
            total = ?page.total,
            ignored = classified.unsupported_search.len() + classified.unsupported_sort.len(),
            "storage search"
        );

        Ok(SearchResult {
            results: page
                .entries
                .into_iter()
                .map(|stored| SearchResultEntry::matched(ResourceWrapper::from(stored)))
                .collect(),
            total: page.total.map(u64::from),
            unsupported_search_parameters: classified.unsupported_search,
            unsupported_sorting_parameters: classified.unsupported_sort,
            continuation_token,
        })
    }
}
