use std::sync::Arc;

use async_trait::async_trait;
use fhirkit_api::{Bundle, RawJson};

use crate::deidentify::{DeidentifyError, Deidentifier, needs_redaction};
use crate::error::SearchError;
use crate::parser::SearchParameterParser;
use crate::result::{SearchResult, SearchResultEntry};

/// Executes a search for one resource type.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search(
        &self,
        resource_type: &str,
        queries: &[(String, String)],
    ) -> Result<SearchResult, SearchError>;
}

/// Turns a search result into the response bundle.
pub trait BundleFactory: Send + Sync {
    fn create_search_bundle(&self, request: &SearchResourceRequest, result: &SearchResult) -> Bundle;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResourceRequest {
    pub resource_type: String,
    pub queries: Vec<(String, String)>,
}

impl SearchResourceRequest {
    pub fn new(resource_type: impl Into<String>, queries: Vec<(String, String)>) -> Self {
        Self {
            resource_type: resource_type.into(),
            queries,
        }
    }

    pub fn from_query_string(resource_type: impl Into<String>, query: &str) -> Self {
        Self::new(resource_type, SearchParameterParser::parse_query(query))
    }
}

#[derive(Debug, Clone)]
pub struct SearchResourceResponse {
    pub bundle: Bundle,
}

/// Runs searches and redacts privacy-sensitive results before bundling them.
pub struct SearchResourceHandler {
    service: Arc<dyn SearchService>,
    factory: Arc<dyn BundleFactory>,
    deidentifier: Deidentifier,
}

impl SearchResourceHandler {
    pub fn new(service: Arc<dyn SearchService>, factory: Arc<dyn BundleFactory>) -> Self {
        Self {
            service,
            factory,
            deidentifier: Deidentifier::new(),
        }
    }

    pub async fn handle(
        &self,
        request: &SearchResourceRequest,
    ) -> Result<SearchResourceResponse, SearchError> {
        let result = self
            .service
            .search(&request.resource_type, &request.queries)
            .await?;

        let redact = needs_redaction(&request.resource_type)
            || result
                .results
                .iter()
                .any(|e| needs_redaction(&e.resource.resource_type));

        let result = if redact {
            self.redact_result(&result).inspect_err(|e| {
                tracing::warn!(resource_type = %request.resource_type, error = %e, "search result redaction failed");
            })?
        } else {
            result
        };

        tracing::debug!(
            resource_type = %request.resource_type,
            results = result.results.len(),
            redacted = redact,
            "search handled"
        );

        Ok(SearchResourceResponse {
            bundle: self.factory.create_search_bundle(request, &result),
        })
    }

    /// Builds a new result whose sensitive entries are redacted. Every other
    /// field is carried over unchanged and `result` itself is left as is.
    pub fn redact_result(&self, result: &SearchResult) -> Result<SearchResult, DeidentifyError> {
        let results = result
            .results
            .iter()
            .map(|entry| -> Result<SearchResultEntry, DeidentifyError> {
                let resource_type = &entry.resource.resource_type;
                if !needs_redaction(resource_type) {
                    return Ok(entry.clone());
                }
                let redacted = self
                    .deidentifier
                    .redact(resource_type, entry.resource.raw.as_str())?;
                let raw = RawJson::from_string(redacted).map_err(|_| {
                    DeidentifyError::MalformedResource {
                        resource_type: resource_type.clone(),
                        reason: "redacted payload is not valid JSON".to_string(),
                    }
                })?;
                Ok(SearchResultEntry {
                    resource: entry.resource.with_raw(raw),
                    mode: entry.mode,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SearchResult {
            results,
            total: result.total,
            unsupported_search_parameters: result.unsupported_search_parameters.clone(),
            unsupported_sorting_parameters: result.unsupported_sorting_parameters.clone(),
            continuation_token: result.continuation_token.clone(),
        })
    }
}
