use fhirkit_api::{
    Bundle, OperationOutcome, SearchsetEntry, bundle_from_search_raw_with_warnings,
};
use url::form_urlencoded;

use crate::handler::{BundleFactory, SearchResourceRequest};
use crate::parser::CONTINUATION_TOKEN_PARAM;
use crate::result::SearchResult;

/// Builds `searchset` bundles with `self`/`next` links rooted at `base_url`.
#[derive(Debug, Clone)]
pub struct SearchBundleFactory {
    base_url: String,
}

impl SearchBundleFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Re-encodes the request query without the continuation token.
    fn query_suffix(request: &SearchResourceRequest) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &request.queries {
            if name != CONTINUATION_TOKEN_PARAM {
                serializer.append_pair(name, value);
            }
        }
        serializer.finish()
    }
}

impl BundleFactory for SearchBundleFactory {
    fn create_search_bundle(&self, request: &SearchResourceRequest, result: &SearchResult) -> Bundle {
        let entries = result
            .results
            .iter()
            .map(|entry| SearchsetEntry {
                resource: entry.resource.raw.clone(),
                resource_type: entry.resource.resource_type.clone(),
                id: entry.resource.id.clone(),
                mode: entry.mode,
            })
            .collect();

        let warnings = result.warnings();
        let outcome = (!warnings.is_empty()).then(|| OperationOutcome::warnings(warnings));
        let query = Self::query_suffix(request);

        bundle_from_search_raw_with_warnings(
            result.total,
            entries,
            &self.base_url,
            &request.resource_type,
            Some(query.as_str()),
            result.continuation_token.as_deref(),
            outcome,
        )
    }
}
