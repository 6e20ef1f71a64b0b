//! The single-request executor seam and the response envelope it produces.

use std::sync::Arc;

use async_trait::async_trait;
use fhirkit_api::{
    ApiError, BundleEntry, BundleEntryRequest, BundleEntryResponse, IssueType, OperationOutcome,
    RawJson,
};
use fhirkit_storage::{StorageError, Transaction};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::route::{ResolvedRoute, RouteNotFound};

/// Outcome of one executed entry, before it becomes a response entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub resource: Option<RawJson>,
    pub outcome: Option<OperationOutcome>,
    pub location: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ResponseEnvelope {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            resource: None,
            outcome: None,
            location: None,
            etag: None,
            last_modified: None,
        }
    }

    /// Failed entry carrying a single error issue.
    pub fn error(status: u16, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::new(status).with_outcome(OperationOutcome::error(code, diagnostics))
    }

    pub fn with_resource(mut self, resource: RawJson) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_outcome(mut self, outcome: OperationOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: impl Into<String>) -> Self {
        self.last_modified = Some(last_modified.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }

    /// Outcome to surface for a failed entry, synthesized when the executor gave none.
    pub fn failure_outcome(&self) -> OperationOutcome {
        self.outcome.clone().unwrap_or_else(|| {
            let code = match self.status {
                403 => IssueType::Forbidden,
                404 => IssueType::NotFound,
                409 | 412 => IssueType::Conflict,
                400..=499 => IssueType::Invalid,
                _ => IssueType::Exception,
            };
            OperationOutcome::error(code, format!("Entry failed with status {}.", self.status))
        })
    }

    /// The response entry placed at this envelope's position in the bundle.
    pub fn into_entry(self) -> BundleEntry {
        BundleEntry {
            resource: self.resource,
            response: Some(BundleEntryResponse {
                status: self.status.to_string(),
                location: self.location,
                etag: self.etag,
                last_modified: self.last_modified,
                outcome: self.outcome.as_ref().map(OperationOutcome::to_raw),
            }),
            ..Default::default()
        }
    }
}

impl From<ApiError> for ResponseEnvelope {
    fn from(err: ApiError) -> Self {
        Self::new(err.status_code().as_u16()).with_outcome(err.to_operation_outcome())
    }
}

impl From<RouteNotFound> for ResponseEnvelope {
    fn from(err: RouteNotFound) -> Self {
        Self::error(404, IssueType::NotFound, err.to_string())
    }
}

/// Conditional headers carried by an entry request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    pub if_match: Option<String>,
    pub if_none_exist: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
}

impl ConditionalHeaders {
    /// Headers that make a read's result depend on the caller's state.
    pub fn has_read_conditions(&self) -> bool {
        self.if_none_match.is_some() || self.if_modified_since.is_some()
    }
}

impl From<&BundleEntryRequest> for ConditionalHeaders {
    fn from(request: &BundleEntryRequest) -> Self {
        Self {
            if_match: request.if_match.clone(),
            if_none_exist: request.if_none_exist.clone(),
            if_none_match: request.if_none_match.clone(),
            if_modified_since: request.if_modified_since.clone(),
        }
    }
}

/// Storage transaction shared by every dispatch of one transaction bundle.
pub type SharedTransaction = Arc<Mutex<Box<dyn Transaction>>>;

#[derive(Clone, Default)]
pub struct DispatchContext {
    /// Present while a transaction bundle runs; writes must go through it.
    pub transaction: Option<SharedTransaction>,
}

impl DispatchContext {
    pub fn with_transaction(transaction: SharedTransaction) -> Self {
        Self {
            transaction: Some(transaction),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

/// A dispatch that could not produce a response at all.
///
/// Expected failures (missing resource, failed precondition, denied access) are
/// returned as envelopes with an error status instead.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("Dispatch failed: {0}")]
    Fault(String),
}

impl From<DispatchError> for ResponseEnvelope {
    fn from(err: DispatchError) -> Self {
        Self::error(500, IssueType::Exception, err.to_string())
    }
}

/// Executes one resolved entry request.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        route: &ResolvedRoute,
        body: Option<&Value>,
        headers: &ConditionalHeaders,
        context: &DispatchContext,
    ) -> Result<ResponseEnvelope, DispatchError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verb::HttpVerb;
    use serde_json::json;

    #[test]
    fn into_entry_uses_numeric_status_and_raw_outcome() {
        let entry = ResponseEnvelope::error(403, IssueType::Forbidden, "Authorization failed.")
            .into_entry();
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            json!({
                "response": {
                    "status": "403",
                    "outcome": {
                        "resourceType": "OperationOutcome",
                        "issue": [{"severity": "error", "code": "forbidden", "diagnostics": "Authorization failed."}]
                    }
                }
            })
        );
    }

    #[test]
    fn success_entry_carries_resource_and_headers() {
        let entry = ResponseEnvelope::new(201)
            .with_resource(RawJson::from(json!({"resourceType": "Patient", "id": "1"})))
            .with_location("Patient/1/_history/1")
            .with_etag("W/\"1\"")
            .into_entry();
        let response = entry.response.unwrap();
        assert_eq!(response.status, "201");
        assert_eq!(response.location.as_deref(), Some("Patient/1/_history/1"));
        assert!(response.outcome.is_none());
        assert!(entry.resource.is_some());
    }

    #[test]
    fn route_not_found_becomes_404() {
        let envelope = ResponseEnvelope::from(RouteNotFound::new(HttpVerb::Get, "ValueSet/$lookup"));
        assert_eq!(envelope.status, 404);
        let outcome = envelope.outcome.unwrap();
        assert_eq!(outcome.issue[0].code, IssueType::NotFound);
        assert_eq!(
            outcome.first_diagnostics(),
            Some("The route for \"/ValueSet/$lookup\" was not found.")
        );
    }

    #[test]
    fn failure_outcome_is_synthesized_when_missing() {
        let envelope = ResponseEnvelope::new(412);
        assert!(envelope.is_failure());
        assert_eq!(envelope.failure_outcome().issue[0].code, IssueType::Conflict);
        assert!(!ResponseEnvelope::new(304).is_failure());
    }

    #[test]
    fn read_conditions() {
        let headers = ConditionalHeaders {
            if_match: Some("W/\"1\"".into()),
            ..Default::default()
        };
        assert!(!headers.has_read_conditions());
        let headers = ConditionalHeaders {
            if_none_match: Some("W/\"1\"".into()),
            ..Default::default()
        };
        assert!(headers.has_read_conditions());
    }
}
