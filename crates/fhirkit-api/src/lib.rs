use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;
use thiserror::Error;

pub const FHIR_JSON: &str = "application/fhir+json";

// -------------------------
// Raw JSON Type for Zero-Copy Serialization
// -------------------------

/// Raw JSON that serializes directly without re-parsing or allocation.
///
/// Stores a validated `Box<RawValue>` inside an `Arc` so cloning is cheap.
/// Validation happens once at construction; serialization is zero-copy.
#[derive(Debug, Clone)]
pub struct RawJson(Arc<Box<RawValue>>);

impl RawJson {
    /// Create from a raw JSON string, validating once at construction.
    pub fn from_string(s: impl Into<String>) -> Result<Self, serde_json::Error> {
        Ok(Self(Arc::new(RawValue::from_string(s.into())?)))
    }

    /// Get the raw JSON string.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Parse the raw JSON into a Value.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(self.0.get())
    }

    /// Extract a string field from the JSON without full parsing.
    ///
    /// For known top-level fields (`id`, `resourceType`), uses a targeted
    /// 1-field struct deserializer instead of building the full Value tree.
    pub fn get_str_field(&self, field: &str) -> Option<String> {
        match field {
            "id" => {
                #[derive(Deserialize)]
                struct IdOnly {
                    id: Option<String>,
                }
                serde_json::from_str::<IdOnly>(self.0.get()).ok()?.id
            }
            "resourceType" => {
                #[derive(Deserialize)]
                struct RtOnly {
                    #[serde(rename = "resourceType")]
                    resource_type: Option<String>,
                }
                serde_json::from_str::<RtOnly>(self.0.get())
                    .ok()?
                    .resource_type
            }
            _ => {
                let v: serde_json::Value = serde_json::from_str(self.0.get()).ok()?;
                v.get(field).and_then(|v| v.as_str()).map(String::from)
            }
        }
    }
}

impl PartialEq for RawJson {
    fn eq(&self, other: &Self) -> bool {
        self.0.get() == other.0.get()
    }
}

impl Serialize for RawJson {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RawJson {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(RawJson(Arc::new(raw)))
    }
}

impl From<serde_json::Value> for RawJson {
    fn from(value: serde_json::Value) -> Self {
        // A Value tree always serializes to valid JSON.
        let raw = serde_json::value::to_raw_value(&value).expect("valid JSON");
        Self(Arc::new(raw))
    }
}

// -------------------------
// OperationOutcome
// -------------------------

/// FHIR issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

/// FHIR issue type code (the subset this server emits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    Invalid,
    Processing,
    NotFound,
    Conflict,
    Forbidden,
    NotSupported,
    Incomplete,
    Exception,
    Informational,
}

/// Minimal FHIR OperationOutcome representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueType,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl OperationOutcome {
    pub fn single(severity: IssueSeverity, code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                diagnostics: Some(diagnostics.into()),
            }],
        }
    }

    /// Shorthand for a single `error` issue, the shape every failed bundle entry carries.
    pub fn error(code: IssueType, diagnostics: impl Into<String>) -> Self {
        Self::single(IssueSeverity::Error, code, diagnostics)
    }

    /// Create an OperationOutcome with multiple warning issues.
    ///
    /// Useful for search responses where multiple parameters were ignored.
    pub fn warnings(messages: Vec<String>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue: messages
                .into_iter()
                .map(|msg| OperationOutcomeIssue {
                    severity: IssueSeverity::Warning,
                    code: IssueType::NotSupported,
                    diagnostics: Some(msg),
                })
                .collect(),
        }
    }

    /// Create a warning for unknown search parameters.
    pub fn unknown_params_warning(param_names: &[String]) -> Self {
        let messages: Vec<String> = param_names
            .iter()
            .map(|name| format!("Unknown search parameter '{}' was ignored", name))
            .collect();
        Self::warnings(messages)
    }

    /// Check if this outcome has any issues.
    pub fn has_issues(&self) -> bool {
        !self.issue.is_empty()
    }

    /// Diagnostics of the first issue, if any.
    pub fn first_diagnostics(&self) -> Option<&str> {
        self.issue.first().and_then(|i| i.diagnostics.as_deref())
    }

    pub fn to_raw(&self) -> RawJson {
        RawJson::from(serde_json::to_value(self).unwrap_or_default())
    }
}

// -------------------------
// API errors
// -------------------------

/// High-level API errors to be mapped to HTTP responses and FHIR OperationOutcome
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),
    /// An outcome that was already built elsewhere (e.g. by a failed bundle entry).
    #[error("{status}: {}", .outcome.first_diagnostics().unwrap_or("request failed"))]
    Outcome {
        status: StatusCode,
        outcome: OperationOutcome,
    },
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
    pub fn precondition_failed(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }
    pub fn unsupported_media_type(msg: impl Into<String>) -> Self {
        Self::UnsupportedMediaType(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
    pub fn unprocessable_entity(msg: impl Into<String>) -> Self {
        Self::UnprocessableEntity(msg.into())
    }
    pub fn with_outcome(status: StatusCode, outcome: OperationOutcome) -> Self {
        Self::Outcome { status, outcome }
    }
    /// Like [`ApiError::with_outcome`] for a numeric status; invalid codes become 500.
    pub fn from_status(status: u16, outcome: OperationOutcome) -> Self {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::Outcome { status, outcome }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Outcome { status, .. } => *status,
        }
    }

    pub fn to_operation_outcome(&self) -> OperationOutcome {
        use IssueType::*;
        match self {
            ApiError::BadRequest(msg) => OperationOutcome::error(Invalid, msg),
            ApiError::Forbidden(msg) => OperationOutcome::error(Forbidden, msg),
            ApiError::NotFound(msg) => OperationOutcome::error(NotFound, msg),
            ApiError::Conflict(msg) => OperationOutcome::error(Conflict, msg),
            ApiError::PreconditionFailed(msg) => OperationOutcome::error(Conflict, msg),
            ApiError::UnsupportedMediaType(msg) => OperationOutcome::error(NotSupported, msg),
            ApiError::Internal(msg) => {
                OperationOutcome::single(IssueSeverity::Fatal, Exception, msg)
            }
            ApiError::UnprocessableEntity(msg) => OperationOutcome::error(Processing, msg),
            ApiError::Outcome { outcome, .. } => outcome.clone(),
        }
    }
}

fn fhir_json_body(status: StatusCode, body: Vec<u8>, extra: Vec<(HeaderName, HeaderValue)>) -> Response {
    let mut builder = axum::http::Response::builder().status(status);
    builder = builder.header(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
    for (n, v) in extra {
        builder = builder.header(n, v);
    }
    builder
        .body(axum::body::Body::from(body))
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(axum::body::Body::from("{}"));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON));
            fallback
        })
}

fn serialization_failure() -> Vec<u8> {
    let fallback = OperationOutcome::single(
        IssueSeverity::Fatal,
        IssueType::Exception,
        "Serialization failure",
    );
    serde_json::to_vec(&fallback).unwrap_or_else(|_| b"{}".to_vec())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let outcome = self.to_operation_outcome();
        let body = serde_json::to_vec(&outcome).unwrap_or_else(|_| serialization_failure());
        fhir_json_body(status, body, Vec::new())
    }
}


// -------------------------
// API Response Wrapper
// -------------------------

#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub value: T,
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl<T> ApiResponse<T> {
    pub fn new(value: T, status: StatusCode) -> Self {
        Self {
            value,
            status,
            headers: Vec::new(),
        }
    }

    pub fn ok(value: T) -> Self {
        Self::new(value, StatusCode::OK)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn with_etag_weak(mut self, version: impl Into<String>) -> Self {
        let tag = weak_etag(&version.into());
        if let Ok(val) = HeaderValue::from_str(&tag) {
            self.headers.push((header::ETAG, val));
        }
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = serde_json::to_vec(&self.value).unwrap_or_else(|_| serialization_failure());
        fhir_json_body(self.status, body, self.headers)
    }
}

/// Formats a version id as a weak ETag (`W/"<version>"`).
pub fn weak_etag(version: &str) -> String {
    format!("W/\"{version}\"")
}

/// Extracts the version id from an ETag value, accepting weak and strong forms.
pub fn parse_etag(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let unprefixed = trimmed.strip_prefix("W/").unwrap_or(trimmed);
    let unquoted = unprefixed.trim_matches('"');
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_response_ok_sets_status_and_content_type() {
        let payload = json!({"resourceType": "Patient"});
        let resp = ApiResponse::ok(payload).into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert_eq!(content_type, &HeaderValue::from_static(FHIR_JSON));
    }

    #[test]
    fn api_response_can_add_etag() {
        let payload = json!({"resourceType": "Patient", "id": "1"});
        let resp = ApiResponse::ok(payload).with_etag_weak("7").into_response();
        assert_eq!(
            resp.headers().get(header::ETAG).unwrap(),
            &HeaderValue::from_static("W/\"7\"")
        );
    }

    #[test]
    fn etag_parsing_accepts_weak_and_strong() {
        assert_eq!(parse_etag("W/\"3\""), Some("3".to_string()));
        assert_eq!(parse_etag("\"3\""), Some("3".to_string()));
        assert_eq!(parse_etag("3"), Some("3".to_string()));
        assert_eq!(parse_etag("W/\"\""), None);
    }
}

// -------------------------
// Content Negotiation
// -------------------------

/// Validate the Accept header for JSON responses per FHIR: allow application/fhir+json and application/json
pub fn validate_accept(headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(accept) = headers.get(header::ACCEPT) {
        let val = accept.to_str().unwrap_or("").to_ascii_lowercase();
        let allowed = val.contains(FHIR_JSON) || val.contains("application/json") || val.contains("*/*");
        if !allowed {
            return Err(ApiError::unsupported_media_type(format!(
                "Unsupported Accept: {val}. Only application/fhir+json or application/json are supported."
            )));
        }
    }
    Ok(())
}

/// Validate Content-Type for requests with bodies: require application/fhir+json or application/json
pub fn validate_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    if let Some(ct) = headers.get(header::CONTENT_TYPE) {
        let val = ct.to_str().unwrap_or("").to_ascii_lowercase();
        let allowed = val.starts_with(FHIR_JSON) || val.starts_with("application/json");
        if !allowed {
            return Err(ApiError::unsupported_media_type(format!(
                "Unsupported Content-Type: {val}. Only application/fhir+json or application/json are supported."
            )));
        }
    }
    Ok(())
}


// -------------------------
// FHIR Bundle Types
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleType {
    Batch,
    Transaction,
    BatchResponse,
    TransactionResponse,
    Searchset,
    Collection,
    /// Any bundle type this server does not process (document, message, history...).
    #[serde(other)]
    Unsupported,
}

impl BundleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Transaction => "transaction",
            Self::BatchResponse => "batch-response",
            Self::TransactionResponse => "transaction-response",
            Self::Searchset => "searchset",
            Self::Collection => "collection",
            Self::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for BundleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BundleEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "fullUrl")]
    pub full_url: Option<String>,
    /// The resource content as raw JSON for efficient serialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<RawJson>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<BundleEntrySearch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleEntryResponse>,
}

/// How an entry got into a searchset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEntryMode {
    Match,
    Include,
    Outcome,
}

/// Search component of a Bundle entry (used in searchset bundles)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntrySearch {
    pub mode: SearchEntryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Request component of a batch/transaction entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryRequest {
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_none_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_modified_since: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_none_exist: Option<String>,
}

/// Response component of a batch-response/transaction-response entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntryResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RawJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub bundle_type: BundleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub link: Vec<BundleLink>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    pub fn new(bundle_type: BundleType, entries: Vec<BundleEntry>) -> Self {
        Self {
            resource_type: "Bundle".to_string(),
            id: None,
            bundle_type,
            total: None,
            link: Vec::new(),
            entry: entries,
        }
    }

    pub fn searchset(total: Option<u64>, entries: Vec<BundleEntry>, links: Vec<BundleLink>) -> Self {
        Self {
            total,
            link: links,
            ..Self::new(BundleType::Searchset, entries)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Finds the link with the given relation.
    pub fn link(&self, relation: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == relation)
            .map(|l| l.url.as_str())
    }
}


// -------------------------
// Search result -> Bundle generation
// -------------------------

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// One resource to place into a searchset.
#[derive(Debug, Clone)]
pub struct SearchsetEntry {
    pub resource: RawJson,
    pub resource_type: String,
    pub id: String,
    pub mode: SearchEntryMode,
}

/// Builds `self` and, when the backend returned a continuation token, `next` links.
pub fn build_search_links(
    base_url: &str,
    resource_type: &str,
    query_suffix: Option<&str>,
    continuation_token: Option<&str>,
) -> Vec<BundleLink> {
    let mut self_url = join_url(base_url, resource_type);
    if let Some(q) = query_suffix.filter(|q| !q.is_empty()) {
        self_url.push('?');
        self_url.push_str(q.trim_start_matches('?'));
    }

    let mut links = vec![BundleLink {
        relation: "self".to_string(),
        url: self_url.clone(),
    }];

    if let Some(token) = continuation_token {
        let separator = if self_url.contains('?') { '&' } else { '?' };
        links.push(BundleLink {
            relation: "next".to_string(),
            url: format!("{self_url}{separator}ct={token}"),
        });
    }

    links
}

/// Create a search bundle from raw JSON resources with optional warnings.
///
/// The OperationOutcome, when it has issues, becomes the first entry with
/// search mode "outcome".
pub fn bundle_from_search_raw_with_warnings(
    total: Option<u64>,
    resources: Vec<SearchsetEntry>,
    base_url: &str,
    resource_type: &str,
    query_suffix: Option<&str>,
    continuation_token: Option<&str>,
    warnings: Option<OperationOutcome>,
) -> Bundle {
    let mut entries = Vec::with_capacity(resources.len() + 1);

    if let Some(outcome) = warnings.filter(OperationOutcome::has_issues) {
        entries.push(BundleEntry {
            resource: Some(outcome.to_raw()),
            search: Some(BundleEntrySearch {
                mode: SearchEntryMode::Outcome,
                score: None,
            }),
            ..Default::default()
        });
    }

    for res in resources {
        let full_url = Some(join_url(base_url, &format!("{}/{}", res.resource_type, res.id)));
        entries.push(BundleEntry {
            full_url,
            resource: Some(res.resource),
            search: Some(BundleEntrySearch {
                mode: res.mode,
                score: None,
            }),
            ..Default::default()
        });
    }

    let links = build_search_links(base_url, resource_type, query_suffix, continuation_token);
    Bundle::searchset(total, entries, links)
}

#[cfg(test)]
mod searchset_tests {
    use super::*;
    use serde_json::json;

    fn patient(id: &str) -> SearchsetEntry {
        SearchsetEntry {
            resource: json!({"resourceType": "Patient", "id": id}).into(),
            resource_type: "Patient".into(),
            id: id.into(),
            mode: SearchEntryMode::Match,
        }
    }

    #[test]
    fn searchset_carries_matches_links_and_total() {
        let b = bundle_from_search_raw_with_warnings(
            Some(2),
            vec![patient("1"), patient("2")],
            "http://example.org/fhir/",
            "Patient",
            Some("gender=male"),
            None,
            None,
        );
        let j = serde_json::to_value(&b).unwrap();
        assert_eq!(j["type"], "searchset");
        assert_eq!(j["total"], 2);
        assert_eq!(j["entry"][0]["fullUrl"], "http://example.org/fhir/Patient/1");
        assert_eq!(j["entry"][1]["search"]["mode"], "match");
        assert_eq!(
            b.link("self"),
            Some("http://example.org/fhir/Patient?gender=male")
        );
        assert!(b.link("next").is_none());
    }

    #[test]
    fn warnings_become_leading_outcome_entry() {
        let warnings = OperationOutcome::unknown_params_warning(&["foo".to_string()]);
        let b = bundle_from_search_raw_with_warnings(
            None,
            vec![patient("1")],
            "http://example.org",
            "Patient",
            None,
            Some("10"),
            Some(warnings),
        );
        assert_eq!(b.entry.len(), 2);
        assert_eq!(
            b.entry[0].search.as_ref().unwrap().mode,
            SearchEntryMode::Outcome
        );
        assert_eq!(b.link("next"), Some("http://example.org/Patient?ct=10"));
    }
}
