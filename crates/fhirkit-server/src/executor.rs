//! Storage-backed execution of single bundle entries.
//!
//! Inside a transaction every read and write goes through the shared
//! transaction handle; batch entries talk to storage directly. Searches
//! always run through the search handler so their results are redacted.

use std::sync::Arc;

use async_trait::async_trait;
use fhirkit_api::{ApiError, IssueType, RawJson, weak_etag};
use fhirkit_bundle::{
    ConditionalHeaders, DispatchContext, DispatchError, HttpVerb, RequestDispatcher,
    ResolvedRoute, ResponseEnvelope, RouteDescriptor, RouteKind, SharedTransaction,
};
use fhirkit_search::{SearchResourceHandler, SearchResourceRequest};
use fhirkit_storage::{
    DynStorage, ErrorCategory, FhirStorage, SearchParams, SearchResult, StorageError,
    StoredResource,
};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use url::form_urlencoded;

use crate::authz::{AUTHORIZATION_FAILED, AccessPolicy};
use crate::patch::{apply_json_patch, patch_document};

/// Matches fetched to decide a conditional interaction; two already mean "many".
const CONDITIONAL_MATCH_LIMIT: u32 = 2;

pub struct StorageDispatcher {
    storage: DynStorage,
    search: Arc<SearchResourceHandler>,
    policy: Arc<dyn AccessPolicy>,
}

impl StorageDispatcher {
    pub fn new(
        storage: DynStorage,
        search: Arc<SearchResourceHandler>,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            storage,
            search,
            policy,
        }
    }

    async fn run(
        &self,
        store: &Store<'_>,
        route: &ResolvedRoute,
        body: Option<&Value>,
        headers: &ConditionalHeaders,
    ) -> Result<ResponseEnvelope, Failure> {
        let head = route.method() == HttpVerb::Head;
        match &route.kind {
            RouteKind::Search { resource_type } => {
                self.search(resource_type, &route.descriptor, head).await
            }
            RouteKind::Read { resource_type, id } => {
                read(store, resource_type, id, headers, head).await
            }
            RouteKind::Create { resource_type } => {
                create(store, resource_type, body, headers).await
            }
            RouteKind::Update { resource_type, id } => {
                update(store, resource_type, id, body, headers).await
            }
            RouteKind::ConditionalUpdate { resource_type } => {
                let criteria = criteria(&route.descriptor.query);
                match store.matches(resource_type, criteria).await?.as_slice() {
                    [] => match body_id(body) {
                        Some(id) => update(store, resource_type, &id, body, headers).await,
                        None => create(store, resource_type, body, &ConditionalHeaders::default()).await,
                    },
                    [existing] => update(store, resource_type, &existing.id, body, headers).await,
                    many => Err(multiple_matches("update", many.len()).into()),
                }
            }
            RouteKind::Patch { resource_type, id } => {
                patch(store, resource_type, id, body, headers).await
            }
            RouteKind::Delete { resource_type, id } => {
                store.delete(resource_type, id).await?;
                Ok(ResponseEnvelope::new(204))
            }
            RouteKind::ConditionalDelete { resource_type } => {
                let criteria = criteria(&route.descriptor.query);
                match store.matches(resource_type, criteria).await?.as_slice() {
                    [] => Ok(ResponseEnvelope::new(204)),
                    [existing] => {
                        store.delete(resource_type, &existing.id).await?;
                        Ok(ResponseEnvelope::new(204))
                    }
                    many => Err(multiple_matches("delete", many.len()).into()),
                }
            }
        }
    }

    async fn search(
        &self,
        resource_type: &str,
        descriptor: &RouteDescriptor,
        head: bool,
    ) -> Result<ResponseEnvelope, Failure> {
        let request = SearchResourceRequest::new(resource_type, descriptor.query.clone());
        let response = self.search.handle(&request).await.map_err(ApiError::from)?;
        let envelope = ResponseEnvelope::new(200);
        if head {
            return Ok(envelope);
        }
        let bundle = serde_json::to_value(&response.bundle)
            .map_err(|e| ApiError::internal(format!("Failed to serialize search bundle: {e}")))?;
        Ok(envelope.with_resource(RawJson::from(bundle)))
    }
}

#[async_trait]
impl RequestDispatcher for StorageDispatcher {
    async fn dispatch(
        &self,
        route: &ResolvedRoute,
        body: Option<&Value>,
        headers: &ConditionalHeaders,
        context: &DispatchContext,
    ) -> Result<ResponseEnvelope, DispatchError> {
        if let Some(reason) = self.policy.evaluate(route).deny_reason() {
            tracing::debug!(
                policy = self.policy.name(),
                method = %route.method(),
                path = %route.descriptor.path,
                reason,
                "bundle entry denied"
            );
            return Ok(ResponseEnvelope::error(
                403,
                IssueType::Forbidden,
                AUTHORIZATION_FAILED,
            ));
        }

        let store = match &context.transaction {
            Some(tx) => Store::Transaction(tx),
            None => Store::Direct(self.storage.as_ref()),
        };

        match self.run(&store, route, body, headers).await {
            Ok(envelope) => Ok(envelope),
            Err(Failure::Api(err)) => Ok(err.into()),
            Err(Failure::Storage(err)) => match storage_outcome(&err) {
                Some(api) => Ok(api.into()),
                None => Err(DispatchError::Storage(err)),
            },
        }
    }
}

enum Failure {
    Api(ApiError),
    Storage(StorageError),
}

impl From<ApiError> for Failure {
    fn from(err: ApiError) -> Self {
        Self::Api(err)
    }
}

impl From<StorageError> for Failure {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

/// Client-facing answer for storage errors caused by the request itself.
/// Infrastructure faults return `None` and surface as dispatch errors.
fn storage_outcome(err: &StorageError) -> Option<ApiError> {
    match err {
        StorageError::NotFound { resource_type, id } => Some(ApiError::not_found(format!(
            "Resource type '{resource_type}' with id '{id}' couldn't be found."
        ))),
        StorageError::VersionConflict { expected, actual } => {
            Some(ApiError::precondition_failed(format!(
                "The supplied version '{expected}' did not match the current version '{actual}'."
            )))
        }
        StorageError::AlreadyExists { resource_type, id } => Some(ApiError::conflict(format!(
            "Resource type '{resource_type}' with id '{id}' already exists."
        ))),
        StorageError::InvalidResource { message } => Some(ApiError::bad_request(message.clone())),
        other => match other.category() {
            ErrorCategory::Transaction | ErrorCategory::Infrastructure | ErrorCategory::Internal => {
                None
            }
            _ => Some(ApiError::internal(other.to_string())),
        },
    }
}

/// Where an entry's reads and writes go.
enum Store<'a> {
    Direct(&'a dyn FhirStorage),
    Transaction(&'a SharedTransaction),
}

impl Store<'_> {
    async fn read(&self, resource_type: &str, id: &str) -> Result<Option<StoredResource>, StorageError> {
        match self {
            Store::Direct(storage) => storage.read(resource_type, id).await,
            Store::Transaction(tx) => tx.lock().await.read(resource_type, id).await,
        }
    }

    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        match self {
            Store::Direct(storage) => storage.create(resource).await,
            Store::Transaction(tx) => tx.lock().await.create(resource).await,
        }
    }

    async fn update(&self, resource: &Value, if_match: Option<&str>) -> Result<StoredResource, StorageError> {
        match self {
            Store::Direct(storage) => storage.update(resource, if_match).await,
            Store::Transaction(tx) => tx.lock().await.update(resource, if_match).await,
        }
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        match self {
            Store::Direct(storage) => storage.delete(resource_type, id).await,
            Store::Transaction(tx) => tx.lock().await.delete(resource_type, id).await,
        }
    }

    async fn search(&self, resource_type: &str, params: &SearchParams) -> Result<SearchResult, StorageError> {
        match self {
            Store::Direct(storage) => storage.search(resource_type, params).await,
            Store::Transaction(tx) => tx.lock().await.search(resource_type, params).await,
        }
    }

    /// Resources matching conditional `criteria`, at most [`CONDITIONAL_MATCH_LIMIT`].
    async fn matches(&self, resource_type: &str, criteria: SearchParams) -> Result<Vec<StoredResource>, StorageError> {
        let params = criteria.with_count(CONDITIONAL_MATCH_LIMIT);
        Ok(self.search(resource_type, &params).await?.entries)
    }
}

async fn read(
    store: &Store<'_>,
    resource_type: &str,
    id: &str,
    headers: &ConditionalHeaders,
    head: bool,
) -> Result<ResponseEnvelope, Failure> {
    let stored = store
        .read(resource_type, id)
        .await?
        .ok_or_else(|| StorageError::not_found(resource_type, id))?;
    let envelope = stored_envelope(200, &stored);
    if not_modified(&stored, headers)? {
        return Ok(ResponseEnvelope {
            status: 304,
            resource: None,
            ..envelope
        });
    }
    Ok(if head {
        ResponseEnvelope {
            resource: None,
            ..envelope
        }
    } else {
        envelope
    })
}

/// Whether `ifNoneMatch` or `ifModifiedSince` make a read answer `304`.
fn not_modified(stored: &StoredResource, headers: &ConditionalHeaders) -> Result<bool, ApiError> {
    if let Some(tags) = headers.if_none_match.as_deref() {
        let matches = tags.split(',').any(|tag| {
            tag.trim() == "*"
                || fhirkit_api::parse_etag(tag).is_some_and(|v| v == stored.version_id)
        });
        return Ok(matches);
    }
    if let Some(since) = headers.if_modified_since.as_deref() {
        let since = OffsetDateTime::parse(since.trim(), &Rfc3339).map_err(|e| {
            ApiError::bad_request(format!("Invalid ifModifiedSince value '{since}': {e}"))
        })?;
        return Ok(stored.last_updated <= since);
    }
    Ok(false)
}

async fn create(
    store: &Store<'_>,
    resource_type: &str,
    body: Option<&Value>,
    headers: &ConditionalHeaders,
) -> Result<ResponseEnvelope, Failure> {
    let mut resource = resource_body(resource_type, body)?;

    if let Some(condition) = headers.if_none_exist.as_deref() {
        let query = condition.trim_start_matches(|c| c == '?' || c == '/');
        let query = query.split_once('?').map_or(query, |(_, q)| q);
        let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes()).into_owned().collect();
        match store.matches(resource_type, criteria(&pairs)).await?.as_slice() {
            [] => {}
            [existing] => {
                return Ok(stored_envelope(200, existing).with_location(existing.versioned_location()));
            }
            many => return Err(multiple_matches("create", many.len()).into()),
        }
    }

    // The server assigns ids on create.
    if let Some(object) = resource.as_object_mut() {
        object.remove("id");
    }
    let stored = store.create(&resource).await?;
    tracing::debug!(resource_type, id = %stored.id, "resource created");
    Ok(stored_envelope(201, &stored).with_location(stored.versioned_location()))
}

async fn update(
    store: &Store<'_>,
    resource_type: &str,
    id: &str,
    body: Option<&Value>,
    headers: &ConditionalHeaders,
) -> Result<ResponseEnvelope, Failure> {
    let mut resource = resource_body(resource_type, body)?;
    match resource.get("id").and_then(Value::as_str) {
        Some(body_id) if body_id != id => {
            return Err(ApiError::bad_request(format!(
                "Resource id '{body_id}' does not match the id '{id}' in the request url."
            ))
            .into());
        }
        _ => {}
    }
    if let Some(object) = resource.as_object_mut() {
        object.insert("id".into(), Value::String(id.to_string()));
    }
    let if_match = if_match_version(headers)?;

    let exists = store.read(resource_type, id).await?.is_some();
    let (status, stored) = if exists || if_match.is_some() {
        (200, store.update(&resource, if_match.as_deref()).await?)
    } else {
        (201, store.create(&resource).await?)
    };
    Ok(stored_envelope(status, &stored).with_location(stored.versioned_location()))
}

async fn patch(
    store: &Store<'_>,
    resource_type: &str,
    id: &str,
    body: Option<&Value>,
    headers: &ConditionalHeaders,
) -> Result<ResponseEnvelope, Failure> {
    let document = body.ok_or_else(|| ApiError::bad_request("PATCH entry has no patch document"))?;
    let operations = patch_document(document)?;
    let current = store
        .read(resource_type, id)
        .await?
        .ok_or_else(|| StorageError::not_found(resource_type, id))?;
    let patched = apply_json_patch(&current.resource, &operations)?;
    let version = if_match_version(headers)?.unwrap_or_else(|| current.version_id.clone());
    let stored = store.update(&patched, Some(&version)).await?;
    Ok(stored_envelope(200, &stored).with_location(stored.versioned_location()))
}

/// The entry body as a resource of `resource_type`.
fn resource_body(resource_type: &str, body: Option<&Value>) -> Result<Value, ApiError> {
    let body = body.ok_or_else(|| ApiError::bad_request("Bundle entry has no resource"))?;
    match body.get("resourceType").and_then(Value::as_str) {
        Some(t) if t == resource_type => Ok(body.clone()),
        Some(t) => Err(ApiError::bad_request(format!(
            "Resource type '{t}' does not match the type '{resource_type}' in the request url."
        ))),
        None => Err(ApiError::bad_request("Bundle entry resource has no resourceType")),
    }
}

fn body_id(body: Option<&Value>) -> Option<String> {
    body?.get("id")?.as_str().map(String::from)
}

fn if_match_version(headers: &ConditionalHeaders) -> Result<Option<String>, ApiError> {
    headers
        .if_match
        .as_deref()
        .map(|etag| {
            fhirkit_api::parse_etag(etag)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid If-Match value '{etag}'")))
        })
        .transpose()
}

fn criteria(query: &[(String, String)]) -> SearchParams {
    query
        .iter()
        .fold(SearchParams::new(), |params, (name, value)| params.with_param(name, value))
}

fn multiple_matches(interaction: &str, matches: usize) -> ApiError {
    ApiError::precondition_failed(format!(
        "Conditional {interaction} matched {matches} or more resources; the criteria must be more selective."
    ))
}

fn stored_envelope(status: u16, stored: &StoredResource) -> ResponseEnvelope {
    let envelope = ResponseEnvelope::new(status)
        .with_resource(RawJson::from(stored.resource.clone()))
        .with_etag(weak_etag(&stored.version_id));
    match stored.last_updated.format(&Rfc3339) {
        Ok(ts) => envelope.with_last_modified(ts),
        Err(_) => envelope,
    }
}
