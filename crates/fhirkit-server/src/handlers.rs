use axum::{
    Json,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::IntoResponse,
};
use fhirkit_api::{ApiError, ApiResponse, Bundle};
use fhirkit_search::SearchResourceRequest;
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn metadata(State(state): State<AppState>) -> impl IntoResponse {
    let resources: Vec<Value> = state
        .config
        .routing
        .resource_types
        .iter()
        .map(|t| {
            json!({
                "type": t,
                "interaction": [{"code": "read"}, {"code": "search-type"}],
            })
        })
        .collect();
    let body = json!({
        "resourceType": "CapabilityStatement",
        "status": "draft",
        "kind": "instance",
        "software": { "name": "fhirkit", "version": env!("CARGO_PKG_VERSION") },
        "fhirVersion": "4.0.1",
        "format": ["application/fhir+json"],
        "rest": [{
            "mode": "server",
            "resource": resources,
            "interaction": [{"code": "batch"}, {"code": "transaction"}],
        }],
    });
    ApiResponse::ok(body)
}

/// `POST /fhir`: runs a batch or transaction bundle.
///
/// The bundle runs on its own task. If the client goes away the handler
/// future is dropped, the guard cancels the token and the task stops
/// dispatching and rolls a transaction back.
pub async fn process_bundle(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<ApiResponse<Bundle>, ApiError> {
    let bundle: Bundle = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Request body is not a valid Bundle: {e}")))?;

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let handler = state.bundles.clone();
    let response = tokio::spawn(async move { handler.execute_with_cancellation(bundle, cancel).await })
        .await
        .map_err(|e| ApiError::internal(format!("Bundle task failed: {e}")))??;

    Ok(ApiResponse::ok(response))
}

/// `GET /fhir/{type}`: search with redaction of sensitive resource types.
pub async fn search_resource(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<ApiResponse<Bundle>, ApiError> {
    ensure_known_type(&state, &resource_type)?;
    let request = SearchResourceRequest::from_query_string(resource_type, query.as_deref().unwrap_or(""));
    let response = state.search.handle(&request).await?;
    Ok(ApiResponse::ok(response.bundle))
}

/// `GET /fhir/{type}/{id}`
pub async fn read_resource(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<ApiResponse<Value>, ApiError> {
    ensure_known_type(&state, &resource_type)?;
    match state.storage.read(&resource_type, &id).await {
        Ok(Some(stored)) => Ok(ApiResponse::ok(stored.resource).with_etag_weak(stored.version_id)),
        Ok(None) => Err(ApiError::not_found(format!(
            "Resource type '{resource_type}' with id '{id}' couldn't be found."
        ))),
        Err(e) => {
            tracing::warn!(%resource_type, %id, error = %e, "read failed");
            Err(ApiError::internal(e.to_string()))
        }
    }
}

fn ensure_known_type(state: &AppState, resource_type: &str) -> Result<(), ApiError> {
    if state.config.routing.knows(resource_type) {
        Ok(())
    } else {
        Err(ApiError::not_found(format!(
            "Resource type '{resource_type}' is not supported."
        )))
    }
}
