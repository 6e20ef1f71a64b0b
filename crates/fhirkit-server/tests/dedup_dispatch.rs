use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use fhirkit_bundle::{
    ConditionalHeaders, DispatchContext, DispatchError, RequestDispatcher, ResolvedRoute,
    ResponseEnvelope,
};
use fhirkit_db_memory::InMemoryStorage;
use fhirkit_server::{AppConfig, AppState, StorageDispatcher, build_app, search_handler};
use fhirkit_storage::{DynStorage, FhirStorage};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Counts dispatches on their way to the storage dispatcher.
struct CountingDispatcher {
    inner: StorageDispatcher,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RequestDispatcher for CountingDispatcher {
    async fn dispatch(
        &self,
        route: &ResolvedRoute,
        body: Option<&Value>,
        headers: &ConditionalHeaders,
        context: &DispatchContext,
    ) -> Result<ResponseEnvelope, DispatchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.dispatch(route, body, headers, context).await
    }
}

#[tokio::test]
async fn identical_gets_are_dispatched_once() {
    let mut cfg = AppConfig::default();
    cfg.routing
        .search_parameters
        .insert("Observation".into(), vec!["status".into()]);
    let storage = InMemoryStorage::new();
    storage
        .create(&json!({"resourceType": "Observation", "id": "o1", "status": "final"}))
        .await
        .unwrap();
    let storage: DynStorage = Arc::new(storage);
    let search = search_handler(&cfg, storage.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = Arc::new(CountingDispatcher {
        inner: StorageDispatcher::new(storage.clone(), search.clone(), cfg.auth.policy.build()),
        calls: calls.clone(),
    });
    let app = build_app(AppState::with_dispatcher(&cfg, storage, search, dispatcher));

    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {"request": {"method": "GET", "url": "Observation/o1"}},
            {"request": {"method": "GET", "url": "/Observation/o1"}},
            {"request": {"method": "GET", "url": "Observation?status=final"}},
            {"request": {"method": "GET", "url": "Observation/o1"}},
            {"request": {"method": "GET", "url": "Observation/o1", "ifNoneMatch": "W/\"1\""}}
        ]
    });
    let res = app
        .oneshot(
            Request::post("/fhir")
                .header(header::CONTENT_TYPE, "application/fhir+json")
                .body(Body::from(bundle.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let response: Value = serde_json::from_slice(&bytes).unwrap();

    // One read for entries 0, 1 and 3, one search, one conditional read
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let entries = response["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 5);
    for i in [0, 1, 3] {
        assert_eq!(entries[i]["response"]["status"], "200");
        assert_eq!(entries[i]["resource"]["id"], "o1");
        assert_eq!(entries[i]["response"]["etag"], "W/\"1\"");
    }
    assert_eq!(entries[2]["resource"]["type"], "searchset");
    assert_eq!(entries[4]["response"]["status"], "304");
    assert!(entries[4].get("resource").is_none());
}
