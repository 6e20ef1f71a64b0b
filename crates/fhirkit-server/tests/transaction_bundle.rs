use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use fhirkit_db_memory::InMemoryStorage;
use fhirkit_server::{AppConfig, AppState, PolicyKind, build_app};
use fhirkit_storage::FhirStorage;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn seeded_app(policy: PolicyKind) -> (Router, InMemoryStorage) {
    let mut cfg = AppConfig::default();
    cfg.auth.policy = policy;
    let storage = InMemoryStorage::new();
    storage
        .create(&json!({"resourceType": "Patient", "id": "keep", "gender": "male"}))
        .await
        .unwrap();
    let state = AppState::new(&cfg, Arc::new(storage.clone()));
    (build_app(state), storage)
}

async fn post_bundle(app: Router, bundle: &Value) -> (StatusCode, Value) {
    let res = app
        .oneshot(
            Request::post("/fhir")
                .header(header::CONTENT_TYPE, "application/fhir+json")
                .body(Body::from(bundle.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn transaction_commits_and_rewrites_placeholders() {
    let (app, storage) = seeded_app(PolicyKind::AllowAll).await;
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "fullUrl": "urn:uuid:61ebe359-bfdc-4613-8bf2-c5e300945f0a",
                "request": {"method": "POST", "url": "Patient"},
                "resource": {"resourceType": "Patient", "name": [{"family": "Nakamura"}]}
            },
            {
                "request": {"method": "PUT", "url": "Observation/bp"},
                "resource": {
                    "resourceType": "Observation",
                    "id": "bp",
                    "status": "final",
                    "subject": {"reference": "urn:uuid:61ebe359-bfdc-4613-8bf2-c5e300945f0a"}
                }
            },
            {"request": {"method": "DELETE", "url": "Patient/keep"}}
        ]
    });

    let (status, response) = post_bundle(app, &bundle).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["type"], "transaction-response");
    let statuses: Vec<&str> = response["entry"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["response"]["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["201", "201", "204"]);

    let location = response["entry"][0]["response"]["location"].as_str().unwrap();
    let patient_ref = location.split("/_history").next().unwrap();
    let observation = storage.read("Observation", "bp").await.unwrap().unwrap();
    assert_eq!(observation.resource["subject"]["reference"], patient_ref);
    assert!(storage.read("Patient", "keep").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_entry_rolls_back_the_whole_transaction() {
    let (app, storage) = seeded_app(PolicyKind::AllowAll).await;
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "request": {"method": "PUT", "url": "Patient/new"},
                "resource": {"resourceType": "Patient", "id": "new"}
            },
            {
                "request": {"method": "PUT", "url": "Patient/keep"},
                "resource": {"resourceType": "Patient", "id": "keep", "gender": "female"}
            },
            {"request": {"method": "DELETE", "url": "Patient/keep"}},
            {"request": {"method": "GET", "url": "Patient/absent"}}
        ]
    });

    let (status, outcome) = post_bundle(app, &bundle).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(outcome["resourceType"], "OperationOutcome");
    assert_eq!(
        outcome["issue"][0]["diagnostics"],
        "Resource type 'Patient' with id 'absent' couldn't be found."
    );

    assert!(storage.read("Patient", "new").await.unwrap().is_none());
    let keep = storage.read("Patient", "keep").await.unwrap().unwrap();
    assert_eq!(keep.resource["gender"], "male");
    assert_eq!(keep.version_id, "1");
    assert_eq!(storage.count(), 1);
}

#[tokio::test]
async fn forbidden_entry_aborts_transaction_with_its_status() {
    let (app, storage) = seeded_app(PolicyKind::ReadOnly).await;
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {"request": {"method": "GET", "url": "Patient/keep"}},
            {
                "request": {"method": "POST", "url": "Patient"},
                "resource": {"resourceType": "Patient"}
            }
        ]
    });

    let (status, outcome) = post_bundle(app, &bundle).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(outcome["issue"][0]["code"], "forbidden");
    assert_eq!(outcome["issue"][0]["diagnostics"], "Authorization failed.");
    assert_eq!(storage.count(), 1);
}

#[tokio::test]
async fn forward_reference_fails_transaction_without_effects() {
    let (app, storage) = seeded_app(PolicyKind::AllowAll).await;
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {
                "request": {"method": "POST", "url": "Observation"},
                "resource": {
                    "resourceType": "Observation",
                    "status": "final",
                    "subject": {"reference": "urn:uuid:9d7f1f7c-2c1b-4d3e-9a8b-7c6d5e4f3a2b"}
                }
            },
            {
                "fullUrl": "urn:uuid:9d7f1f7c-2c1b-4d3e-9a8b-7c6d5e4f3a2b",
                "request": {"method": "PUT", "url": "Patient/later"},
                "resource": {"resourceType": "Patient", "id": "later"}
            }
        ]
    });

    let (status, outcome) = post_bundle(app, &bundle).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(outcome["issue"][0]["code"], "invalid");
    assert!(storage.read("Patient", "later").await.unwrap().is_none());
    assert_eq!(storage.count(), 1);
}

#[tokio::test]
async fn duplicate_placeholder_full_urls_are_rejected() {
    let (app, storage) = seeded_app(PolicyKind::AllowAll).await;
    let entry = json!({
        "fullUrl": "urn:uuid:11111111-2222-4333-8444-555555555555",
        "request": {"method": "POST", "url": "Patient"},
        "resource": {"resourceType": "Patient"}
    });
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [entry.clone(), entry]
    });

    let (status, _) = post_bundle(app, &bundle).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(storage.count(), 1);
}
