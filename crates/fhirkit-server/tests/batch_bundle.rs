use std::sync::Arc;

use assert_json_diff::assert_json_include;
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

fn app(policy: PolicyKind) -> (Router, InMemoryStorage) {
    let mut cfg = AppConfig::default();
    cfg.auth.policy = policy;
    let storage = InMemoryStorage::new();
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

fn statuses(bundle: &Value) -> Vec<String> {
    bundle["entry"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["response"]["status"].as_str().unwrap().to_string())
        .collect()
}

/// Ten entries covering every verb, conditional headers and unroutable urls.
fn default_batch() -> Value {
    json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {
                "resource": {"resourceType": "Patient", "name": [{"family": "Chalmers", "given": ["Peter"]}]},
                "request": {"method": "POST", "url": "Patient"}
            },
            {
                "resource": {
                    "resourceType": "Patient",
                    "identifier": [{"system": "http://example.org/fhir/ids", "value": "234234"}]
                },
                "request": {
                    "method": "POST",
                    "url": "Patient",
                    "ifNoneExist": "identifier=http://example.org/fhir/ids|234234"
                }
            },
            {
                "resource": {"resourceType": "Patient", "id": "123", "active": true},
                "request": {"method": "PUT", "url": "Patient/123"}
            },
            {
                "resource": {
                    "resourceType": "Patient",
                    "identifier": [{"system": "http://example.org/fhir/ids", "value": "456456"}]
                },
                "request": {"method": "PUT", "url": "Patient?identifier=http://example.org/fhir/ids|456456"}
            },
            {
                "resource": {"resourceType": "Patient", "id": "123a", "active": true},
                "request": {"method": "PUT", "url": "Patient/123a", "ifMatch": "W/\"2\""}
            },
            {"request": {"method": "DELETE", "url": "Patient/234"}},
            {"request": {"method": "GET", "url": "Patient?identifier=123456"}},
            {"request": {"method": "GET", "url": "ValueSet/$lookup"}},
            {"request": {"method": "GET", "url": "Observation"}},
            {"request": {"method": "GET", "url": "Patient/12334"}}
        ]
    })
}

fn outcome(entry: &Value) -> &Value {
    &entry["response"]["outcome"]
}

#[tokio::test]
async fn default_batch_returns_one_response_per_entry_in_order() {
    let (app, storage) = app(PolicyKind::AllowAll);
    let (status, bundle) = post_bundle(app, &default_batch()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "batch-response");

    let statuses = statuses(&bundle);
    assert_eq!(statuses.len(), 10);
    assert_eq!(statuses[0], "201");
    assert!(["200", "201"].contains(&statuses[1].as_str()));
    assert!(["200", "201"].contains(&statuses[2].as_str()));
    assert!(["200", "201"].contains(&statuses[3].as_str()));
    assert!(["412", "404"].contains(&statuses[4].as_str()));
    assert_eq!(statuses[5], "204");
    assert_eq!(statuses[6], "404");
    assert_eq!(statuses[7], "404");
    assert_eq!(statuses[8], "200");
    assert_eq!(statuses[9], "404");

    let entries = bundle["entry"].as_array().unwrap();
    assert_json_include!(
        actual: outcome(&entries[6]),
        expected: json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": "not-found",
                "diagnostics": "The route for \"/Patient?identifier=123456\" was not found."
            }]
        })
    );
    assert_eq!(
        outcome(&entries[7])["issue"][0]["diagnostics"],
        "The route for \"/ValueSet/$lookup\" was not found."
    );
    assert_eq!(
        outcome(&entries[9])["issue"][0]["diagnostics"],
        "Resource type 'Patient' with id '12334' couldn't be found."
    );
    assert!(entries[8]["response"].get("outcome").is_none());
    assert_eq!(entries[8]["resource"]["type"], "searchset");

    // Creates carry a versioned location
    let location = entries[0]["response"]["location"].as_str().unwrap();
    assert!(location.starts_with("Patient/") && location.ends_with("/_history/1"));

    // Entry 4's failed precondition left nothing behind
    assert!(storage.read("Patient", "123a").await.unwrap().is_none());
    assert!(storage.read("Patient", "123").await.unwrap().is_some());
    assert_eq!(storage.count(), 4);
}

#[tokio::test]
async fn read_only_user_gets_forbidden_writes_and_successful_reads() {
    let (app, storage) = app(PolicyKind::ReadOnly);
    let (status, bundle) = post_bundle(app, &default_batch()).await;

    assert_eq!(status, StatusCode::OK);
    let entries = bundle["entry"].as_array().unwrap();
    assert_eq!(entries.len(), 10);

    for entry in &entries[0..6] {
        assert_eq!(entry["response"]["status"], "403");
        assert_eq!(
            outcome(entry),
            &json!({
                "resourceType": "OperationOutcome",
                "issue": [{"severity": "error", "code": "forbidden", "diagnostics": "Authorization failed."}]
            })
        );
    }
    assert_eq!(entries[6]["response"]["status"], "404");
    assert_eq!(entries[7]["response"]["status"], "404");
    assert_eq!(entries[8]["response"]["status"], "200");
    assert!(entries[8]["response"].get("outcome").is_none());
    assert_eq!(entries[9]["response"]["status"], "404");

    for entry in entries.iter().filter(|e| e["response"].get("outcome").is_some()) {
        let issues = outcome(entry)["issue"].as_array().unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0]["severity"], "error");
    }
    assert_eq!(storage.count(), 0);
}

#[tokio::test]
async fn later_bucket_may_reference_earlier_post() {
    let (app, storage) = app(PolicyKind::AllowAll);
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {
                "request": {"method": "PUT", "url": "Observation/o1"},
                "resource": {
                    "resourceType": "Observation",
                    "id": "o1",
                    "status": "final",
                    "subject": {"reference": "urn:uuid:4f3c2f5e-9a0b-4a5e-8f3c-1d2e3f4a5b6c"}
                }
            },
            {
                "fullUrl": "urn:uuid:4f3c2f5e-9a0b-4a5e-8f3c-1d2e3f4a5b6c",
                "request": {"method": "POST", "url": "Patient"},
                "resource": {"resourceType": "Patient", "active": true}
            }
        ]
    });
    let (status, response) = post_bundle(app, &bundle).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(statuses(&response), vec!["201", "201"]);

    let location = response["entry"][1]["response"]["location"].as_str().unwrap();
    let patient_ref = location.split("/_history").next().unwrap();
    let observation = storage.read("Observation", "o1").await.unwrap().unwrap();
    assert_eq!(observation.resource["subject"]["reference"], patient_ref);
}

#[tokio::test]
async fn reference_to_a_later_bucket_fails_only_that_entry() {
    let (app, storage) = app(PolicyKind::AllowAll);
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "batch",
        "entry": [
            {
                "request": {"method": "POST", "url": "Observation"},
                "resource": {
                    "resourceType": "Observation",
                    "status": "final",
                    "subject": {"reference": "urn:uuid:0c8a3c1e-1111-4222-8333-944455556666"}
                }
            },
            {
                "fullUrl": "urn:uuid:0c8a3c1e-1111-4222-8333-944455556666",
                "request": {"method": "PUT", "url": "Patient/p9"},
                "resource": {"resourceType": "Patient", "id": "p9"}
            }
        ]
    });
    let (status, response) = post_bundle(app, &bundle).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(statuses(&response), vec!["400", "201"]);
    assert_eq!(
        outcome(&response["entry"][0])["issue"][0]["code"],
        "invalid"
    );
    assert!(storage.read("Patient", "p9").await.unwrap().is_some());
    assert_eq!(storage.count(), 1);
}

#[tokio::test]
async fn non_bundle_body_is_bad_request() {
    let (app, _) = app(PolicyKind::AllowAll);
    let observation = json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"text": "heart rate"}
    });
    let (status, body) = post_bundle(app, &observation).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");
    assert_eq!(body["issue"][0]["code"], "invalid");
}

#[tokio::test]
async fn unsupported_bundle_type_is_bad_request() {
    let (app, _) = app(PolicyKind::AllowAll);
    let collection = json!({"resourceType": "Bundle", "type": "collection", "entry": []});
    let (status, body) = post_bundle(app, &collection).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["resourceType"], "OperationOutcome");
}
