//! JSON Patch (RFC 6902) for PATCH entries.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use fhirkit_api::ApiError;
use json_patch::{Patch, PatchOperation, patch};
use serde_json::Value;

/// Extracts the patch document from an entry body.
///
/// A bundle carries a JSON Patch either as a bare array or wrapped in a
/// `Binary` resource whose `data` is the base64-encoded document.
pub fn patch_document(body: &Value) -> Result<Patch, ApiError> {
    let document = match body {
        Value::Array(_) => body.clone(),
        Value::Object(map) if map.get("resourceType").and_then(Value::as_str) == Some("Binary") => {
            let data = map
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| ApiError::bad_request("Binary patch has no data"))?;
            let bytes = STANDARD
                .decode(data)
                .map_err(|e| ApiError::bad_request(format!("Binary patch data is not base64: {e}")))?;
            serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::bad_request(format!("Invalid JSON Patch document: {e}")))?
        }
        _ => {
            return Err(ApiError::bad_request(
                "PATCH body must be a JSON Patch array or a Binary resource",
            ));
        }
    };
    serde_json::from_value(document)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON Patch document: {e}")))
}

/// Applies `operations` to a copy of `resource`.
pub fn apply_json_patch(resource: &Value, operations: &Patch) -> Result<Value, ApiError> {
    validate_json_patch_operations(&operations.0)?;

    let mut patched = resource.clone();
    patch(&mut patched, operations)
        .map_err(|e| ApiError::unprocessable_entity(format!("Patch operation failed: {e}")))?;
    Ok(patched)
}

/// Rejects operations that touch `resourceType` or `id`.
fn validate_json_patch_operations(operations: &[PatchOperation]) -> Result<(), ApiError> {
    for op in operations {
        let path = json_patch_operation_path(op);
        for protected in ["/resourceType", "/id"] {
            if path == protected || path.starts_with(&format!("{protected}/")) {
                return Err(ApiError::bad_request(format!(
                    "Cannot modify {} with patch",
                    &protected[1..]
                )));
            }
        }
    }
    Ok(())
}

fn json_patch_operation_path(op: &PatchOperation) -> &str {
    match op {
        PatchOperation::Add(add_op) => add_op.path.as_str(),
        PatchOperation::Remove(remove_op) => remove_op.path.as_str(),
        PatchOperation::Replace(replace_op) => replace_op.path.as_str(),
        PatchOperation::Move(move_op) => move_op.path.as_str(),
        PatchOperation::Copy(copy_op) => copy_op.path.as_str(),
        PatchOperation::Test(test_op) => test_op.path.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient() -> Value {
        json!({"resourceType": "Patient", "id": "p1", "active": false})
    }

    #[test]
    fn applies_bare_array_patch() {
        let ops = patch_document(&json!([
            {"op": "replace", "path": "/active", "value": true},
            {"op": "add", "path": "/gender", "value": "female"}
        ]))
        .unwrap();
        let patched = apply_json_patch(&patient(), &ops).unwrap();
        assert_eq!(patched["active"], true);
        assert_eq!(patched["gender"], "female");
    }

    #[test]
    fn applies_binary_wrapped_patch() {
        let doc = r#"[{"op": "remove", "path": "/active"}]"#;
        let binary = json!({
            "resourceType": "Binary",
            "contentType": "application/json-patch+json",
            "data": STANDARD.encode(doc)
        });
        let patched = apply_json_patch(&patient(), &patch_document(&binary).unwrap()).unwrap();
        assert!(patched.get("active").is_none());
    }

    #[test]
    fn rejects_protected_paths() {
        for path in ["/id", "/resourceType"] {
            let ops = patch_document(&json!([{"op": "replace", "path": path, "value": "x"}])).unwrap();
            let err = apply_json_patch(&patient(), &ops).unwrap_err();
            assert_eq!(err.status_code().as_u16(), 400);
        }
    }

    #[test]
    fn rejects_other_bodies_and_failed_tests() {
        assert!(patch_document(&json!({"resourceType": "Patient"})).is_err());
        let ops = patch_document(&json!([{"op": "test", "path": "/active", "value": true}])).unwrap();
        assert_eq!(
            apply_json_patch(&patient(), &ops).unwrap_err().status_code().as_u16(),
            422
        );
    }
}
