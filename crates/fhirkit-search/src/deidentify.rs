//! Redaction of personally identifying data in search results.
//!
//! | Type    | Redacted elements |
//! |---------|-------------------|
//! | Patient | `name` (text, family, given, prefix, suffix, period), `telecom` (value, period), `birthDate`, `address` (text, line, city, district, postalCode, period) |
//! | Account | `identifier[].value` |
//!
//! Present strings become `""`, absent ones stay absent, every element of a
//! redacted list becomes `""` (length preserved) and `period` is dropped.
//! Everything else is left untouched, in its original order.

use serde_json::{Map, Value};
use thiserror::Error;

/// Resource types whose search results are redacted.
pub const REDACTED_RESOURCE_TYPES: [&str; 2] = ["Patient", "Account"];

/// Whether search results of this resource type must pass through [`Deidentifier`].
pub fn needs_redaction(resource_type: &str) -> bool {
    REDACTED_RESOURCE_TYPES.contains(&resource_type)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeidentifyError {
    /// The payload could not be redacted. Carries no resource data.
    #[error("Malformed {resource_type} resource: {reason}")]
    MalformedResource {
        resource_type: String,
        reason: String,
    },
}

impl DeidentifyError {
    fn malformed(resource_type: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResource {
            resource_type: resource_type.to_string(),
            reason: reason.into(),
        }
    }
}

/// Elements cleared inside one element of a redacted complex list.
struct ComplexRule {
    element: &'static str,
    scalars: &'static [&'static str],
    lists: &'static [&'static str],
}

const PATIENT_RULES: [ComplexRule; 3] = [
    ComplexRule {
        element: "name",
        scalars: &["text", "family"],
        lists: &["given", "prefix", "suffix"],
    },
    ComplexRule {
        element: "telecom",
        scalars: &["value"],
        lists: &[],
    },
    ComplexRule {
        element: "address",
        scalars: &["text", "city", "district", "postalCode"],
        lists: &["line"],
    },
];

const ACCOUNT_RULES: [ComplexRule; 1] = [ComplexRule {
    element: "identifier",
    scalars: &["value"],
    lists: &[],
}];

#[derive(Debug, Clone, Copy, Default)]
pub struct Deidentifier;

impl Deidentifier {
    pub fn new() -> Self {
        Self
    }

    /// Redacts a serialized resource of the given type.
    ///
    /// Types that need no redaction are still parsed and checked, then returned
    /// unchanged.
    pub fn redact(&self, resource_type: &str, serialized: &str) -> Result<String, DeidentifyError> {
        let mut value: Value = serde_json::from_str(serialized).map_err(|e| {
            DeidentifyError::malformed(
                resource_type,
                format!("invalid JSON at line {} column {}", e.line(), e.column()),
            )
        })?;
        self.redact_value(resource_type, &mut value)?;
        serde_json::to_string(&value)
            .map_err(|_| DeidentifyError::malformed(resource_type, "could not serialize"))
    }

    /// Redacts a parsed resource in place.
    ///
    /// On error the value may be partially redacted and must be discarded.
    pub fn redact_value(&self, resource_type: &str, value: &mut Value) -> Result<(), DeidentifyError> {
        let obj = value
            .as_object_mut()
            .ok_or_else(|| DeidentifyError::malformed(resource_type, "not a JSON object"))?;

        match obj.get("resourceType").and_then(Value::as_str) {
            Some(actual) if actual == resource_type => {}
            Some(actual) => {
                return Err(DeidentifyError::malformed(
                    resource_type,
                    format!("resourceType is '{actual}'"),
                ));
            }
            None => return Err(DeidentifyError::malformed(resource_type, "missing resourceType")),
        }

        match resource_type {
            "Patient" => {
                for rule in &PATIENT_RULES {
                    redact_complex_list(resource_type, obj, rule)?;
                }
                blank_scalar(resource_type, obj, "birthDate")?;
            }
            "Account" => {
                for rule in &ACCOUNT_RULES {
                    redact_complex_list(resource_type, obj, rule)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn redact_complex_list(
    resource_type: &str,
    obj: &mut Map<String, Value>,
    rule: &ComplexRule,
) -> Result<(), DeidentifyError> {
    let items = match obj.get_mut(rule.element) {
        None | Some(Value::Null) => return Ok(()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(DeidentifyError::malformed(
                resource_type,
                format!("'{}' is not a list", rule.element),
            ));
        }
    };

    for item in items.iter_mut() {
        let item = item.as_object_mut().ok_or_else(|| {
            DeidentifyError::malformed(
                resource_type,
                format!("'{}' contains a non-object element", rule.element),
            )
        })?;
        for scalar in rule.scalars {
            blank_scalar(resource_type, item, scalar)?;
        }
        for list in rule.lists {
            blank_list(resource_type, item, list)?;
        }
        item.shift_remove("period");
    }
    Ok(())
}

fn blank_scalar(
    resource_type: &str,
    obj: &mut Map<String, Value>,
    key: &str,
) -> Result<(), DeidentifyError> {
    match obj.get_mut(key) {
        None | Some(Value::Null) => Ok(()),
        Some(slot @ Value::String(_)) => {
            *slot = Value::String(String::new());
            Ok(())
        }
        Some(_) => Err(DeidentifyError::malformed(
            resource_type,
            format!("'{key}' is not a string"),
        )),
    }
}

fn blank_list(
    resource_type: &str,
    obj: &mut Map<String, Value>,
    key: &str,
) -> Result<(), DeidentifyError> {
    match obj.get_mut(key) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::Array(items)) => {
            for item in items.iter_mut() {
                *item = Value::String(String::new());
            }
            Ok(())
        }
        Some(_) => Err(DeidentifyError::malformed(
            resource_type,
            format!("'{key}' is not a list"),
        )),
    }
}
