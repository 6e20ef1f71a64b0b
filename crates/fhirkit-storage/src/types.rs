//! Data types used by the storage traits.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use time::OffsetDateTime;

/// A FHIR resource as stored in the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    pub id: String,
    /// The version ID of this specific version.
    pub version_id: String,
    pub resource_type: String,
    /// The full resource content, with `id` and `meta.versionId` filled in.
    pub resource: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl StoredResource {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        version_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource: Value,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            version_id: version_id.into(),
            resource_type: resource_type.into(),
            resource,
            last_updated: now,
            created_at: now,
        }
    }

    /// Creates a new version of this resource with updated content.
    #[must_use]
    pub fn new_version(&self, version_id: impl Into<String>, resource: Value) -> Self {
        Self {
            id: self.id.clone(),
            version_id: version_id.into(),
            resource_type: self.resource_type.clone(),
            resource,
            last_updated: OffsetDateTime::now_utc(),
            created_at: self.created_at,
        }
    }

    /// Relative reference `Type/id`.
    #[must_use]
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Versioned location `Type/id/_history/vid`.
    #[must_use]
    pub fn versioned_location(&self) -> String {
        format!(
            "{}/{}/_history/{}",
            self.resource_type, self.id, self.version_id
        )
    }
}

/// Result of a search operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    pub entries: Vec<StoredResource>,
    /// Total count of matching resources, before paging.
    pub total: Option<u32>,
    /// Whether there are more results available beyond this page.
    pub has_more: bool,
}

impl SearchResult {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entries(entries: Vec<StoredResource>) -> Self {
        Self {
            entries,
            total: None,
            has_more: false,
        }
    }

    #[must_use]
    pub fn with_total(mut self, total: u32) -> Self {
        self.total = Some(total);
        self
    }

    #[must_use]
    pub fn with_has_more(mut self, has_more: bool) -> Self {
        self.has_more = has_more;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parameters for a search query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    /// Search parameters as key-value pairs.
    /// Multiple values for the same key are OR-ed.
    pub parameters: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl SearchParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(key.into())
            .or_default()
            .push(value.into());
        self
    }

    #[must_use]
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if this search has no filter parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_resource_serialization() {
        let resource = StoredResource::new(
            "123",
            "1",
            "Patient",
            serde_json::json!({"resourceType": "Patient", "id": "123"}),
        );

        let json = serde_json::to_string(&resource).expect("serialization failed");
        let deserialized: StoredResource =
            serde_json::from_str(&json).expect("deserialization failed");

        assert_eq!(resource.id, deserialized.id);
        assert_eq!(resource.version_id, deserialized.version_id);
        assert_eq!(resource.resource_type, deserialized.resource_type);
    }

    #[test]
    fn test_references() {
        let resource = StoredResource::new("a", "3", "Patient", serde_json::json!({}));
        assert_eq!(resource.reference(), "Patient/a");
        assert_eq!(resource.versioned_location(), "Patient/a/_history/3");

        let next = resource.new_version("4", serde_json::json!({"x": 1}));
        assert_eq!(next.created_at, resource.created_at);
        assert_eq!(next.version_id, "4");
    }

    #[test]
    fn test_search_params_builder() {
        let params = SearchParams::new()
            .with_param("name", "John")
            .with_param("name", "Jane")
            .with_param("birthdate", "1990-01-01")
            .with_count(10)
            .with_offset(20);

        assert_eq!(params.parameters.get("name").unwrap().len(), 2);
        assert_eq!(params.count, Some(10));
        assert_eq!(params.offset, Some(20));
        assert!(!params.is_empty());
    }

    #[test]
    fn test_search_result() {
        let result = SearchResult::with_entries(vec![StoredResource::new(
            "1",
            "1",
            "Patient",
            serde_json::json!({}),
        )])
        .with_total(5)
        .with_has_more(true);

        assert_eq!(result.len(), 1);
        assert_eq!(result.total, Some(5));
        assert!(result.has_more);
        assert!(SearchResult::empty().is_empty());
    }
}
