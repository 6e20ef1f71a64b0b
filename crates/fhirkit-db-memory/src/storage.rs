use fhirkit_storage::{SearchParams, SearchResult, StorageError, StoredResource};
use papaya::HashMap as PapayaHashMap;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, PoisonError};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::query::QueryFilter;

pub type StorageKey = String; // Format: "ResourceType/id"

pub(crate) fn make_storage_key(resource_type: &str, id: &str) -> StorageKey {
    format!("{resource_type}/{id}")
}

/// Page size applied when a search does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// In-memory FHIR storage backend using papaya lock-free HashMap.
///
/// Reads are lock-free. Writes pass through a short critical section so that
/// existence and version checks are atomic with the write they guard.
/// Cloning is cheap and shares the underlying map.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    pub(crate) data: Arc<PapayaHashMap<StorageKey, StoredResource>>,
    write_gate: Arc<Mutex<()>>,
}

/// The value a key held before a write, kept so the write can be undone.
#[derive(Debug, Clone)]
pub(crate) struct Undo {
    pub key: StorageKey,
    pub previous: Option<StoredResource>,
}

pub(crate) fn extract_resource_type(resource: &Value) -> Result<String, StorageError> {
    resource
        .get("resourceType")
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| StorageError::invalid_resource("Missing resourceType field"))
}

pub(crate) fn extract_id(resource: &Value) -> Option<String> {
    resource
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|id| !id.is_empty())
        .map(String::from)
}

fn next_version(previous: Option<&StoredResource>) -> String {
    previous
        .and_then(|p| p.version_id.parse::<u64>().ok())
        .map_or(1, |v| v + 1)
        .to_string()
}

/// Stamps `id` and `meta.versionId`/`meta.lastUpdated` onto a copy of the resource,
/// keeping any other `meta` elements the client sent.
fn stamp(resource: &Value, id: &str, version_id: &str, now: OffsetDateTime) -> Value {
    let mut stamped = resource.clone();
    if let Some(obj) = stamped.as_object_mut() {
        obj.insert("id".to_string(), Value::String(id.to_string()));
        let mut meta = obj
            .remove("meta")
            .and_then(|m| match m {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .unwrap_or_else(Map::new);
        meta.insert(
            "versionId".to_string(),
            Value::String(version_id.to_string()),
        );
        meta.insert(
            "lastUpdated".to_string(),
            Value::String(now.format(&Rfc3339).unwrap_or_default()),
        );
        obj.insert("meta".to_string(), Value::Object(meta));
    }
    stamped
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            data: Arc::new(PapayaHashMap::new()),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Number of stored resources.
    pub fn count(&self) -> usize {
        self.data.pin().len()
    }

    pub fn count_by_type(&self, resource_type: &str) -> usize {
        let prefix = format!("{resource_type}/");
        self.data
            .pin()
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .count()
    }

    pub(crate) fn get(&self, resource_type: &str, id: &str) -> Option<StoredResource> {
        let key = make_storage_key(resource_type, id);
        self.data.pin().get(&key).cloned()
    }

    pub(crate) fn insert_new(
        &self,
        resource: &Value,
    ) -> Result<(StoredResource, Undo), StorageError> {
        let resource_type = extract_resource_type(resource)?;
        let id = extract_id(resource).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = make_storage_key(&resource_type, &id);

        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = self.data.pin();
        if guard.get(&key).is_some() {
            return Err(StorageError::already_exists(&resource_type, &id));
        }

        let version_id = next_version(None);
        let now = OffsetDateTime::now_utc();
        let stored = StoredResource {
            id: id.clone(),
            version_id: version_id.clone(),
            resource_type,
            resource: stamp(resource, &id, &version_id, now),
            last_updated: now,
            created_at: now,
        };
        guard.insert(key.clone(), stored.clone());

        Ok((stored, Undo { key, previous: None }))
    }

    pub(crate) fn replace(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<(StoredResource, Undo), StorageError> {
        let resource_type = extract_resource_type(resource)?;
        let id = extract_id(resource)
            .ok_or_else(|| StorageError::invalid_resource("Missing id field for update"))?;
        let key = make_storage_key(&resource_type, &id);

        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = self.data.pin();
        let existing = guard.get(&key).cloned();

        match (&existing, if_match) {
            (Some(current), Some(expected)) if current.version_id != expected => {
                return Err(StorageError::version_conflict(expected, &current.version_id));
            }
            (None, Some(expected)) => {
                return Err(StorageError::version_conflict(expected, "none"));
            }
            (None, None) => return Err(StorageError::not_found(&resource_type, &id)),
            _ => {}
        }

        let version_id = next_version(existing.as_ref());
        let now = OffsetDateTime::now_utc();
        let stamped = stamp(resource, &id, &version_id, now);
        let stored = match &existing {
            Some(current) => current.new_version(version_id, stamped),
            None => StoredResource::new(&id, version_id, &resource_type, stamped),
        };
        guard.insert(key.clone(), stored.clone());

        Ok((
            stored,
            Undo {
                key,
                previous: existing,
            },
        ))
    }

    /// Removes a resource, returning what was there. Absent keys are a no-op.
    pub(crate) fn remove(&self, resource_type: &str, id: &str) -> Option<Undo> {
        let key = make_storage_key(resource_type, id);
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = self.data.pin().remove(&key).cloned()?;
        Some(Undo {
            key,
            previous: Some(removed),
        })
    }

    /// Puts a key back to the value it had before a write.
    pub(crate) fn restore(&self, undo: Undo) {
        let _gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let guard = self.data.pin();
        match undo.previous {
            Some(previous) => {
                guard.insert(undo.key, previous);
            }
            None => {
                guard.remove(&undo.key);
            }
        }
    }

    /// Filters, orders by id and pages the resources of one type.
    pub(crate) fn query(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        let filters = QueryFilter::from_params(params);
        let prefix = format!("{resource_type}/");

        let mut matches: Vec<StoredResource> = {
            let guard = self.data.pin();
            guard
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(_, v)| v)
                .filter(|stored| filters.iter().all(|f| f.matches(&stored.resource)))
                .cloned()
                .collect()
        };
        matches.sort_by(|a, b| a.id.cmp(&b.id));

        let total = u32::try_from(matches.len())
            .map_err(|_| StorageError::internal("search result too large"))?;
        let offset = params.offset.unwrap_or(0) as usize;
        let count = params.count.unwrap_or(DEFAULT_PAGE_SIZE) as usize;

        let page: Vec<StoredResource> = matches.into_iter().skip(offset).take(count).collect();
        let has_more = offset + page.len() < total as usize;

        Ok(SearchResult::with_entries(page)
            .with_total(total)
            .with_has_more(has_more))
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient(id: &str) -> Value {
        json!({"resourceType": "Patient", "id": id, "gender": "male"})
    }

    #[test]
    fn test_make_storage_key() {
        assert_eq!(make_storage_key("Patient", "123"), "Patient/123");
        assert_eq!(
            make_storage_key("Practitioner", "id with spaces"),
            "Practitioner/id with spaces"
        );
    }

    #[test]
    fn test_insert_stamps_id_and_meta() {
        let storage = InMemoryStorage::new();
        let (stored, undo) = storage
            .insert_new(&json!({"resourceType": "Patient", "meta": {"tag": [{"code": "t"}]}}))
            .unwrap();

        assert!(!stored.id.is_empty());
        assert_eq!(stored.version_id, "1");
        assert_eq!(stored.resource["id"], stored.id.as_str());
        assert_eq!(stored.resource["meta"]["versionId"], "1");
        assert_eq!(stored.resource["meta"]["tag"][0]["code"], "t");
        assert!(undo.previous.is_none());
    }

    #[test]
    fn test_insert_conflict() {
        let storage = InMemoryStorage::new();
        storage.insert_new(&patient("a")).unwrap();
        let err = storage.insert_new(&patient("a")).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn test_replace_increments_version_per_resource() {
        let storage = InMemoryStorage::new();
        storage.insert_new(&patient("a")).unwrap();
        storage.insert_new(&patient("b")).unwrap();

        let (stored, undo) = storage.replace(&patient("a"), Some("1")).unwrap();
        assert_eq!(stored.version_id, "2");
        assert_eq!(undo.previous.unwrap().version_id, "1");
        assert_eq!(storage.get("Patient", "b").unwrap().version_id, "1");
    }

    #[test]
    fn test_replace_preconditions() {
        let storage = InMemoryStorage::new();
        assert!(storage.replace(&patient("a"), None).unwrap_err().is_not_found());
        assert!(
            storage
                .replace(&patient("a"), Some("1"))
                .unwrap_err()
                .is_version_conflict()
        );

        storage.insert_new(&patient("a")).unwrap();
        assert!(
            storage
                .replace(&patient("a"), Some("7"))
                .unwrap_err()
                .is_version_conflict()
        );
    }

    #[test]
    fn test_remove_and_restore() {
        let storage = InMemoryStorage::new();
        storage.insert_new(&patient("a")).unwrap();

        let undo = storage.remove("Patient", "a").unwrap();
        assert!(storage.get("Patient", "a").is_none());
        assert!(storage.remove("Patient", "a").is_none());

        storage.restore(undo);
        assert_eq!(storage.get("Patient", "a").unwrap().version_id, "1");
    }

    #[test]
    fn test_query_pages_in_id_order() {
        let storage = InMemoryStorage::new();
        for id in ["c", "a", "b", "d"] {
            storage.insert_new(&patient(id)).unwrap();
        }
        storage
            .insert_new(&json!({"resourceType": "Observation", "id": "a"}))
            .unwrap();

        let page = storage
            .query("Patient", &SearchParams::new().with_count(2).with_offset(1))
            .unwrap();
        let ids: Vec<&str> = page.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(page.total, Some(4));
        assert!(page.has_more);

        assert_eq!(storage.count(), 5);
        assert_eq!(storage.count_by_type("Patient"), 4);
    }
}
