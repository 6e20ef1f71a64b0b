//! Route table for bundle entries.
//!
//! Maps `(method, url)` to the interaction the executor runs. Operations
//! (`$lookup`), system paths (`_history`, `_search`) and resource types the
//! server was not configured for have no route.

use std::collections::{HashMap, HashSet};

use fhirkit_bundle::{
    HttpVerb, ResolvedRoute, RouteDescriptor, RouteKind, RouteNotFound, RouteResolver,
};

use crate::config::RoutingConfig;

/// Paging parameters every bundle search may carry.
const PAGING_PARAMS: [&str; 3] = ["_count", "_offset", "ct"];

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    resource_types: HashSet<String>,
    /// Keyed by lowercased resource type.
    search_parameters: HashMap<String, HashSet<String>>,
}

impl RouteTable {
    pub fn new<I, S>(resource_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            resource_types: resource_types.into_iter().map(Into::into).collect(),
            search_parameters: HashMap::new(),
        }
    }

    /// Lets bundle searches on `resource_type` use `params`.
    pub fn with_search_parameters<I, S>(mut self, resource_type: &str, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_parameters
            .entry(resource_type.to_ascii_lowercase())
            .or_default()
            .extend(params.into_iter().map(Into::into));
        self
    }

    pub fn from_config(cfg: &RoutingConfig) -> Self {
        cfg.search_parameters.iter().fold(
            Self::new(cfg.resource_types.iter().cloned()),
            |table, (resource_type, params)| {
                table.with_search_parameters(resource_type, params.iter().cloned())
            },
        )
    }

    fn knows(&self, resource_type: &str) -> bool {
        self.resource_types.contains(resource_type)
    }

    fn search_routable(&self, resource_type: &str, query: &[(String, String)]) -> bool {
        let allowed = self
            .search_parameters
            .get(&resource_type.to_ascii_lowercase());
        query.iter().all(|(name, _)| {
            let base = name.split(':').next().unwrap_or(name);
            PAGING_PARAMS.contains(&base) || allowed.is_some_and(|set| set.contains(base))
        })
    }
}

impl RouteResolver for RouteTable {
    fn resolve(&self, method: HttpVerb, url: &str) -> Result<ResolvedRoute, RouteNotFound> {
        let not_found = || RouteNotFound::new(method, url);
        let descriptor = RouteDescriptor::parse(method, url);
        let segments = descriptor.segments();

        if segments
            .iter()
            .any(|s| s.starts_with('$') || s.starts_with('_'))
        {
            return Err(not_found());
        }
        let Some(resource_type) = segments.first().copied().filter(|t| self.knows(t)) else {
            return Err(not_found());
        };
        let resource_type = resource_type.to_string();
        let id = segments.get(1).map(|s| s.to_string());
        let conditional = descriptor.has_query();

        let kind = match (method, segments.len(), id) {
            (HttpVerb::Get | HttpVerb::Head, 1, _) => {
                if !self.search_routable(&resource_type, &descriptor.query) {
                    return Err(not_found());
                }
                RouteKind::Search { resource_type }
            }
            (HttpVerb::Get | HttpVerb::Head, 2, Some(id)) => RouteKind::Read { resource_type, id },
            (HttpVerb::Post, 1, _) if !conditional => RouteKind::Create { resource_type },
            (HttpVerb::Put, 1, _) if conditional => RouteKind::ConditionalUpdate { resource_type },
            (HttpVerb::Put, 2, Some(id)) => RouteKind::Update { resource_type, id },
            (HttpVerb::Patch, 2, Some(id)) => RouteKind::Patch { resource_type, id },
            (HttpVerb::Delete, 1, _) if conditional => {
                RouteKind::ConditionalDelete { resource_type }
            }
            (HttpVerb::Delete, 2, Some(id)) => RouteKind::Delete { resource_type, id },
            _ => return Err(not_found()),
        };

        Ok(ResolvedRoute { descriptor, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::new(["Patient", "Observation", "ValueSet"])
            .with_search_parameters("Observation", ["code", "subject"])
    }

    #[test]
    fn resolves_crud_interactions() {
        let t = table();
        let kind = |m, u| t.resolve(m, u).unwrap().kind;
        assert_eq!(
            kind(HttpVerb::Post, "Patient"),
            RouteKind::Create {
                resource_type: "Patient".into()
            }
        );
        assert_eq!(
            kind(HttpVerb::Put, "/Patient/123/"),
            RouteKind::Update {
                resource_type: "Patient".into(),
                id: "123".into()
            }
        );
        assert_eq!(
            kind(HttpVerb::Put, "Patient?identifier=a|1"),
            RouteKind::ConditionalUpdate {
                resource_type: "Patient".into()
            }
        );
        assert_eq!(
            kind(HttpVerb::Delete, "Patient/9"),
            RouteKind::Delete {
                resource_type: "Patient".into(),
                id: "9".into()
            }
        );
        assert_eq!(
            kind(HttpVerb::Patch, "Patient/9"),
            RouteKind::Patch {
                resource_type: "Patient".into(),
                id: "9".into()
            }
        );
        assert_eq!(
            kind(HttpVerb::Head, "Patient/9"),
            RouteKind::Read {
                resource_type: "Patient".into(),
                id: "9".into()
            }
        );
    }

    #[test]
    fn searches_need_configured_parameters() {
        let t = table();
        assert!(t.resolve(HttpVerb::Get, "Observation").is_ok());
        assert!(t.resolve(HttpVerb::Get, "Observation?code:text=x&_count=5").is_ok());
        assert!(t.resolve(HttpVerb::Get, "observation?code=x").is_err());

        let err = t.resolve(HttpVerb::Get, "Patient?identifier=123456").unwrap_err();
        assert_eq!(
            err.to_string(),
            "The route for \"/Patient?identifier=123456\" was not found."
        );
    }

    #[test]
    fn operations_system_paths_and_unknown_types_have_no_route() {
        let t = table();
        for (method, url) in [
            (HttpVerb::Get, "ValueSet/$lookup"),
            (HttpVerb::Get, "Patient/1/_history"),
            (HttpVerb::Post, "Patient/_search"),
            (HttpVerb::Get, "Spaceship/1"),
            (HttpVerb::Post, "Patient?identifier=1"),
            (HttpVerb::Delete, "Patient"),
            (HttpVerb::Patch, "Patient"),
            (HttpVerb::Get, "Patient/1/extra"),
        ] {
            assert!(t.resolve(method, url).is_err(), "{method} {url}");
        }
    }

    #[test]
    fn builds_from_config() {
        let mut cfg = RoutingConfig::default();
        cfg.search_parameters
            .insert("patient".into(), vec!["identifier".into()]);
        let t = RouteTable::from_config(&cfg);
        assert!(t.resolve(HttpVerb::Get, "Patient?identifier=1").is_ok());
        assert!(t.resolve(HttpVerb::Get, "Patient?name=x").is_err());
    }
}
