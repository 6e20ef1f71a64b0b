//! Route descriptors and the resolver seam that maps entry requests to operations.

use thiserror::Error;
use url::form_urlencoded;

use crate::verb::HttpVerb;

/// Method, path and normalized query of one entry request.
///
/// Two descriptors are equal when they address the same operation: the query is
/// decoded and sorted, leading and trailing slashes are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteDescriptor {
    pub method: HttpVerb,
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RouteDescriptor {
    pub fn new(method: HttpVerb, path: impl Into<String>, mut query: Vec<(String, String)>) -> Self {
        query.sort();
        Self {
            method,
            path: path.into(),
            query,
        }
    }

    /// Parses a relative request url such as `Patient?identifier=1`.
    pub fn parse(method: HttpVerb, url: &str) -> Self {
        let url = url.trim().trim_start_matches('/');
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let query = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        Self::new(method, path.trim_end_matches('/'), query)
    }

    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }

    pub fn has_query(&self) -> bool {
        !self.query.is_empty()
    }

    /// Query re-encoded in normalized order.
    pub fn query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in &self.query {
            serializer.append_pair(name, value);
        }
        serializer.finish()
    }
}

/// The operation a route maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    Search { resource_type: String },
    Read { resource_type: String, id: String },
    Create { resource_type: String },
    Update { resource_type: String, id: String },
    ConditionalUpdate { resource_type: String },
    Patch { resource_type: String, id: String },
    Delete { resource_type: String, id: String },
    ConditionalDelete { resource_type: String },
}

impl RouteKind {
    pub fn resource_type(&self) -> &str {
        match self {
            RouteKind::Search { resource_type }
            | RouteKind::Read { resource_type, .. }
            | RouteKind::Create { resource_type }
            | RouteKind::Update { resource_type, .. }
            | RouteKind::ConditionalUpdate { resource_type }
            | RouteKind::Patch { resource_type, .. }
            | RouteKind::Delete { resource_type, .. }
            | RouteKind::ConditionalDelete { resource_type } => resource_type,
        }
    }

    /// Whether executing the route can change stored data.
    pub fn is_write(&self) -> bool {
        !matches!(self, RouteKind::Search { .. } | RouteKind::Read { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub descriptor: RouteDescriptor,
    pub kind: RouteKind,
}

impl ResolvedRoute {
    pub fn method(&self) -> HttpVerb {
        self.descriptor.method
    }
}

/// No route matches the entry's method and url.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The route for \"/{url}\" was not found.")]
pub struct RouteNotFound {
    pub method: HttpVerb,
    pub url: String,
}

impl RouteNotFound {
    pub fn new(method: HttpVerb, url: &str) -> Self {
        Self {
            method,
            url: url.trim().trim_start_matches('/').to_string(),
        }
    }
}

/// Maps an entry request to an operation.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, method: HttpVerb, url: &str) -> Result<ResolvedRoute, RouteNotFound>;
}
