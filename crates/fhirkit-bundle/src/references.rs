//! Bundle-local placeholder references (`urn:uuid:` / `urn:oid:`).
//!
//! Resolution happens in two passes. [`ReferenceResolver::plan`] runs before
//! anything executes: it finds which entries each entry refers to, rejects
//! references that can never resolve, and orders same-bucket dependencies into
//! waves. [`ReferenceResolver::substitute`] runs right before an entry is
//! dispatched and swaps every placeholder for the identity its target produced.

use std::collections::{BTreeMap, HashMap, VecDeque};

use fhirkit_api::IssueType;
use serde_json::Value;
use thiserror::Error;
use url::form_urlencoded;

use crate::dispatch::ResponseEnvelope;
use crate::verb::HttpVerb;

pub const PLACEHOLDER_PREFIXES: [&str; 2] = ["urn:uuid:", "urn:oid:"];

pub fn is_placeholder(value: &str) -> bool {
    PLACEHOLDER_PREFIXES.iter().any(|p| value.starts_with(p))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("Reference '{placeholder}' does not match the fullUrl of any entry in the bundle.")]
    Dangling { placeholder: String },
    #[error("Reference '{placeholder}' refers to the entry that contains it.")]
    SelfReference { placeholder: String },
    #[error("Reference '{placeholder}' refers to entry {target}, which executes after the referencing entry.")]
    Forward { placeholder: String, target: usize },
    #[error("Reference '{placeholder}' is part of a reference cycle.")]
    Cycle { placeholder: String },
    #[error("Reference '{placeholder}' could not be resolved because entry {target} failed.")]
    TargetFailed { placeholder: String, target: usize },
    #[error("Reference '{placeholder}' could not be resolved because entry {target} produced no resource identity.")]
    Unresolvable { placeholder: String, target: usize },
}

impl ReferenceError {
    pub fn placeholder(&self) -> &str {
        match self {
            ReferenceError::Dangling { placeholder }
            | ReferenceError::SelfReference { placeholder }
            | ReferenceError::Forward { placeholder, .. }
            | ReferenceError::Cycle { placeholder }
            | ReferenceError::TargetFailed { placeholder, .. }
            | ReferenceError::Unresolvable { placeholder, .. } => placeholder,
        }
    }

    /// Malformed bundles are 400 `invalid`; targets that are missing or failed are 404 `not-found`.
    pub fn status(&self) -> u16 {
        match self {
            ReferenceError::SelfReference { .. }
            | ReferenceError::Forward { .. }
            | ReferenceError::Cycle { .. } => 400,
            ReferenceError::Dangling { .. }
            | ReferenceError::TargetFailed { .. }
            | ReferenceError::Unresolvable { .. } => 404,
        }
    }

    pub fn issue_type(&self) -> IssueType {
        if self.status() == 400 {
            IssueType::Invalid
        } else {
            IssueType::NotFound
        }
    }
}

impl From<&ReferenceError> for ResponseEnvelope {
    fn from(err: &ReferenceError) -> Self {
        ResponseEnvelope::error(err.status(), err.issue_type(), err.to_string())
    }
}

/// What [`ReferenceResolver::plan`] needs to know about one entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryRef<'a> {
    pub verb: HttpVerb,
    pub full_url: Option<&'a str>,
    pub url: &'a str,
    pub body: Option<&'a Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub placeholder: String,
    pub target: usize,
}

/// State of a placeholder target while the bundle executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Pending,
    /// Executed; the identity (`Type/id`) placeholders resolve to.
    Resolved(String),
    /// Executed successfully without yielding an identity.
    Unresolvable,
    Failed,
}

/// Placeholder dependencies of every entry in a bundle.
#[derive(Debug, Clone, Default)]
pub struct ReferencePlan {
    dependencies: Vec<Vec<Dependency>>,
    failures: Vec<Option<ReferenceError>>,
    waves: Vec<usize>,
}

impl ReferencePlan {
    pub fn dependencies(&self, index: usize) -> &[Dependency] {
        self.dependencies.get(index).map_or(&[], Vec::as_slice)
    }

    /// The reason an entry can never resolve its references, if any.
    pub fn failure(&self, index: usize) -> Option<&ReferenceError> {
        self.failures.get(index).and_then(Option::as_ref)
    }

    /// Depth of the entry in its bucket's same-bucket dependency graph.
    pub fn wave(&self, index: usize) -> usize {
        self.waves.get(index).copied().unwrap_or(0)
    }

    /// Groups bucket entries into waves; each wave only depends on earlier ones.
    /// Entry order inside a wave follows `indices`.
    pub fn waves(&self, indices: &[usize]) -> Vec<Vec<usize>> {
        let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &index in indices {
            grouped.entry(self.wave(index)).or_default().push(index);
        }
        grouped.into_values().collect()
    }
}

pub struct ReferenceResolver;

impl ReferenceResolver {
    /// First pass: dependencies, reference errors and waves for every entry.
    pub fn plan(entries: &[EntryRef<'_>]) -> ReferencePlan {
        let mut by_full_url: HashMap<&str, usize> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            if let Some(full_url) = entry.full_url.filter(|u| is_placeholder(u)) {
                by_full_url.entry(full_url).or_insert(index);
            }
        }

        let mut dependencies = vec![Vec::new(); entries.len()];
        let mut failures: Vec<Option<ReferenceError>> = vec![None; entries.len()];

        for (index, entry) in entries.iter().enumerate() {
            match Self::entry_dependencies(index, entry, entries, &by_full_url) {
                Ok(deps) => dependencies[index] = deps,
                Err(err) => failures[index] = Some(err),
            }
        }

        let waves = assign_waves(entries, &dependencies, &mut failures);
        ReferencePlan {
            dependencies,
            failures,
            waves,
        }
    }

    fn entry_dependencies(
        index: usize,
        entry: &EntryRef<'_>,
        entries: &[EntryRef<'_>],
        by_full_url: &HashMap<&str, usize>,
    ) -> Result<Vec<Dependency>, ReferenceError> {
        // placeholder -> whether it appeared in a `reference` element or the url
        let mut found: BTreeMap<String, bool> = BTreeMap::new();
        if let Some(body) = entry.body {
            collect_body_placeholders(body, None, by_full_url, &mut found);
        }
        for token in url_tokens(entry.url) {
            if by_full_url.contains_key(token.as_str()) {
                found.insert(token, true);
            }
        }

        let mut deps = Vec::with_capacity(found.len());
        for (placeholder, explicit) in found {
            let Some(&target) = by_full_url.get(placeholder.as_str()) else {
                return Err(ReferenceError::Dangling { placeholder });
            };
            if target == index {
                // A resource may carry its own fullUrl as plain data (e.g. an identifier value).
                if explicit {
                    return Err(ReferenceError::SelfReference { placeholder });
                }
                continue;
            }
            if entries[target].verb.execution_rank() > entry.verb.execution_rank() {
                return Err(ReferenceError::Forward {
                    placeholder,
                    target,
                });
            }
            deps.push(Dependency {
                placeholder,
                target,
            });
        }
        Ok(deps)
    }

    /// Second pass: replaces every placeholder in `url` and `body` with its
    /// target's identity. Body strings, url path segments and decoded query
    /// values are replaced when equal to a placeholder.
    pub fn substitute(
        dependencies: &[Dependency],
        url: &str,
        body: Option<&Value>,
        resolutions: &[Resolution],
    ) -> Result<(String, Option<Value>), ReferenceError> {
        let mut mapping: HashMap<&str, &str> = HashMap::with_capacity(dependencies.len());
        for dep in dependencies {
            let placeholder = dep.placeholder.clone();
            let target = dep.target;
            match resolutions.get(target) {
                Some(Resolution::Resolved(identity)) => {
                    mapping.insert(dep.placeholder.as_str(), identity.as_str());
                }
                Some(Resolution::Failed) => {
                    return Err(ReferenceError::TargetFailed { placeholder, target });
                }
                Some(Resolution::Pending | Resolution::Unresolvable) | None => {
                    return Err(ReferenceError::Unresolvable { placeholder, target });
                }
            }
        }

        if mapping.is_empty() {
            return Ok((url.to_string(), body.cloned()));
        }

        let resolved_url = rewrite_url(url, &mapping);

        let resolved_body = body.map(|body| {
            let mut body = body.clone();
            rewrite_strings(&mut body, &mapping);
            body
        });

        Ok((resolved_url, resolved_body))
    }
}

fn collect_body_placeholders(
    value: &Value,
    key: Option<&str>,
    by_full_url: &HashMap<&str, usize>,
    found: &mut BTreeMap<String, bool>,
) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                collect_body_placeholders(v, Some(k), by_full_url, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_body_placeholders(item, key, by_full_url, found);
            }
        }
        Value::String(s) => {
            let is_reference = key == Some("reference") && is_placeholder(s);
            if is_reference || by_full_url.contains_key(s.as_str()) {
                let explicit = found.entry(s.clone()).or_insert(false);
                *explicit |= is_reference;
            }
        }
        _ => {}
    }
}

/// Path segments and decoded query values of an entry url.
fn url_tokens(url: &str) -> Vec<String> {
    let (path, query) = url.split_once('?').map_or((url, None), |(p, q)| (p, Some(q)));
    let mut tokens: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if let Some(query) = query {
        tokens.extend(form_urlencoded::parse(query.as_bytes()).map(|(_, v)| v.into_owned()));
    }
    tokens
}

/// Swaps whole path segments and query values found in `mapping`. Every
/// other part of the url is kept as written.
fn rewrite_url(url: &str, mapping: &HashMap<&str, &str>) -> String {
    let (path, query) = url.split_once('?').map_or((url, None), |(p, q)| (p, Some(q)));
    let path = path
        .split('/')
        .map(|segment| mapping.get(segment).copied().unwrap_or(segment))
        .collect::<Vec<_>>()
        .join("/");
    let Some(query) = query else {
        return path;
    };

    let pairs: Vec<String> = query
        .split('&')
        .map(|raw| {
            let decoded = form_urlencoded::parse(raw.as_bytes()).next();
            match (raw.split_once('='), decoded) {
                (Some((key, _)), Some((_, value))) => match mapping.get(value.as_ref()) {
                    Some(identity) => format!("{key}={identity}"),
                    None => raw.to_string(),
                },
                _ => raw.to_string(),
            }
        })
        .collect();
    format!("{path}?{}", pairs.join("&"))
}

fn rewrite_strings(value: &mut Value, mapping: &HashMap<&str, &str>) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                rewrite_strings(v, mapping);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_strings(item, mapping);
            }
        }
        Value::String(s) => {
            if let Some(identity) = mapping.get(s.as_str()) {
                *s = (*identity).to_string();
            }
        }
        _ => {}
    }
}

/// Longest-path depth of each entry among dependencies inside its own bucket.
/// Entries on a cycle are failed; entries depending on a failed entry keep
/// depth 0 and fail at substitution.
fn assign_waves(
    entries: &[EntryRef<'_>],
    dependencies: &[Vec<Dependency>],
    failures: &mut [Option<ReferenceError>],
) -> Vec<usize> {
    let n = entries.len();
    let edges: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            dependencies[i]
                .iter()
                .filter(|d| entries[d.target].verb == entries[i].verb)
                .map(|d| d.target)
                .collect()
        })
        .collect();

    let live: Vec<bool> = failures.iter().map(Option::is_none).collect();
    let (depths, stuck) = layer(&edges, &live);
    if stuck.is_empty() {
        return depths;
    }

    let mut live = live;
    for &index in &stuck {
        if on_cycle(index, &edges, &stuck) {
            let placeholder = dependencies[index]
                .iter()
                .find(|d| stuck.contains(&d.target))
                .map(|d| d.placeholder.clone())
                .unwrap_or_default();
            failures[index] = Some(ReferenceError::Cycle { placeholder });
            live[index] = false;
        }
    }
    layer(&edges, &live).0
}

/// Kahn layering over live entries. Returns depths and the entries left over
/// because they sit on, or behind, a cycle.
fn layer(edges: &[Vec<usize>], live: &[bool]) -> (Vec<usize>, Vec<usize>) {
    let n = edges.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, targets) in edges.iter().enumerate() {
        if !live[i] {
            continue;
        }
        for &t in targets.iter().filter(|&&t| live[t]) {
            indegree[i] += 1;
            dependents[t].push(i);
        }
    }

    let mut depth = vec![0usize; n];
    let mut done = vec![false; n];
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| live[i] && indegree[i] == 0).collect();
    while let Some(t) = queue.pop_front() {
        done[t] = true;
        for &d in &dependents[t] {
            depth[d] = depth[d].max(depth[t] + 1);
            indegree[d] -= 1;
            if indegree[d] == 0 {
                queue.push_back(d);
            }
        }
    }

    let stuck = (0..n).filter(|&i| live[i] && !done[i]).collect();
    (depth, stuck)
}

fn on_cycle(start: usize, edges: &[Vec<usize>], within: &[usize]) -> bool {
    let mut seen = vec![false; edges.len()];
    let mut stack: Vec<usize> = edges[start].clone();
    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if seen[node] || !within.contains(&node) {
            continue;
        }
        seen[node] = true;
        stack.extend(edges[node].iter().copied());
    }
    false
}

/// `Type/id` of a resource from a response location, falling back to the
/// request url. History suffixes and absolute prefixes are dropped.
pub fn resolved_identity(location: Option<&str>, request_url: &str) -> Option<String> {
    location
        .and_then(identity_of)
        .or_else(|| identity_of(request_url))
}

fn identity_of(raw: &str) -> Option<String> {
    let path = raw.split_once('?').map_or(raw, |(p, _)| p);
    let path = match path.find("://") {
        Some(scheme) => path[scheme + 3..].split_once('/').map_or("", |(_, p)| p),
        None => path,
    };

    let mut parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if let Some(history) = parts.iter().position(|p| *p == "_history") {
        parts.truncate(history);
    }
    match parts.as_slice() {
        [.., resource_type, id] if !resource_type.starts_with('$') && !id.starts_with('$') => {
            Some(format!("{resource_type}/{id}"))
        }
        _ => None,
    }
}
