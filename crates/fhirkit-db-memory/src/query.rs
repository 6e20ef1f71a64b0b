use fhirkit_storage::SearchParams;
use serde_json::Value;

/// Query filter types understood by the in-memory backend.
///
/// Every filter carries its values as an OR list, one filter per parameter name;
/// filters are AND-ed.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    /// `_id=a,b`
    Id { values: Vec<String> },
    /// `identifier=[system|]value`
    Identifier { tokens: Vec<IdentifierToken> },
    /// `name`, `family`, `given`: case-insensitive prefix match on HumanName parts.
    Name {
        part: NamePart,
        values: Vec<String>,
    },
    /// Any other parameter: equality against a top-level scalar (or list of scalars),
    /// matching the element name case-insensitively (`birthdate` -> `birthDate`).
    Field { field: String, values: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierToken {
    pub system: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePart {
    Any,
    Family,
    Given,
}

impl IdentifierToken {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('|') {
            Some((system, value)) => Self {
                system: (!system.is_empty()).then(|| system.to_string()),
                value: value.to_string(),
            },
            None => Self {
                system: None,
                value: raw.to_string(),
            },
        }
    }
}

impl QueryFilter {
    /// Builds filters from search parameters. Result-control parameters
    /// (`_count`, `_sort`, ...) other than `_id` are not filters.
    pub fn from_params(params: &SearchParams) -> Vec<QueryFilter> {
        let mut names: Vec<&String> = params.parameters.keys().collect();
        names.sort();

        names
            .into_iter()
            .filter_map(|name| {
                let raw_values = params.parameters.get(name)?;
                let values: Vec<String> = raw_values
                    .iter()
                    .flat_map(|v| v.split(','))
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .collect();
                // Modifiers are accepted but not interpreted.
                let base = name.split(':').next().unwrap_or(name);
                match base {
                    "_id" => Some(QueryFilter::Id { values }),
                    "identifier" => Some(QueryFilter::Identifier {
                        tokens: values.iter().map(|v| IdentifierToken::parse(v)).collect(),
                    }),
                    "name" => Some(QueryFilter::Name {
                        part: NamePart::Any,
                        values,
                    }),
                    "family" => Some(QueryFilter::Name {
                        part: NamePart::Family,
                        values,
                    }),
                    "given" => Some(QueryFilter::Name {
                        part: NamePart::Given,
                        values,
                    }),
                    other if other.starts_with('_') => None,
                    other => Some(QueryFilter::Field {
                        field: other.to_string(),
                        values,
                    }),
                }
            })
            .collect()
    }

    /// Check if a resource matches this filter
    pub fn matches(&self, resource: &Value) -> bool {
        match self {
            QueryFilter::Id { values } => resource
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| values.iter().any(|v| v == id)),
            QueryFilter::Identifier { tokens } => tokens.iter().any(|t| match_identifier(resource, t)),
            QueryFilter::Name { part, values } => values.iter().any(|v| match_name(resource, *part, v)),
            QueryFilter::Field { field, values } => match_field(resource, field, values),
        }
    }
}

fn match_identifier(resource: &Value, token: &IdentifierToken) -> bool {
    let Some(identifiers) = resource.get("identifier").and_then(Value::as_array) else {
        return false;
    };
    identifiers.iter().any(|identifier| {
        let value_matches = identifier
            .get("value")
            .and_then(Value::as_str)
            .is_some_and(|v| v == token.value);
        let system_matches = match &token.system {
            Some(system) => identifier
                .get("system")
                .and_then(Value::as_str)
                .is_some_and(|s| s == system),
            None => true,
        };
        value_matches && system_matches
    })
}

fn match_name(resource: &Value, part: NamePart, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    let starts = |s: &str| s.to_lowercase().starts_with(&needle);
    let Some(names) = resource.get("name").and_then(Value::as_array) else {
        return false;
    };
    names.iter().any(|name| {
        let family = || name.get("family").and_then(Value::as_str).is_some_and(starts);
        let given = || {
            name.get("given")
                .and_then(Value::as_array)
                .is_some_and(|given| given.iter().filter_map(Value::as_str).any(starts))
        };
        let text = || name.get("text").and_then(Value::as_str).is_some_and(starts);
        match part {
            NamePart::Family => family(),
            NamePart::Given => given(),
            NamePart::Any => family() || given() || text(),
        }
    })
}

fn match_field(resource: &Value, field: &str, values: &[String]) -> bool {
    let Some(obj) = resource.as_object() else {
        return false;
    };
    let Some(element) = obj
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(field))
        .map(|(_, v)| v)
    else {
        return false;
    };

    let scalar_eq = |candidate: &Value| match candidate {
        Value::String(s) => values.iter().any(|v| v == s),
        Value::Bool(b) => values.iter().any(|v| v == &b.to_string()),
        Value::Number(n) => values.iter().any(|v| v == &n.to_string()),
        _ => false,
    };

    match element {
        Value::Array(items) => items.iter().any(scalar_eq),
        other => scalar_eq(other),
    }
}
