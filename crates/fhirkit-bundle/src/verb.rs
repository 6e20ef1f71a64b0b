//! HTTP verbs of bundle entries and the order their buckets execute in.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Method of a bundle entry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpVerb {
    Delete,
    Get,
    Head,
    Patch,
    Post,
    Put,
}

/// Order in which verb buckets run; a bucket starts only after the previous one finished.
pub const EXECUTION_ORDER: [HttpVerb; 6] = [
    HttpVerb::Delete,
    HttpVerb::Post,
    HttpVerb::Put,
    HttpVerb::Patch,
    HttpVerb::Get,
    HttpVerb::Head,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("HTTP method '{0}' is not supported in a bundle entry")]
pub struct UnsupportedVerb(pub String);

impl HttpVerb {
    pub const ALL: [HttpVerb; 6] = [
        HttpVerb::Delete,
        HttpVerb::Get,
        HttpVerb::Head,
        HttpVerb::Patch,
        HttpVerb::Post,
        HttpVerb::Put,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpVerb::Delete => "DELETE",
            HttpVerb::Get => "GET",
            HttpVerb::Head => "HEAD",
            HttpVerb::Patch => "PATCH",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
        }
    }

    /// Position of this verb's bucket in [`EXECUTION_ORDER`].
    pub fn execution_rank(self) -> usize {
        match self {
            HttpVerb::Delete => 0,
            HttpVerb::Post => 1,
            HttpVerb::Put => 2,
            HttpVerb::Patch => 3,
            HttpVerb::Get => 4,
            HttpVerb::Head => 5,
        }
    }

    /// GET and HEAD: safe to coalesce when the route is identical.
    pub fn is_idempotent_read(self) -> bool {
        matches!(self, HttpVerb::Get | HttpVerb::Head)
    }
}

impl FromStr for HttpVerb {
    type Err = UnsupportedVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HttpVerb::ALL
            .into_iter()
            .find(|verb| verb.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnsupportedVerb(s.to_string()))
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_matches_execution_order() {
        for (position, verb) in EXECUTION_ORDER.iter().enumerate() {
            assert_eq!(verb.execution_rank(), position, "{verb}");
        }
        let mut sorted = HttpVerb::ALL;
        sorted.sort_by_key(|v| v.execution_rank());
        assert_eq!(sorted, EXECUTION_ORDER);
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("post".parse::<HttpVerb>().unwrap(), HttpVerb::Post);
        assert_eq!("Delete".parse::<HttpVerb>().unwrap(), HttpVerb::Delete);
        assert_eq!(
            "TRACE".parse::<HttpVerb>().unwrap_err(),
            UnsupportedVerb("TRACE".into())
        );
    }

    #[test]
    fn only_get_and_head_are_reads() {
        let reads: Vec<_> = HttpVerb::ALL
            .into_iter()
            .filter(|v| v.is_idempotent_read())
            .collect();
        assert_eq!(reads, vec![HttpVerb::Get, HttpVerb::Head]);
    }
}
