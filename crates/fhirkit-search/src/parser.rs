use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use fhirkit_storage::SearchParams;
use thiserror::Error;
use url::form_urlencoded;

use crate::engine::SearchConfig;

/// Query parameter carrying the opaque continuation token of the next page.
pub const CONTINUATION_TOKEN_PARAM: &str = "ct";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchValidationError {
    #[error("Invalid value for {param}: {message}")]
    InvalidValue { param: String, message: String },
}

impl SearchValidationError {
    fn invalid(param: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            param: param.to_string(),
            message: message.into(),
        }
    }
}

/// A search query split into what the backend will evaluate and what it ignores.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedQuery {
    pub params: SearchParams,
    /// Offset of the requested page, used to compute the next continuation token.
    pub offset: u32,
    pub count: u32,
    pub unsupported_search: Vec<(String, String)>,
    pub unsupported_sort: Vec<(String, String)>,
}

pub struct SearchParameterParser;

impl SearchParameterParser {
    /// Parse an application/x-www-form-urlencoded query string into name/value pairs.
    /// Example: "name=John&_count=10"
    pub fn parse_query(query: &str) -> Vec<(String, String)> {
        form_urlencoded::parse(query.trim_start_matches('?').as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Splits parameters into supported filters, paging and unsupported ones.
    ///
    /// `_sort` is reported as an unsupported sorting parameter since results are
    /// always ordered by id. Unknown parameters are reported, not rejected.
    pub fn classify(
        queries: &[(String, String)],
        config: &SearchConfig,
    ) -> Result<ClassifiedQuery, SearchValidationError> {
        let mut classified = ClassifiedQuery {
            count: config.default_count,
            ..Default::default()
        };

        for (name, value) in queries {
            let base = name.split(':').next().unwrap_or(name);
            match base {
                "_count" => {
                    let n = value.parse::<u32>().map_err(|_| {
                        SearchValidationError::invalid("_count", "must be a non-negative integer")
                    })?;
                    classified.count = n.min(config.max_count);
                }
                "_offset" => {
                    classified.offset = value.parse::<u32>().map_err(|_| {
                        SearchValidationError::invalid("_offset", "must be a non-negative integer")
                    })?;
                }
                CONTINUATION_TOKEN_PARAM => {
                    classified.offset = decode_continuation_token(value)?;
                }
                "_sort" => classified
                    .unsupported_sort
                    .push((name.clone(), value.clone())),
                _ if config.allows(base) => {
                    classified.params = std::mem::take(&mut classified.params)
                        .with_param(name.clone(), value.clone());
                }
                _ => classified
                    .unsupported_search
                    .push((name.clone(), value.clone())),
            }
        }

        classified.params.count = Some(classified.count);
        classified.params.offset = Some(classified.offset);
        Ok(classified)
    }
}

/// Encodes the offset of the next page as an opaque token.
pub fn encode_continuation_token(offset: u32) -> String {
    URL_SAFE_NO_PAD.encode(offset.to_string())
}

pub fn decode_continuation_token(token: &str) -> Result<u32, SearchValidationError> {
    let invalid = || SearchValidationError::invalid(CONTINUATION_TOKEN_PARAM, "malformed continuation token");
    let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    std::str::from_utf8(&bytes)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn url_decoding_of_space_works() {
        let parsed = SearchParameterParser::parse_query("?name=John%20Smith&given=a+b");
        assert_eq!(parsed, q(&[("name", "John Smith"), ("given", "a b")]));
    }

    #[test]
    fn count_missing_uses_default() {
        let c = SearchParameterParser::classify(&[], &SearchConfig::default()).unwrap();
        assert_eq!(c.count, SearchConfig::default().default_count);
        assert_eq!(c.params.count, Some(c.count));
        assert_eq!(c.offset, 0);
    }

    #[test]
    fn count_over_max_is_clamped() {
        let cfg = SearchConfig::default();
        let c = SearchParameterParser::classify(&q(&[("_count", "100000")]), &cfg).unwrap();
        assert_eq!(c.count, cfg.max_count);
    }

    #[test]
    fn invalid_count_is_rejected() {
        let err = SearchParameterParser::classify(&q(&[("_count", "ten")]), &SearchConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("_count"));
    }

    #[test]
    fn unknown_and_sort_params_are_reported() {
        let c = SearchParameterParser::classify(
            &q(&[("name", "x"), ("foo", "bar"), ("_sort", "-_lastUpdated"), ("_total", "accurate")]),
            &SearchConfig::default(),
        )
        .unwrap();
        assert_eq!(c.params.parameters.get("name").unwrap(), &vec!["x".to_string()]);
        assert_eq!(c.unsupported_search, q(&[("foo", "bar"), ("_total", "accurate")]));
        assert_eq!(c.unsupported_sort, q(&[("_sort", "-_lastUpdated")]));
    }

    #[test]
    fn modifiers_keep_their_parameter_name() {
        let c = SearchParameterParser::classify(&q(&[("name:exact", "Peter")]), &SearchConfig::default())
            .unwrap();
        assert!(c.params.parameters.contains_key("name:exact"));
    }

    #[test]
    fn continuation_token_sets_offset() {
        let token = encode_continuation_token(20);
        let c = SearchParameterParser::classify(&q(&[("ct", &token)]), &SearchConfig::default())
            .unwrap();
        assert_eq!(c.offset, 20);
        assert_eq!(c.params.offset, Some(20));

        assert!(decode_continuation_token("!!").is_err());
        assert!(decode_continuation_token(&URL_SAFE_NO_PAD.encode("abc")).is_err());
    }
}
