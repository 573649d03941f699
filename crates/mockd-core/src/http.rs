//! HTTP mock specification: request matcher, plain response, and the
//! streaming config hooks (SSE / chunked).
//!
//! Validation follows the admin-time rules: a spec that passes
//! [`HttpSpec::validate`] can be served without further structural checks.

use crate::chunked::ChunkedConfig;
use crate::error::ConfigError;
use crate::sse::SseConfig;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// HTTP methods accepted by a matcher. CONNECT and TRACE are intentionally
/// not matchable.
pub const ALLOWED_METHODS: [&str; 7] =
    ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Maximum artificial response delay in milliseconds.
pub const MAX_DELAY_MS: i64 = 30_000;

/// HTTP mock specification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSpec {
    /// Higher priority wins when several matchers accept a request; ties
    /// keep definition order.
    #[serde(default)]
    pub priority: u32,

    pub matcher: HttpMatcher,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse: Option<SseConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunked: Option<ChunkedConfig>,
}

impl HttpSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matcher.validate()?;

        let populated = [
            self.response.is_some(),
            self.sse.is_some(),
            self.chunked.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        match populated {
            0 => return Err(ConfigError::MissingField(
                "http.response, http.sse, or http.chunked".to_string(),
            )),
            1 => {}
            _ => {
                return Err(ConfigError::field(
                    "http",
                    "response, sse, and chunked are mutually exclusive",
                ))
            }
        }

        if let Some(ref response) = self.response {
            response.validate()?;
        }
        if let Some(ref sse) = self.sse {
            sse.validate()?;
        }
        if let Some(ref chunked) = self.chunked {
            chunked.validate()?;
        }
        Ok(())
    }
}

/// Request matching criteria. At least one criterion must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Exact path; must begin with `/`. Exclusive with `pathPattern`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Regex applied to the request path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_equals: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_contains: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_pattern: Option<String>,
}

impl HttpMatcher {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.has_criteria() {
            return Err(ConfigError::field(
                "matcher",
                "at least one matching criterion is required",
            ));
        }

        if let Some(ref method) = self.method {
            if !ALLOWED_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                return Err(ConfigError::field(
                    "matcher.method",
                    format!("unsupported method {method:?}"),
                ));
            }
        }

        if self.path.is_some() && self.path_pattern.is_some() {
            return Err(ConfigError::exclusive("matcher.path", "matcher.pathPattern"));
        }
        if let Some(ref path) = self.path {
            if !path.starts_with('/') {
                return Err(ConfigError::field("matcher.path", "must begin with '/'"));
            }
        }
        if let Some(ref pattern) = self.path_pattern {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                field: "matcher.pathPattern".to_string(),
                source,
            })?;
        }

        if self.body_equals.is_some() && self.body_contains.is_some() {
            return Err(ConfigError::exclusive(
                "matcher.bodyEquals",
                "matcher.bodyContains",
            ));
        }
        if let Some(ref pattern) = self.body_pattern {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                field: "matcher.bodyPattern".to_string(),
                source,
            })?;
        }

        for name in self.headers.keys() {
            if !is_header_token(name) {
                return Err(ConfigError::field(
                    "matcher.headers",
                    format!("invalid header name {name:?}"),
                ));
            }
        }
        Ok(())
    }

    fn has_criteria(&self) -> bool {
        self.method.is_some()
            || self.path.is_some()
            || self.path_pattern.is_some()
            || !self.headers.is_empty()
            || !self.query_params.is_empty()
            || self.body_equals.is_some()
            || self.body_contains.is_some()
            || self.body_pattern.is_some()
    }
}

/// Plain (non-streaming) HTTP response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    #[serde(default = "default_status_code")]
    pub status_code: u16,

    /// Response body. Decoders accept a JSON string, object, array, number,
    /// or boolean; non-strings are stored as their JSON textual form.
    #[serde(
        default,
        deserialize_with = "deserialize_flexible_body",
        skip_serializing_if = "Option::is_none"
    )]
    pub body: Option<String>,

    /// Path to a file whose contents become the body. Exclusive with `body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_file: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub delay_ms: i64,
}

fn default_status_code() -> u16 {
    200
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status_code: default_status_code(),
            body: None,
            body_file: None,
            headers: HashMap::new(),
            delay_ms: 0,
        }
    }
}

impl HttpResponse {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(100..=599).contains(&self.status_code) {
            return Err(ConfigError::field(
                "response.statusCode",
                format!("{} is outside [100, 599]", self.status_code),
            ));
        }
        if self.body.is_some() && self.body_file.is_some() {
            return Err(ConfigError::exclusive("response.body", "response.bodyFile"));
        }
        if !(0..=MAX_DELAY_MS).contains(&self.delay_ms) {
            return Err(ConfigError::field(
                "response.delayMs",
                format!("{} is outside [0, {MAX_DELAY_MS}]", self.delay_ms),
            ));
        }
        for name in self.headers.keys() {
            if !is_header_token(name) {
                return Err(ConfigError::field(
                    "response.headers",
                    format!("invalid header name {name:?}"),
                ));
            }
        }
        Ok(())
    }
}

/// RFC 7230 token check for header field names.
pub fn is_header_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
                        | b'^' | b'_' | b'`' | b'|' | b'~'
                )
        })
}

/// Accept a JSON string as-is; serialize any other JSON value to its textual
/// form. Mirrors the permissive body handling of the YAML/JSON loaders.
pub(crate) fn deserialize_flexible_body<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_matcher(path: &str) -> HttpMatcher {
        HttpMatcher {
            path: Some(path.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_spec_requires_exactly_one_payload() {
        let mut spec = HttpSpec {
            matcher: path_matcher("/x"),
            ..Default::default()
        };
        assert!(spec.validate().is_err());

        spec.response = Some(HttpResponse::default());
        assert!(spec.validate().is_ok());

        spec.chunked = Some(ChunkedConfig {
            data: Some("x".to_string()),
            ..Default::default()
        });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_matcher_requires_criteria() {
        let matcher = HttpMatcher::default();
        assert!(matcher.validate().is_err());
        assert!(path_matcher("/ok").validate().is_ok());
    }

    #[test]
    fn test_matcher_method_verbs() {
        for m in ALLOWED_METHODS {
            let matcher = HttpMatcher {
                method: Some(m.to_string()),
                ..Default::default()
            };
            assert!(matcher.validate().is_ok(), "{m} should be allowed");
        }
        for m in ["CONNECT", "TRACE", "FETCH"] {
            let matcher = HttpMatcher {
                method: Some(m.to_string()),
                ..Default::default()
            };
            assert!(matcher.validate().is_err(), "{m} should be rejected");
        }
    }

    #[test]
    fn test_matcher_path_rules() {
        assert!(path_matcher("relative").validate().is_err());

        let both = HttpMatcher {
            path: Some("/a".to_string()),
            path_pattern: Some("^/a$".to_string()),
            ..Default::default()
        };
        assert!(both.validate().is_err());

        let bad_pattern = HttpMatcher {
            path_pattern: Some("([".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_pattern.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_matcher_body_rules() {
        let both = HttpMatcher {
            body_equals: Some("a".to_string()),
            body_contains: Some("b".to_string()),
            ..Default::default()
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn test_matcher_header_names() {
        let mut headers = HashMap::new();
        headers.insert("X-Api-Key".to_string(), "v".to_string());
        let ok = HttpMatcher {
            headers,
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "v".to_string());
        let bad = HttpMatcher {
            headers,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_response_status_and_delay_bounds() {
        let mut response = HttpResponse {
            status_code: 99,
            ..Default::default()
        };
        assert!(response.validate().is_err());
        response.status_code = 599;
        assert!(response.validate().is_ok());
        response.delay_ms = MAX_DELAY_MS + 1;
        assert!(response.validate().is_err());
        response.delay_ms = -1;
        assert!(response.validate().is_err());
    }

    #[test]
    fn test_response_body_exclusivity() {
        let response = HttpResponse {
            body: Some("x".to_string()),
            body_file: Some("f.json".to_string()),
            ..Default::default()
        };
        assert!(response.validate().is_err());
    }

    #[test]
    fn test_flexible_body_decoding() {
        let r: HttpResponse = serde_json::from_str(r#"{"body": "plain"}"#).unwrap();
        assert_eq!(r.body.as_deref(), Some("plain"));

        let r: HttpResponse = serde_json::from_str(r#"{"body": {"a": 1}}"#).unwrap();
        assert_eq!(r.body.as_deref(), Some(r#"{"a":1}"#));

        let r: HttpResponse = serde_json::from_str(r#"{"body": [1, 2]}"#).unwrap();
        assert_eq!(r.body.as_deref(), Some("[1,2]"));

        let r: HttpResponse = serde_json::from_str(r#"{"body": 42}"#).unwrap();
        assert_eq!(r.body.as_deref(), Some("42"));

        let r: HttpResponse = serde_json::from_str(r#"{"body": true}"#).unwrap();
        assert_eq!(r.body.as_deref(), Some("true"));

        let r: HttpResponse = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(r.body, None);
    }

    #[test]
    fn test_header_token_charset() {
        assert!(is_header_token("Content-Type"));
        assert!(is_header_token("x_custom.header~1"));
        assert!(!is_header_token(""));
        assert!(!is_header_token("has space"));
        assert!(!is_header_token("colon:name"));
        assert!(!is_header_token("utf8-é"));
    }
}
