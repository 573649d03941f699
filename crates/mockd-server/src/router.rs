//! Priority routing of incoming HTTP requests to mock definitions.

use hyper::HeaderMap;
use mockd_core::error::ConfigError;
use mockd_core::http::HttpMatcher;
use mockd_core::{Mock, MockType};
use regex::Regex;
use std::collections::HashMap;

/// A validated mock with its patterns pre-compiled.
struct CompiledMock {
    mock: Mock,
    path_pattern: Option<Regex>,
    body_pattern: Option<Regex>,
}

/// Immutable routing table over the loaded HTTP mocks.
///
/// Higher priority wins; ties keep definition order. The table is rebuilt
/// wholesale on config change, so lookups never lock.
pub struct Router {
    mocks: Vec<CompiledMock>,
}

impl Router {
    /// Validate and index the given mocks. Disabled and non-HTTP mocks are
    /// skipped; any invalid mock fails the whole load.
    pub fn new(mocks: Vec<Mock>) -> Result<Self, ConfigError> {
        let mut compiled = Vec::new();
        for mock in mocks {
            mock.validate()?;
            if mock.mock_type != MockType::Http || !mock.is_enabled() {
                continue;
            }
            let matcher = match mock.http.as_ref() {
                Some(spec) => &spec.matcher,
                None => continue,
            };
            // Patterns were syntax-checked by validate; compile for reuse.
            let path_pattern = compile(matcher.path_pattern.as_deref(), "matcher.pathPattern")?;
            let body_pattern = compile(matcher.body_pattern.as_deref(), "matcher.bodyPattern")?;
            compiled.push(CompiledMock {
                mock,
                path_pattern,
                body_pattern,
            });
        }
        // Stable sort: equal priorities stay in definition order.
        compiled.sort_by_key(|c| {
            std::cmp::Reverse(c.mock.http.as_ref().map(|s| s.priority).unwrap_or(0))
        });
        Ok(Router { mocks: compiled })
    }

    pub fn len(&self) -> usize {
        self.mocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mocks.is_empty()
    }

    /// Find the first mock (in priority order) accepting the request.
    pub fn match_request(
        &self,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: &str,
    ) -> Option<&Mock> {
        let query_params = parse_query(query);
        self.mocks
            .iter()
            .find(|candidate| {
                let matcher = match candidate.mock.http.as_ref() {
                    Some(spec) => &spec.matcher,
                    None => return false,
                };
                matches(
                    matcher,
                    candidate,
                    method,
                    path,
                    &query_params,
                    headers,
                    body,
                )
            })
            .map(|c| &c.mock)
    }
}

fn compile(pattern: Option<&str>, field: &str) -> Result<Option<Regex>, ConfigError> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|source| ConfigError::InvalidPattern {
                field: field.to_string(),
                source,
            })
        })
        .transpose()
}

fn matches(
    matcher: &HttpMatcher,
    compiled: &CompiledMock,
    method: &str,
    path: &str,
    query_params: &HashMap<String, String>,
    headers: &HeaderMap,
    body: &str,
) -> bool {
    if let Some(ref want) = matcher.method {
        if !want.eq_ignore_ascii_case(method) {
            return false;
        }
    }
    if let Some(ref want) = matcher.path {
        if want != path {
            return false;
        }
    }
    if let Some(ref pattern) = compiled.path_pattern {
        if !pattern.is_match(path) {
            return false;
        }
    }
    for (name, want) in &matcher.headers {
        let actual = headers.get(name.as_str()).and_then(|v| v.to_str().ok());
        if actual != Some(want.as_str()) {
            return false;
        }
    }
    for (name, want) in &matcher.query_params {
        if query_params.get(name) != Some(want) {
            return false;
        }
    }
    if let Some(ref want) = matcher.body_equals {
        if body != want {
            return false;
        }
    }
    if let Some(ref want) = matcher.body_contains {
        if !body.contains(want.as_str()) {
            return false;
        }
    }
    if let Some(ref pattern) = compiled.body_pattern {
        if !pattern.is_match(body) {
            return false;
        }
    }
    true
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(query) = query {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            } else if !pair.is_empty() {
                params.insert(pair.to_string(), String::new());
            }
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mock(id: &str, priority: u32, matcher: serde_json::Value) -> Mock {
        serde_json::from_value(json!({
            "id": id,
            "type": "http",
            "http": {
                "priority": priority,
                "matcher": matcher,
                "response": { "statusCode": 200, "body": id }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_path_and_method_matching() {
        let router = Router::new(vec![
            mock("users", 0, json!({ "method": "GET", "path": "/users" })),
            mock("orders", 0, json!({ "path": "/orders" })),
        ])
        .unwrap();

        let headers = HeaderMap::new();
        let found = router
            .match_request("GET", "/users", None, &headers, "")
            .unwrap();
        assert_eq!(found.id, "users");

        assert!(router
            .match_request("POST", "/users", None, &headers, "")
            .is_none());
        // No method criterion matches any verb.
        assert!(router
            .match_request("DELETE", "/orders", None, &headers, "")
            .is_some());
    }

    #[test]
    fn test_priority_order_with_stable_ties() {
        let router = Router::new(vec![
            mock("low", 1, json!({ "pathPattern": "^/api/.*" })),
            mock("tie-a", 5, json!({ "pathPattern": "^/api/.*" })),
            mock("tie-b", 5, json!({ "pathPattern": "^/api/.*" })),
        ])
        .unwrap();

        let headers = HeaderMap::new();
        let found = router
            .match_request("GET", "/api/x", None, &headers, "")
            .unwrap();
        // Highest priority wins; among ties, definition order.
        assert_eq!(found.id, "tie-a");
    }

    #[test]
    fn test_header_and_query_criteria() {
        let router = Router::new(vec![mock(
            "scoped",
            0,
            json!({
                "path": "/data",
                "headers": { "X-Api-Key": "secret" },
                "queryParams": { "page": "2" }
            }),
        )])
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        assert!(router
            .match_request("GET", "/data", Some("page=2&sort=asc"), &headers, "")
            .is_some());
        assert!(router
            .match_request("GET", "/data", Some("page=3"), &headers, "")
            .is_none());
        assert!(router
            .match_request("GET", "/data", Some("page=2"), &HeaderMap::new(), "")
            .is_none());
    }

    #[test]
    fn test_body_criteria() {
        let router = Router::new(vec![
            mock("exact", 2, json!({ "path": "/b", "bodyEquals": "ping" })),
            mock("contains", 1, json!({ "path": "/b", "bodyContains": "ing" })),
            mock("pattern", 0, json!({ "path": "/b", "bodyPattern": "^\\d+$" })),
        ])
        .unwrap();

        let headers = HeaderMap::new();
        assert_eq!(
            router
                .match_request("GET", "/b", None, &headers, "ping")
                .unwrap()
                .id,
            "exact"
        );
        assert_eq!(
            router
                .match_request("GET", "/b", None, &headers, "sing")
                .unwrap()
                .id,
            "contains"
        );
        assert_eq!(
            router
                .match_request("GET", "/b", None, &headers, "12345")
                .unwrap()
                .id,
            "pattern"
        );
        assert!(router
            .match_request("GET", "/b", None, &headers, "nope")
            .is_none());
    }

    #[test]
    fn test_disabled_mocks_skipped() {
        let mut disabled = mock("off", 9, json!({ "path": "/x" }));
        disabled.enabled = Some(false);
        let router = Router::new(vec![disabled, mock("on", 0, json!({ "path": "/x" }))]).unwrap();
        let headers = HeaderMap::new();
        assert_eq!(
            router
                .match_request("GET", "/x", None, &headers, "")
                .unwrap()
                .id,
            "on"
        );
    }

    #[test]
    fn test_legacy_mock_routes() {
        let legacy: Mock = serde_json::from_value(json!({
            "id": "legacy",
            "matcher": { "path": "/old" },
            "response": { "statusCode": 418 }
        }))
        .unwrap();
        let router = Router::new(vec![legacy]).unwrap();
        let headers = HeaderMap::new();
        let found = router
            .match_request("GET", "/old", None, &headers, "")
            .unwrap();
        assert_eq!(found.http.as_ref().unwrap().response.as_ref().unwrap().status_code, 418);
    }

    #[test]
    fn test_invalid_mock_fails_load() {
        let bad: Mock = serde_json::from_value(json!({
            "id": "bad",
            "type": "http",
            "http": { "matcher": {}, "response": {} }
        }))
        .unwrap();
        assert!(Router::new(vec![bad]).is_err());
    }
}
