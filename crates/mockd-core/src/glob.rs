//! Wildcard matching for proxy traffic filters.
//!
//! `*` matches any sequence of characters (including the empty one) at any
//! position. Patterns without a wildcard match by full equality; interior
//! wildcards require their surrounding segments to appear in order.

/// Match `value` against a glob `pattern`.
///
/// An empty pattern matches only the empty string.
pub fn match_glob(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == value;
    }

    let segments: Vec<&str> = pattern.split('*').collect();
    let mut rest = value;

    // A non-empty first segment anchors the start.
    let first = segments[0];
    if !first.is_empty() {
        match rest.strip_prefix(first) {
            Some(r) => rest = r,
            None => return false,
        }
    }

    // A non-empty last segment anchors the end; check it after the interior
    // segments have consumed their share.
    let last = segments[segments.len() - 1];
    for seg in &segments[1..segments.len() - 1] {
        if seg.is_empty() {
            continue;
        }
        match rest.find(seg) {
            Some(i) => rest = &rest[i + seg.len()..],
            None => return false,
        }
    }

    last.is_empty() || rest.ends_with(last)
}

/// True when `value` matches any pattern in the list.
pub fn match_any(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|p| match_glob(p, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match_without_wildcard() {
        assert!(match_glob("api.example.com", "api.example.com"));
        assert!(!match_glob("api.example.com", "api.example.org"));
        assert!(!match_glob("api", "api.example.com"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty() {
        assert!(match_glob("", ""));
        assert!(!match_glob("", "x"));
    }

    #[test]
    fn test_bare_star_matches_everything() {
        assert!(match_glob("*", ""));
        assert!(match_glob("*", "anything"));
        assert!(match_glob("*", "/deep/path?q=1"));
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(match_glob("/api/*", "/api/users"));
        assert!(match_glob("/api/*", "/api/"));
        assert!(!match_glob("/api/*", "/admin/users"));

        assert!(match_glob("*.example.com", "api.example.com"));
        assert!(match_glob("*.example.com", ".example.com"));
        assert!(!match_glob("*.example.com", "example.com"));
    }

    #[test]
    fn test_interior_segments_in_order() {
        assert!(match_glob("/v1/*/orders/*", "/v1/users/42/orders/7"));
        assert!(match_glob("a*b*c", "aXXbYYc"));
        assert!(match_glob("a*b*c", "abc"));
        assert!(!match_glob("a*b*c", "acb"));
        assert!(!match_glob("a*b*c", "aXXcYYb"));
    }

    #[test]
    fn test_adjacent_stars() {
        assert!(match_glob("a**c", "abc"));
        assert!(match_glob("**", ""));
    }

    #[test]
    fn test_match_any() {
        let patterns = vec!["*.internal".to_string(), "localhost".to_string()];
        assert!(match_any(&patterns, "db.internal"));
        assert!(match_any(&patterns, "localhost"));
        assert!(!match_any(&patterns, "example.com"));
        assert!(!match_any(&[], "example.com"));
    }

    proptest! {
        #[test]
        fn prop_star_matches_all(value in ".*") {
            prop_assert!(match_glob("*", &value));
        }

        #[test]
        fn prop_empty_pattern_equality(value in ".*") {
            prop_assert_eq!(match_glob("", &value), value.is_empty());
        }

        #[test]
        fn prop_literal_matches_itself(value in "[a-z0-9./-]{0,40}") {
            prop_assert!(match_glob(&value, &value));
        }

        #[test]
        fn prop_deterministic(pattern in "[a-z*]{0,12}", value in "[a-z]{0,12}") {
            let a = match_glob(&pattern, &value);
            let b = match_glob(&pattern, &value);
            prop_assert_eq!(a, b);
        }
    }
}
