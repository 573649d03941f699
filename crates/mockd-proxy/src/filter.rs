//! Traffic filtering for the recording proxy.

use mockd_core::glob::match_any;
use serde::{Deserialize, Serialize};

/// Glob-based include/exclude lists evaluated against host and path.
///
/// Exclusions win over inclusions; empty include lists admit everything
/// that was not excluded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_hosts: Vec<String>,
}

impl FilterConfig {
    /// Decide whether traffic to `host`/`path` should be captured.
    pub fn should_record(&self, host: &str, path: &str) -> bool {
        if match_any(&self.exclude_hosts, host) {
            return false;
        }
        if match_any(&self.exclude_paths, path) {
            return false;
        }
        if !self.include_hosts.is_empty() && !match_any(&self.include_hosts, host) {
            return false;
        }
        if !self.include_paths.is_empty() {
            return match_any(&self.include_paths, path);
        }
        true
    }
}
