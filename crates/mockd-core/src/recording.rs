//! Captured traffic: recording model, in-memory store, and the on-disk
//! writer used by the MITM proxy.

use crate::error::RecordingError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Protocol a recording captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingProtocol {
    Http,
    Sse,
    Websocket,
}

/// One captured exchange or stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub protocol: RecordingProtocol,
    /// Upstream host, or empty when unknown.
    #[serde(default)]
    pub host: String,
    pub created_at: DateTime<Utc>,

    /// Populated for HTTP recordings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<HttpExchange>,

    /// Populated for streaming recordings; `sequence` is 1-based and dense.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<SseFrame>,
}

/// A request/response pair captured by the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpExchange {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub request_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub status: u16,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub response_headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    /// Upstream latency in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
}

/// One frame of a captured SSE stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseFrame {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Offset from the first frame in milliseconds.
    pub relative_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
    pub data_size: u64,
}

impl Recording {
    pub fn new_http(id: impl Into<String>, host: impl Into<String>, exchange: HttpExchange) -> Self {
        Recording {
            id: id.into(),
            protocol: RecordingProtocol::Http,
            host: host.into(),
            created_at: Utc::now(),
            exchange: Some(exchange),
            frames: Vec::new(),
        }
    }

    pub fn new_sse(id: impl Into<String>, host: impl Into<String>, frames: Vec<SseFrame>) -> Self {
        Recording {
            id: id.into(),
            protocol: RecordingProtocol::Sse,
            host: host.into(),
            created_at: Utc::now(),
            exchange: None,
            frames,
        }
    }
}

/// Shared in-memory store of recordings, keyed by id.
///
/// Reads return snapshots; callers never hold the lock while iterating.
pub struct RecordingStore {
    recordings: RwLock<HashMap<String, Recording>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        RecordingStore {
            recordings: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, recording: Recording) {
        debug!(
            id = %recording.id,
            host = %recording.host,
            "storing recording"
        );
        self.recordings
            .write()
            .insert(recording.id.clone(), recording);
    }

    pub fn get(&self, id: &str) -> Option<Recording> {
        self.recordings.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Recording> {
        let mut all: Vec<Recording> = self.recordings.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    pub fn remove(&self, id: &str) -> Result<(), RecordingError> {
        self.recordings
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RecordingError::NotFound(id.to_string()))
    }

    pub fn clear(&self) {
        self.recordings.write().clear();
    }

    pub fn len(&self) -> usize {
        self.recordings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.read().is_empty()
    }
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Persist a recording under `<dir>/<host>/rec_<id>.json` as pretty JSON.
///
/// Hosts without a name land in `_unknown`. Directories are created 0700,
/// files 0600.
pub fn write_recording_to_disk(dir: &Path, recording: &Recording) -> Result<PathBuf, RecordingError> {
    let host_dir = if recording.host.is_empty() {
        dir.join("_unknown")
    } else {
        dir.join(&recording.host)
    };
    create_private_dir(&host_dir)?;

    let path = host_dir.join(format!("rec_{}.json", recording.id));
    let json = serde_json::to_string_pretty(recording)?;
    write_private_file(&path, json.as_bytes())?;
    info!(path = %path.display(), "wrote recording to disk");
    Ok(path)
}

fn create_private_dir(path: &Path) -> Result<(), RecordingError> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

fn write_private_file(path: &Path, contents: &[u8]) -> Result<(), RecordingError> {
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_recording(id: &str, host: &str) -> Recording {
        Recording::new_http(
            id,
            host,
            HttpExchange {
                method: "GET".to_string(),
                path: "/v1/x".to_string(),
                request_headers: HashMap::new(),
                request_body: None,
                status: 200,
                response_headers: HashMap::new(),
                response_body: Some("ok".to_string()),
                duration_ms: 12,
            },
        )
    }

    #[test]
    fn test_store_add_get_remove() {
        let store = RecordingStore::new();
        assert!(store.is_empty());

        store.add(http_recording("r1", "api.example.com"));
        assert_eq!(store.len(), 1);

        let fetched = store.get("r1").unwrap();
        assert_eq!(fetched.exchange.unwrap().path, "/v1/x");

        store.remove("r1").unwrap();
        assert!(store.get("r1").is_none());
        assert!(store.remove("r1").is_err());
    }

    #[test]
    fn test_store_list_sorted_by_creation() {
        let store = RecordingStore::new();
        store.add(http_recording("a", "h1"));
        store.add(http_recording("b", "h2"));
        let listed = store.list();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at <= listed[1].created_at);
    }

    #[test]
    fn test_disk_writer_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_recording_to_disk(dir.path(), &http_recording("r9", "api.example.com"))
            .unwrap();
        assert!(path.ends_with("api.example.com/rec_r9.json"));

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: Recording = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.id, "r9");
        // Pretty-printed output spans multiple lines.
        assert!(raw.contains('\n'));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let file_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(file_mode, 0o600);
            let dir_mode = fs::metadata(path.parent().unwrap())
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }

    #[test]
    fn test_unknown_host_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut recording = http_recording("r1", "");
        recording.host = String::new();
        let path = write_recording_to_disk(dir.path(), &recording).unwrap();
        assert!(path.to_string_lossy().contains("_unknown"));
    }

    #[test]
    fn test_sse_recording_roundtrip() {
        let frames = vec![SseFrame {
            sequence: 1,
            timestamp: Utc::now(),
            relative_ms: 0,
            event_type: Some("message".to_string()),
            data: "hello".to_string(),
            id: Some("1".to_string()),
            retry: None,
            data_size: 5,
        }];
        let recording = Recording::new_sse("s1", "api.example.com", frames);
        let json = serde_json::to_string(&recording).unwrap();
        let back: Recording = serde_json::from_str(&json).unwrap();
        assert_eq!(back.protocol, RecordingProtocol::Sse);
        assert_eq!(back.frames.len(), 1);
        assert_eq!(back.frames[0].data, "hello");
    }
}
