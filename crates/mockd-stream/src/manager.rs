//! Registry of live SSE streams with capacity limits, bulk close, and
//! cumulative statistics.

use crate::error::StreamError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle phase of a stream, published for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Connecting,
    Active,
    Paused,
    Closing,
    Closed,
}

/// Published snapshot of a stream's state. The stream task owns the live
/// values; everyone else reads through the shared handle.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub id: String,
    pub mock_id: String,
    pub path: String,
    pub client_addr: String,
    pub user_agent: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_event_time: Option<DateTime<Utc>>,
    pub events_sent: u64,
    pub bytes_sent: u64,
    pub last_event_id: Option<String>,
    pub resumed_from: Option<String>,
    pub status: StreamStatus,
}

impl StreamInfo {
    pub fn new(
        id: impl Into<String>,
        mock_id: impl Into<String>,
        path: impl Into<String>,
        client_addr: impl Into<String>,
        user_agent: Option<String>,
        resumed_from: Option<String>,
    ) -> Self {
        StreamInfo {
            id: id.into(),
            mock_id: mock_id.into(),
            path: path.into(),
            client_addr: client_addr.into(),
            user_agent,
            start_time: Utc::now(),
            last_event_time: None,
            events_sent: 0,
            bytes_sent: 0,
            last_event_id: None,
            resumed_from,
            status: StreamStatus::Connecting,
        }
    }
}

struct Registered {
    info: Arc<RwLock<StreamInfo>>,
    cancel: CancellationToken,
}

/// Aggregate statistics over the manager's lifetime.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStats {
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_events: u64,
    pub total_bytes: u64,
    pub errors: u64,
    pub active_by_mock: HashMap<String, usize>,
}

/// Registry of live streams.
///
/// Queries take the shared lock and return snapshots; registration and
/// close paths take the exclusive lock. Cancellation handles stay here so
/// bulk close is a fan-out of `CancellationToken::cancel` calls.
pub struct ConnectionManager {
    max_connections: usize,
    streams: RwLock<HashMap<String, Registered>>,
    stream_seq: AtomicU64,
    total_connections: AtomicU64,
    total_events: AtomicU64,
    total_bytes: AtomicU64,
    errors: AtomicU64,
}

impl ConnectionManager {
    /// `max_connections` of 0 means unlimited.
    pub fn new(max_connections: usize) -> Self {
        ConnectionManager {
            max_connections,
            streams: RwLock::new(HashMap::new()),
            stream_seq: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            total_events: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Next stream id, prefixed and monotonic.
    pub fn next_stream_id(&self) -> String {
        let n = self.stream_seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("sse-{n}")
    }

    /// Register a stream, failing when at capacity.
    pub fn register(
        &self,
        info: Arc<RwLock<StreamInfo>>,
        cancel: CancellationToken,
    ) -> Result<(), StreamError> {
        let mut streams = self.streams.write();
        if self.max_connections > 0 && streams.len() >= self.max_connections {
            return Err(StreamError::MaxConnectionsReached);
        }
        let id = info.read().id.clone();
        debug!(stream_id = %id, active = streams.len() + 1, "stream registered");
        streams.insert(id, Registered { info, cancel });
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Cancel and drop a stream's registration.
    pub fn deregister(&self, id: &str) {
        if let Some(entry) = self.streams.write().remove(id) {
            entry.cancel.cancel();
            debug!(stream_id = %id, "stream deregistered");
        }
    }

    /// Cancel one stream. Returns false when the id is unknown.
    pub fn close(&self, id: &str) -> bool {
        match self.streams.write().remove(id) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(stream_id = %id, "stream closed by request");
                true
            }
            None => false,
        }
    }

    /// Cancel every live stream. Returns how many were signalled.
    pub fn close_all(&self) -> usize {
        let mut streams = self.streams.write();
        let count = streams.len();
        for (_, entry) in streams.drain() {
            entry.cancel.cancel();
        }
        if count > 0 {
            info!(count, "closed all streams");
        }
        count
    }

    /// Cancel every stream serving the given mock.
    pub fn close_by_mock(&self, mock_id: &str) -> usize {
        let mut streams = self.streams.write();
        let ids: Vec<String> = streams
            .iter()
            .filter(|(_, e)| e.info.read().mock_id == mock_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            if let Some(entry) = streams.remove(id) {
                entry.cancel.cancel();
            }
        }
        if !ids.is_empty() {
            info!(mock_id, count = ids.len(), "closed streams for mock");
        }
        ids.len()
    }

    pub fn get(&self, id: &str) -> Option<StreamInfo> {
        self.streams.read().get(id).map(|e| e.info.read().clone())
    }

    pub fn list_by_mock(&self, mock_id: &str) -> Vec<StreamInfo> {
        self.streams
            .read()
            .values()
            .map(|e| e.info.read().clone())
            .filter(|info| info.mock_id == mock_id)
            .collect()
    }

    pub fn count_by_mock(&self, mock_id: &str) -> usize {
        self.streams
            .read()
            .values()
            .filter(|e| e.info.read().mock_id == mock_id)
            .count()
    }

    /// Snapshot of every live stream; safe to iterate without locks.
    pub fn snapshot(&self) -> Vec<StreamInfo> {
        self.streams
            .read()
            .values()
            .map(|e| e.info.read().clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.streams.read().len()
    }

    /// Fold one emitted event into the cumulative totals.
    pub fn record_event(&self, bytes: u64) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Count keepalive and other non-event payload bytes.
    pub fn record_bytes(&self, bytes: u64) {
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ManagerStats {
        let mut active_by_mock: HashMap<String, usize> = HashMap::new();
        let streams = self.streams.read();
        for entry in streams.values() {
            *active_by_mock
                .entry(entry.info.read().mock_id.clone())
                .or_insert(0) += 1;
        }
        ManagerStats {
            active_connections: streams.len(),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            total_events: self.total_events.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_by_mock,
        }
    }
}
