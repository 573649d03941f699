//! Resume buffers: per-mock ring buffers of recently emitted events.
//!
//! Buffers outlive the streams that fill them so a reconnecting client can
//! replay what it missed. Queries return copies; callers never touch live
//! storage.

use mockd_core::sse::SseEventDef;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// One buffered event with its stable position in the buffer's history.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    pub id: String,
    pub event: SseEventDef,
    pub timestamp: Instant,
    /// Monotonic per-buffer index; preserves emit order.
    pub index: u64,
}

/// Ring buffer of the last `max_size` events, with optional age-based
/// expiry applied on insert and explicit sweeps.
pub struct EventBuffer {
    max_size: usize,
    max_age: Option<Duration>,
    events: VecDeque<BufferedEvent>,
    next_index: u64,
}

impl EventBuffer {
    pub fn new(max_size: usize, max_age: Option<Duration>) -> Self {
        EventBuffer {
            max_size: max_size.max(1),
            max_age,
            events: VecDeque::new(),
            next_index: 0,
        }
    }

    /// Append an event, expiring stale entries first and evicting the
    /// oldest when at capacity.
    pub fn add(&mut self, id: impl Into<String>, event: SseEventDef) {
        self.cleanup();
        if self.events.len() >= self.max_size {
            self.events.pop_front();
        }
        self.events.push_back(BufferedEvent {
            id: id.into(),
            event,
            timestamp: Instant::now(),
            index: self.next_index,
        });
        self.next_index += 1;
    }

    /// Events after the *last* occurrence of `id`, in order.
    ///
    /// Returns an empty vec when the id is absent or already the newest
    /// entry.
    pub fn events_after_id(&self, id: &str) -> Vec<BufferedEvent> {
        let position = self.events.iter().rposition(|e| e.id == id);
        match position {
            Some(i) => self.events.iter().skip(i + 1).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Events with `index` strictly greater than `after`.
    pub fn events_after_index(&self, after: u64) -> Vec<BufferedEvent> {
        self.events
            .iter()
            .filter(|e| e.index > after)
            .cloned()
            .collect()
    }

    /// Copy of every buffered event, oldest first.
    pub fn snapshot(&self) -> Vec<BufferedEvent> {
        self.events.iter().cloned().collect()
    }

    /// Drop entries older than the configured max age.
    pub fn cleanup(&mut self) {
        if let Some(max_age) = self.max_age {
            let cutoff = Instant::now();
            while let Some(front) = self.events.front() {
                if cutoff.duration_since(front.timestamp) > max_age {
                    self.events.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Id of the newest buffered event, if any.
    pub fn latest_id(&self) -> Option<String> {
        self.events.back().map(|e| e.id.clone())
    }
}

/// Buffers keyed by mock id, created on demand.
pub struct EventBufferPool {
    buffers: RwLock<HashMap<String, Arc<RwLock<EventBuffer>>>>,
}

impl EventBufferPool {
    pub fn new() -> Self {
        EventBufferPool {
            buffers: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the buffer for a mock, creating it with the given shape when
    /// absent.
    pub fn get_or_create(
        &self,
        mock_id: &str,
        max_size: usize,
        max_age: Option<Duration>,
    ) -> Arc<RwLock<EventBuffer>> {
        if let Some(buffer) = self.buffers.read().get(mock_id) {
            return Arc::clone(buffer);
        }
        let mut buffers = self.buffers.write();
        Arc::clone(
            buffers
                .entry(mock_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(EventBuffer::new(max_size, max_age)))),
        )
    }

    pub fn get(&self, mock_id: &str) -> Option<Arc<RwLock<EventBuffer>>> {
        self.buffers.read().get(mock_id).cloned()
    }

    pub fn remove(&self, mock_id: &str) {
        if self.buffers.write().remove(mock_id).is_some() {
            debug!(mock_id, "removed event buffer");
        }
    }

    /// Run age-based cleanup on every buffer.
    pub fn sweep(&self) {
        let buffers: Vec<Arc<RwLock<EventBuffer>>> =
            self.buffers.read().values().cloned().collect();
        for buffer in buffers {
            buffer.write().cleanup();
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }
}

impl Default for EventBufferPool {
    fn default() -> Self {
        Self::new()
    }
}
