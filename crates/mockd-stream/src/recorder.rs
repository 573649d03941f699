//! Write-through recorder: streams captured frame-by-frame into the shared
//! recording store.

use crate::engine::StreamRecorder;
use mockd_core::recording::{Recording, RecordingStore, SseFrame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Accumulates frames per stream and republishes the recording on every
/// event, so a capture is usable even if the stream never terminates
/// cleanly.
pub struct StoreRecorder {
    store: Arc<RecordingStore>,
    host: String,
    frames: Mutex<HashMap<String, Vec<SseFrame>>>,
}

impl StoreRecorder {
    pub fn new(store: Arc<RecordingStore>, host: impl Into<String>) -> Self {
        StoreRecorder {
            store,
            host: host.into(),
            frames: Mutex::new(HashMap::new()),
        }
    }

    /// Drop per-stream frame state once the stream is done.
    pub fn finish(&self, stream_id: &str) {
        self.frames.lock().remove(stream_id);
    }
}

impl StreamRecorder for StoreRecorder {
    fn on_event(
        &self,
        stream_id: &str,
        frame: &SseFrame,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut frames = self.frames.lock();
        let entry = frames.entry(stream_id.to_string()).or_default();
        entry.push(frame.clone());
        self.store
            .add(Recording::new_sse(stream_id, self.host.clone(), entry.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(sequence: u64, data: &str) -> SseFrame {
        SseFrame {
            sequence,
            timestamp: Utc::now(),
            relative_ms: sequence * 10,
            event_type: None,
            data: data.to_string(),
            id: Some(sequence.to_string()),
            retry: None,
            data_size: data.len() as u64,
        }
    }

    #[test]
    fn test_frames_accumulate_under_one_recording() {
        let store = Arc::new(RecordingStore::new());
        let recorder = StoreRecorder::new(Arc::clone(&store), "localhost");

        recorder.on_event("sse-1", &frame(1, "a")).unwrap();
        recorder.on_event("sse-1", &frame(2, "b")).unwrap();

        assert_eq!(store.len(), 1);
        let recording = store.get("sse-1").unwrap();
        assert_eq!(recording.frames.len(), 2);
        assert_eq!(recording.frames[1].data, "b");
        // Sequences stay dense and 1-based.
        assert_eq!(recording.frames[0].sequence, 1);
        assert_eq!(recording.frames[1].sequence, 2);
    }

    #[test]
    fn test_streams_are_isolated() {
        let store = Arc::new(RecordingStore::new());
        let recorder = StoreRecorder::new(Arc::clone(&store), "localhost");

        recorder.on_event("sse-1", &frame(1, "a")).unwrap();
        recorder.on_event("sse-2", &frame(1, "x")).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.get("sse-1").unwrap().frames[0].data, "a");
        assert_eq!(store.get("sse-2").unwrap().frames[0].data, "x");
    }

    #[test]
    fn test_finish_releases_state() {
        let store = Arc::new(RecordingStore::new());
        let recorder = StoreRecorder::new(Arc::clone(&store), "localhost");
        recorder.on_event("sse-1", &frame(1, "a")).unwrap();
        recorder.finish("sse-1");
        // The stored recording survives; only the working state is gone.
        assert_eq!(store.get("sse-1").unwrap().frames.len(), 1);
        recorder.on_event("sse-1", &frame(2, "b")).unwrap();
        assert_eq!(store.get("sse-1").unwrap().frames.len(), 1);
    }
}
