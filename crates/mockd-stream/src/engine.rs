//! The per-connection SSE stream loop.
//!
//! A stream is opened in two phases: [`SseStream::open`] resolves the event
//! source, applies Last-Event-ID resumption, and registers with the
//! connection manager. Failures there map to HTTP statuses because no byte
//! has been written yet. [`SseStream::run`] then owns the connection until
//! termination.

use crate::buffer::EventBufferPool;
use crate::encoder;
use crate::error::StreamError;
use crate::generators::generate_batch;
use crate::manager::{ConnectionManager, StreamInfo, StreamStatus};
use crate::rate_limit::{Acquire, RateLimiter};
use crate::templates::resolve_template;
use crate::timing::TimingScheduler;
use crate::writer::EventSink;
use bytes::Bytes;
use chrono::Utc;
use mockd_core::recording::SseFrame;
use mockd_core::sse::{SseConfig, SseEventDef};
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Per-connection hook for capturing emitted events. Errors are non-fatal
/// to the stream.
pub trait StreamRecorder: Send + Sync {
    fn on_event(
        &self,
        stream_id: &str,
        frame: &SseFrame,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Accept-time request context copied into the stream.
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    pub mock_id: String,
    pub path: String,
    pub client_addr: String,
    pub user_agent: Option<String>,
    /// Raw `Last-Event-ID` header value, if the client sent one.
    pub last_event_id: Option<String>,
}

/// How the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Final event (if configured) written, close delay honored.
    Graceful,
    /// Closed without a trailer (`simulateDisconnect`).
    Abrupt,
    /// Aborted; error event written when configured.
    Error,
    /// Context cancelled or client disconnected mid-stream.
    Cancelled,
}

/// Result of a completed stream run.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub termination: Termination,
    pub events_sent: u64,
    /// Events skipped by the drop rate-limit strategy.
    pub events_dropped: u64,
    pub bytes_sent: u64,
}

/// An accepted, registered SSE stream ready to run.
pub struct SseStream {
    config: SseConfig,
    info: Arc<RwLock<StreamInfo>>,
    stream_id: String,
    mock_id: String,
    events: Vec<SseEventDef>,
    start_index: usize,
    replay: Vec<SseEventDef>,
    scheduler: TimingScheduler,
    limiter: Option<RateLimiter>,
    manager: Arc<ConnectionManager>,
    buffers: Arc<EventBufferPool>,
    cancel: CancellationToken,
    recorder: Option<Arc<dyn StreamRecorder>>,
}

impl SseStream {
    /// Resolve the event source, apply resumption, and register the stream.
    ///
    /// The config is the caller's copy, taken at accept time; later edits to
    /// the mock never touch an in-flight stream.
    pub fn open(
        config: SseConfig,
        request: StreamRequest,
        manager: Arc<ConnectionManager>,
        buffers: Arc<EventBufferPool>,
        cancel: CancellationToken,
        recorder: Option<Arc<dyn StreamRecorder>>,
    ) -> Result<SseStream, StreamError> {
        let events = if let Some(ref template) = config.template {
            resolve_template(&template.name, &template.params)?
        } else if let Some(ref generator) = config.generator {
            generate_batch(generator)
        } else {
            config.events.clone()
        };

        let resumed_from = request
            .last_event_id
            .clone()
            .filter(|id| config.resume.enabled && !id.is_empty());

        let mut replay = Vec::new();
        let mut start_index = 0;
        if let Some(ref last_id) = resumed_from {
            if let Some(buffer) = buffers.get(&request.mock_id) {
                replay = buffer
                    .read()
                    .events_after_id(last_id)
                    .into_iter()
                    .map(|b| b.event)
                    .collect::<Vec<_>>();
            }
            // Pick up in the static list after the newest id the client will
            // have seen once the replay lands.
            let effective = replay
                .last()
                .and_then(|e| e.id.clone())
                .unwrap_or_else(|| last_id.clone());
            start_index = resume_index(&events, &effective);
            debug!(
                mock_id = %request.mock_id,
                last_event_id = %last_id,
                replayed = replay.len(),
                start_index,
                "resuming stream"
            );
        }

        let stream_id = manager.next_stream_id();
        let info = Arc::new(RwLock::new(StreamInfo::new(
            stream_id.clone(),
            request.mock_id.clone(),
            request.path,
            request.client_addr,
            request.user_agent,
            resumed_from,
        )));
        manager.register(Arc::clone(&info), cancel.clone())?;

        let scheduler = TimingScheduler::new(config.timing.clone());
        let limiter = config.rate_limit.as_ref().map(RateLimiter::new);

        Ok(SseStream {
            mock_id: request.mock_id,
            config,
            info,
            stream_id,
            events,
            start_index,
            replay,
            scheduler,
            limiter,
            manager,
            buffers,
            cancel,
            recorder,
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Shared state handle for registry observers.
    pub fn info(&self) -> Arc<RwLock<StreamInfo>> {
        Arc::clone(&self.info)
    }

    /// Rate-limit headers for the response, when enabled on the config.
    pub fn rate_limit_headers(&self) -> Option<Vec<(&'static str, String)>> {
        self.limiter.as_ref().and_then(RateLimiter::headers)
    }

    /// Drive the stream to completion over the given sink.
    pub async fn run(mut self, sink: Box<dyn EventSink>) -> StreamOutcome {
        let sink = AsyncMutex::new(sink);
        let started = tokio::time::Instant::now();
        self.info.write().status = StreamStatus::Active;

        let mut emitted: u64 = 0;
        let mut dropped: u64 = 0;
        let mut bytes: u64 = 0;

        let termination = self
            .run_loop(&sink, started, &mut emitted, &mut dropped, &mut bytes)
            .await;

        match termination {
            Termination::Graceful => {
                self.info.write().status = StreamStatus::Closing;
                if let Some(event) = self.config.termination.final_event.clone() {
                    self.write_trailer(&sink, &event, &mut emitted, &mut bytes)
                        .await;
                }
                let close_delay = self.config.termination.close_delay_ms.max(0) as u64;
                if close_delay > 0 {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = tokio::time::sleep(Duration::from_millis(close_delay)) => {}
                    }
                }
            }
            Termination::Error => {
                self.info.write().status = StreamStatus::Closing;
                if let Some(event) = self.config.termination.error_event.clone() {
                    self.write_trailer(&sink, &event, &mut emitted, &mut bytes)
                        .await;
                }
            }
            Termination::Abrupt | Termination::Cancelled => {}
        }

        self.info.write().status = StreamStatus::Closed;
        self.manager.deregister(&self.stream_id);
        debug!(
            stream_id = %self.stream_id,
            ?termination,
            events = emitted,
            bytes,
            "stream finished"
        );

        StreamOutcome {
            termination,
            events_sent: emitted,
            events_dropped: dropped,
            bytes_sent: bytes,
        }
    }

    async fn run_loop(
        &mut self,
        sink: &AsyncMutex<Box<dyn EventSink>>,
        started: tokio::time::Instant,
        emitted: &mut u64,
        dropped: &mut u64,
        bytes: &mut u64,
    ) -> Termination {
        // Replay missed events before normal scheduling.
        let replay = std::mem::take(&mut self.replay);
        for event in replay {
            match self.emit(sink, started, &event, None, emitted, bytes).await {
                Ok(()) => {}
                Err(termination) => return termination,
            }
        }

        // Initial delay, applied exactly once.
        let initial = self.scheduler.initial_delay();
        if !initial.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Termination::Cancelled,
                _ = tokio::time::sleep(initial) => {}
            }
        }

        let lifecycle = self.config.lifecycle.clone();
        let deadline = (lifecycle.connection_timeout > 0).then(|| {
            tokio::time::Instant::now()
                + Duration::from_secs(lifecycle.connection_timeout as u64)
        });
        let mut keepalive = (lifecycle.keepalive_interval > 0).then(|| {
            let period = Duration::from_secs(lifecycle.keepalive_interval as u64);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let mut event_index = self.start_index;
        loop {
            if lifecycle.max_events > 0 && *emitted >= lifecycle.max_events {
                return Termination::Graceful;
            }
            if lifecycle.simulate_disconnect > 0 && *emitted >= lifecycle.simulate_disconnect {
                return Termination::Abrupt;
            }
            if event_index >= self.events.len() {
                // Generators refill with a fresh batch, counters reset.
                if let Some(generator) = self.config.generator.clone() {
                    self.events = generate_batch(&generator);
                    self.scheduler.reset();
                    event_index = 0;
                    if self.events.is_empty() {
                        return Termination::Graceful;
                    }
                    continue;
                }
                return Termination::Graceful;
            }

            let event = self.events[event_index].clone();
            let delay = self.scheduler.next_delay(event_index, event.delay_ms);

            // Wait for the earliest of: cancellation, connection timeout,
            // keepalive tick (which loops back into the wait), or the
            // scheduled delay.
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            let wake = loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break Wake::Cancelled,
                    _ = sleep_until_opt(deadline) => break Wake::Timeout,
                    _ = tick_opt(keepalive.as_mut()) => {
                        let ka = encoder::keepalive();
                        let len = ka.len() as u64;
                        if write_chunk(sink, ka).await.is_err() {
                            break Wake::Disconnected;
                        }
                        *bytes += len;
                        self.manager.record_bytes(len);
                        self.info.write().bytes_sent += len;
                    }
                    _ = &mut sleep => break Wake::Due,
                }
            };

            match wake {
                Wake::Cancelled => return Termination::Cancelled,
                Wake::Disconnected => {
                    self.manager.record_error();
                    return Termination::Cancelled;
                }
                Wake::Timeout => return Termination::Graceful,
                Wake::Due => {}
            }

            if let Some(ref limiter) = self.limiter {
                match limiter.acquire(&self.cancel).await {
                    Ok(Acquire::Granted) => {}
                    Ok(Acquire::Dropped) => {
                        // Silent to the client; does not count as sent.
                        *dropped += 1;
                        event_index += 1;
                        continue;
                    }
                    Err(StreamError::RateLimited) => {
                        self.manager.record_error();
                        return Termination::Error;
                    }
                    Err(_) => return Termination::Cancelled,
                }
            }

            match self
                .emit(sink, started, &event, Some(event_index), emitted, bytes)
                .await
            {
                Ok(()) => event_index += 1,
                Err(termination) => return termination,
            }
        }
    }

    /// Encode and write one event with full bookkeeping. `index` is the
    /// position used for implicit id assignment; replayed events pass
    /// `None` and keep their buffered ids.
    async fn emit(
        &self,
        sink: &AsyncMutex<Box<dyn EventSink>>,
        started: tokio::time::Instant,
        event: &SseEventDef,
        index: Option<usize>,
        emitted: &mut u64,
        bytes: &mut u64,
    ) -> Result<(), Termination> {
        let mut event = event.clone();
        if self.config.resume.enabled && event.id.is_none() {
            if let Some(i) = index {
                event.id = Some((i + 1).to_string());
            }
        }

        let encoded = match encoder::encode_event(&event) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(stream_id = %self.stream_id, error = %err, "failed to encode event");
                self.manager.record_error();
                return Err(Termination::Error);
            }
        };
        let len = encoded.len() as u64;

        if let Err(err) = write_chunk(sink, encoded).await {
            debug!(stream_id = %self.stream_id, error = %err, "client disconnected");
            self.manager.record_error();
            return Err(Termination::Cancelled);
        }

        {
            let mut info = self.info.write();
            info.last_event_time = Some(Utc::now());
            info.last_event_id = event.id.clone();
            info.events_sent += 1;
            info.bytes_sent += len;
        }
        self.manager.record_event(len);
        *emitted += 1;
        *bytes += len;

        // Only fresh events enter the resume buffer; replays are already
        // there.
        if self.config.resume.enabled && index.is_some() {
            let max_age = (self.config.resume.max_age > 0)
                .then(|| Duration::from_secs(self.config.resume.max_age as u64));
            let buffer = self.buffers.get_or_create(
                &self.mock_id,
                self.config.resume.buffer_size.max(1) as usize,
                max_age,
            );
            buffer
                .write()
                .add(event.id.clone().unwrap_or_default(), event.clone());
        }

        if let Some(ref recorder) = self.recorder {
            let data = encoder::stringify_data(&event.data);
            let frame = SseFrame {
                sequence: *emitted,
                timestamp: Utc::now(),
                relative_ms: started.elapsed().as_millis() as u64,
                event_type: event.event_type.clone(),
                data_size: data.len() as u64,
                data,
                id: event.id.clone(),
                retry: event.retry,
            };
            if let Err(err) = recorder.on_event(&self.stream_id, &frame) {
                warn!(stream_id = %self.stream_id, error = %err, "recording hook failed");
            }
        }
        Ok(())
    }

    /// Best-effort trailer write for graceful/error termination.
    async fn write_trailer(
        &self,
        sink: &AsyncMutex<Box<dyn EventSink>>,
        event: &SseEventDef,
        emitted: &mut u64,
        bytes: &mut u64,
    ) {
        if let Ok(encoded) = encoder::encode_event(event) {
            let len = encoded.len() as u64;
            if write_chunk(sink, encoded).await.is_ok() {
                let mut info = self.info.write();
                info.events_sent += 1;
                info.bytes_sent += len;
                drop(info);
                self.manager.record_event(len);
                *emitted += 1;
                *bytes += len;
            }
        }
    }
}

enum Wake {
    Due,
    Timeout,
    Cancelled,
    Disconnected,
}

async fn write_chunk(sink: &AsyncMutex<Box<dyn EventSink>>, chunk: Bytes) -> io::Result<()> {
    // Flush happens inside the write critical section.
    let mut guard = sink.lock().await;
    guard.write(chunk).await?;
    guard.flush().await
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

async fn tick_opt(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}

/// Position in the static list just after the event carrying (or implying)
/// the given id. Falls back to the beginning when the id is unknown.
fn resume_index(events: &[SseEventDef], id: &str) -> usize {
    for (i, event) in events.iter().enumerate() {
        let matches = match event.id {
            Some(ref eid) => eid == id,
            None => (i + 1).to_string() == id,
        };
        if matches {
            return i + 1;
        }
    }
    0
}
