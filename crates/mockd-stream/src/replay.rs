//! Replay of captured SSE recordings, either on the original timeline
//! (pure) or stepped by an external trigger.

use crate::encoder;
use crate::error::StreamError;
use crate::writer::EventSink;
use mockd_core::recording::{Recording, RecordingProtocol, SseFrame};
use mockd_core::sse::SseEventDef;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Capacity of the advance channel; a slow consumer backpressures
/// `advance` rather than losing steps.
const ADVANCE_CHANNEL_CAPACITY: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    Pure,
    Triggered,
}

impl ReplayMode {
    /// Unknown mode strings fall back to pure; callers treat this as
    /// best-effort rather than contract.
    pub fn parse(s: &str) -> ReplayMode {
        match s {
            "triggered" => ReplayMode::Triggered,
            "pure" => ReplayMode::Pure,
            other => {
                debug!(mode = other, "unknown replay mode, falling back to pure");
                ReplayMode::Pure
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayStatus {
    Pending,
    Playing,
    Waiting,
    Complete,
    Aborted,
}

/// Replay tuning.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    pub mode: ReplayMode,
    /// Divides recorded inter-event gaps; non-positive values are treated
    /// as 1.0.
    pub timing_scale: f64,
    /// Extra delay before the first event in pure mode.
    pub initial_delay_ms: u64,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        ReplayOptions {
            mode: ReplayMode::Pure,
            timing_scale: 1.0,
            initial_delay_ms: 0,
        }
    }
}

/// Point-in-time view of a replay.
#[derive(Debug, Clone)]
pub struct ReplayProgress {
    pub current_index: usize,
    pub total_events: usize,
    pub events_sent: u64,
    pub status: ReplayStatus,
    pub elapsed: Duration,
}

struct ReplayState {
    status: ReplayStatus,
    current_index: usize,
    events_sent: u64,
    started_at: Option<Instant>,
}

/// One replay of one recording. `start` may be called at most once.
pub struct ReplaySession {
    frames: Vec<SseFrame>,
    mode: ReplayMode,
    timing_scale: f64,
    initial_delay: Duration,
    state: Mutex<ReplayState>,
    advance_tx: mpsc::Sender<u64>,
    advance_rx: Mutex<Option<mpsc::Receiver<u64>>>,
    started: AtomicBool,
    cancel: CancellationToken,
}

impl ReplaySession {
    pub fn new(recording: &Recording, options: ReplayOptions) -> Result<Self, StreamError> {
        if recording.protocol != RecordingProtocol::Sse {
            return Err(StreamError::InvalidRecording(format!(
                "cannot replay {:?} recording as SSE",
                recording.protocol
            )));
        }
        if recording.frames.is_empty() {
            return Err(StreamError::NoEventsToReplay);
        }
        let timing_scale = if options.timing_scale > 0.0 {
            options.timing_scale
        } else {
            1.0
        };

        let (advance_tx, advance_rx) = mpsc::channel(ADVANCE_CHANNEL_CAPACITY);
        Ok(ReplaySession {
            frames: recording.frames.clone(),
            mode: options.mode,
            timing_scale,
            initial_delay: Duration::from_millis(options.initial_delay_ms),
            state: Mutex::new(ReplayState {
                status: ReplayStatus::Pending,
                current_index: 0,
                events_sent: 0,
                started_at: None,
            }),
            advance_tx,
            advance_rx: Mutex::new(Some(advance_rx)),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        })
    }

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    /// Run the replay to completion over the sink.
    pub async fn start(&self, sink: Box<dyn EventSink>) -> Result<(), StreamError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyStarted);
        }
        self.state.lock().started_at = Some(Instant::now());

        let sink = AsyncMutex::new(sink);
        let result = match self.mode {
            ReplayMode::Pure => self.run_pure(&sink).await,
            ReplayMode::Triggered => self.run_triggered(&sink).await,
        };
        if result.is_err() {
            self.state.lock().status = ReplayStatus::Aborted;
        }
        result
    }

    async fn run_pure(&self, sink: &AsyncMutex<Box<dyn EventSink>>) -> Result<(), StreamError> {
        self.state.lock().status = ReplayStatus::Playing;

        if !self.initial_delay.is_zero() {
            self.sleep_or_abort(self.initial_delay).await?;
        }

        let mut last_relative_ms: u64 = 0;
        for i in 0..self.frames.len() {
            let frame = self.frames[i].clone();
            let gap = frame.relative_ms.saturating_sub(last_relative_ms);
            let scaled = Duration::from_millis((gap as f64 / self.timing_scale) as u64);
            if !scaled.is_zero() {
                self.sleep_or_abort(scaled).await?;
            }
            self.emit(sink, &frame).await?;
            last_relative_ms = frame.relative_ms;
            self.state.lock().current_index = i + 1;
        }

        self.state.lock().status = ReplayStatus::Complete;
        Ok(())
    }

    async fn run_triggered(&self, sink: &AsyncMutex<Box<dyn EventSink>>) -> Result<(), StreamError> {
        self.state.lock().status = ReplayStatus::Waiting;
        let mut rx = self
            .advance_rx
            .lock()
            .take()
            .ok_or(StreamError::AlreadyStarted)?;

        loop {
            let n = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.state.lock().status = ReplayStatus::Aborted;
                    return Ok(());
                }
                n = rx.recv() => match n {
                    Some(n) => n,
                    // The session owns a sender, so this only happens on
                    // teardown.
                    None => {
                        self.state.lock().status = ReplayStatus::Aborted;
                        return Ok(());
                    }
                },
            };

            for _ in 0..n {
                let index = self.state.lock().current_index;
                let Some(frame) = self.frames.get(index).cloned() else {
                    break;
                };
                self.emit(sink, &frame).await?;
                self.state.lock().current_index = index + 1;
            }

            let mut state = self.state.lock();
            if state.current_index >= self.frames.len() {
                state.status = ReplayStatus::Complete;
                return Ok(());
            }
            state.status = ReplayStatus::Waiting;
        }
    }

    /// Release up to `n` events in triggered mode. Returns the count that
    /// will actually play (clamped to what remains).
    pub async fn advance(&self, n: u64) -> Result<u64, StreamError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(StreamError::NotStarted);
        }
        if self.mode != ReplayMode::Triggered {
            return Err(StreamError::TriggeredModeOnly);
        }
        let remaining = {
            let state = self.state.lock();
            (self.frames.len() - state.current_index) as u64
        };
        let clamped = n.min(remaining);
        if clamped == 0 {
            return Ok(0);
        }
        self.advance_tx
            .send(clamped)
            .await
            .map_err(|_| StreamError::Closed)?;
        Ok(clamped)
    }

    pub fn progress(&self) -> ReplayProgress {
        let state = self.state.lock();
        ReplayProgress {
            current_index: state.current_index,
            total_events: self.frames.len(),
            events_sent: state.events_sent,
            status: state.status,
            elapsed: state
                .started_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Cancel the replay; the running task marks itself aborted.
    pub fn stop(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        if state.status != ReplayStatus::Complete {
            state.status = ReplayStatus::Aborted;
        }
    }

    async fn emit(
        &self,
        sink: &AsyncMutex<Box<dyn EventSink>>,
        frame: &SseFrame,
    ) -> Result<(), StreamError> {
        let event = SseEventDef {
            data: serde_json::Value::String(frame.data.clone()),
            event_type: frame.event_type.clone(),
            id: frame.id.clone(),
            retry: frame.retry,
            ..Default::default()
        };
        let encoded = encoder::encode_event(&event)?;
        let mut guard = sink.lock().await;
        guard
            .write(encoded)
            .await
            .map_err(StreamError::ClientDisconnected)?;
        guard
            .flush()
            .await
            .map_err(StreamError::ClientDisconnected)?;
        drop(guard);
        self.state.lock().events_sent += 1;
        Ok(())
    }

    async fn sleep_or_abort(&self, delay: Duration) -> Result<(), StreamError> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.state.lock().status = ReplayStatus::Aborted;
                Err(StreamError::Closed)
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
