//! The write seam between stream engines and the HTTP runtime.
//!
//! Engines hold a boxed [`EventSink`] behind a per-stream async mutex and
//! call write + flush inside one critical section. The hyper-facing
//! implementation pushes frames into a bounded channel drained by a
//! [`ChannelBody`]; each frame hyper takes off the channel is flushed to
//! the socket, which is what gives chunk boundaries their meaning.

use async_trait::async_trait;
use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Destination for stream bytes. `write` queues a chunk, `flush` pushes it
/// to the client; implementations where writes flush inherently may no-op
/// `flush`.
#[async_trait]
pub trait EventSink: Send {
    async fn write(&mut self, chunk: Bytes) -> io::Result<()>;
    async fn flush(&mut self) -> io::Result<()>;
}

/// Frames queued per connection before backpressure applies.
const BODY_CHANNEL_CAPACITY: usize = 32;

/// Create a connected sink/body pair for one streaming response.
pub fn body_channel() -> (BodySink, ChannelBody) {
    let (tx, rx) = mpsc::channel(BODY_CHANNEL_CAPACITY);
    (BodySink { tx }, ChannelBody { rx })
}

/// Sink half: owned by the stream task.
pub struct BodySink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl EventSink for BodySink {
    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx.send(chunk).await.map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "response body closed")
        })
    }

    async fn flush(&mut self) -> io::Result<()> {
        // Every frame handed to hyper is flushed to the socket.
        Ok(())
    }
}

/// Body half: handed to hyper as the response body.
pub struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

/// In-memory sink capturing write boundaries, for tests and embedding
/// harnesses. Clones share storage so a caller can keep a handle while the
/// stream task owns the boxed sink.
#[derive(Clone, Default)]
pub struct CaptureSink {
    state: std::sync::Arc<parking_lot::Mutex<CaptureState>>,
    /// Fail writes after this many chunks to simulate a dropped client.
    fail_after: Option<usize>,
}

#[derive(Default)]
struct CaptureState {
    chunks: Vec<Bytes>,
    flushes: usize,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(chunks: usize) -> Self {
        CaptureSink {
            fail_after: Some(chunks),
            ..Default::default()
        }
    }

    pub fn chunks(&self) -> Vec<Bytes> {
        self.state.lock().chunks.clone()
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }

    /// Everything written so far as one string.
    pub fn as_string(&self) -> String {
        let mut out = String::new();
        for chunk in &self.state.lock().chunks {
            out.push_str(&String::from_utf8_lossy(chunk));
        }
        out
    }
}

#[async_trait]
impl EventSink for CaptureSink {
    async fn write(&mut self, chunk: Bytes) -> io::Result<()> {
        let mut state = self.state.lock();
        if let Some(limit) = self.fail_after {
            if state.chunks.len() >= limit {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "client went away",
                ));
            }
        }
        state.chunks.push(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.state.lock().flushes += 1;
        Ok(())
    }
}
