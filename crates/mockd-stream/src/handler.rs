//! HTTP glue: turn a matched streaming mock into a hyper response.
//!
//! Open-phase failures map to statuses before any byte is written; once the
//! response body is handed to hyper, failures surface to the client as a
//! truncated stream.

use crate::buffer::EventBufferPool;
use crate::chunked::{content_type, run_chunked};
use crate::engine::{SseStream, StreamRecorder, StreamRequest};
use crate::error::StreamError;
use crate::manager::ConnectionManager;
use crate::writer::{body_channel, ChannelBody};
use bytes::Bytes;
use http_body_util::{Either, Full};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONNECTION, CONTENT_TYPE, USER_AGENT};
use hyper::{Request, Response, StatusCode, Version};
use mockd_core::chunked::ChunkedConfig;
use mockd_core::sse::SseConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Response body: a buffered error page or a live stream channel.
pub type StreamBody = Either<Full<Bytes>, ChannelBody>;

pub const SSE_CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

/// Shared entry point for SSE and chunked mock traffic.
pub struct StreamHandler {
    manager: Arc<ConnectionManager>,
    buffers: Arc<EventBufferPool>,
    recorder: Option<Arc<dyn StreamRecorder>>,
}

impl StreamHandler {
    pub fn new(manager: Arc<ConnectionManager>, buffers: Arc<EventBufferPool>) -> Self {
        StreamHandler {
            manager,
            buffers,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn StreamRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.manager)
    }

    pub fn buffers(&self) -> Arc<EventBufferPool> {
        Arc::clone(&self.buffers)
    }

    /// Serve an SSE mock. The stream task owns the connection until
    /// termination; the returned cancel handle is also registered with the
    /// connection manager.
    pub fn handle_sse<B>(
        &self,
        mock_id: &str,
        config: SseConfig,
        req: &Request<B>,
        client_addr: &str,
    ) -> Response<StreamBody> {
        if !supports_streaming(req.version()) {
            return error_response(&StreamError::FlusherNotSupported);
        }

        let request = StreamRequest {
            mock_id: mock_id.to_string(),
            path: req.uri().path().to_string(),
            client_addr: client_addr.to_string(),
            user_agent: header_string(req, USER_AGENT.as_str()),
            last_event_id: header_string(req, "last-event-id"),
        };

        let cancel = CancellationToken::new();
        let stream = match SseStream::open(
            config,
            request,
            Arc::clone(&self.manager),
            Arc::clone(&self.buffers),
            cancel,
            self.recorder.clone(),
        ) {
            Ok(stream) => stream,
            Err(err) => return error_response(&err),
        };

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, SSE_CONTENT_TYPE)
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no");
        if let Some(headers) = stream.rate_limit_headers() {
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
        }

        debug!(mock_id, stream_id = stream.stream_id(), "starting SSE stream");
        let (sink, body) = body_channel();
        tokio::spawn(stream.run(Box::new(sink)));

        builder
            .body(Either::Right(body))
            .unwrap_or_else(|_| error_response(&StreamError::FlusherNotSupported))
    }

    /// Serve a chunked or NDJSON mock.
    pub fn handle_chunked<B>(
        &self,
        config: ChunkedConfig,
        req: &Request<B>,
    ) -> Response<StreamBody> {
        if !supports_streaming(req.version()) {
            return error_response(&StreamError::FlusherNotSupported);
        }

        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type(&config))
            .header(CACHE_CONTROL, "no-cache")
            .header("X-Accel-Buffering", "no");

        let (sink, body) = body_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(async move {
            if let Err(err) = run_chunked(&config, Box::new(sink), cancel).await {
                debug!(error = %err, "chunked stream ended early");
            }
        });

        builder
            .body(Either::Right(body))
            .unwrap_or_else(|_| error_response(&StreamError::FlusherNotSupported))
    }
}

/// Streaming needs HTTP/1.1 or later; earlier versions have no flush-able
/// chunked encoding.
fn supports_streaming(version: Version) -> bool {
    version >= Version::HTTP_11
}

fn header_string<B>(req: &Request<B>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Error page for open-phase failures.
pub fn error_response(err: &StreamError) -> Response<StreamBody> {
    let status =
        StatusCode::from_u16(err.open_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = serde_json::json!({ "error": err.to_string() }).to_string();
    let mut response = Response::new(Either::Left(Full::new(Bytes::from(body))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
