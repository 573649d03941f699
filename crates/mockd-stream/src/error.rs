use thiserror::Error;

/// Errors observable from the streaming engine and replay sessions.
///
/// Variants map one-to-one onto wire-visible behavior: open-phase errors
/// become HTTP statuses, mid-stream errors become connection closes.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream's context was cancelled (client gone or admin close).
    #[error("stream closed")]
    Closed,

    /// A write failed mid-stream; the client is gone.
    #[error("client disconnected: {0}")]
    ClientDisconnected(#[source] std::io::Error),

    /// Token bucket exhausted under the `error` strategy.
    #[error("rate limited")]
    RateLimited,

    /// Resume buffer rejected an insert.
    #[error("event buffer full")]
    BufferFull,

    /// Encoded event data exceeded the 1 MiB cap.
    #[error("event too large: {size} bytes")]
    EventTooLarge { size: usize },

    /// Event id or type contained a CR or LF.
    #[error("invalid event id or type: {0:?}")]
    InvalidEventId(String),

    /// Unknown built-in template name. 500 at stream open.
    #[error("template not found: {0:?}")]
    TemplateNotFound(String),

    /// The response writer cannot stream. 500 at stream open.
    #[error("response writer does not support flushing")]
    FlusherNotSupported,

    /// Connection registry at capacity. 503 at stream open.
    #[error("maximum connections reached")]
    MaxConnectionsReached,

    /// Recording unusable for replay (wrong protocol, malformed frames).
    #[error("invalid recording: {0}")]
    InvalidRecording(String),

    /// Recording carries no frames.
    #[error("no events to replay")]
    NoEventsToReplay,

    /// `advance` called on a pure-mode replay.
    #[error("advance is only valid in triggered mode")]
    TriggeredModeOnly,

    /// Replay control call before `start`.
    #[error("replay not started")]
    NotStarted,

    /// `start` called twice on the same replay session.
    #[error("replay already started")]
    AlreadyStarted,

    /// Data file referenced by a chunked mock could not be read.
    #[error("failed to read data file: {0}")]
    DataFile(#[source] std::io::Error),
}

impl StreamError {
    /// HTTP status for errors raised before any byte was written.
    pub fn open_status(&self) -> u16 {
        match self {
            StreamError::TemplateNotFound(_) | StreamError::FlusherNotSupported => 500,
            StreamError::MaxConnectionsReached => 503,
            StreamError::InvalidRecording(_) | StreamError::NoEventsToReplay => 400,
            _ => 500,
        }
    }
}
