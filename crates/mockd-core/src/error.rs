use thiserror::Error;

/// Structural configuration errors, surfaced at validate time.
///
/// Validation runs on the admin path; traffic-time code only ever sees mocks
/// that already passed it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range or shape.
    #[error("invalid value for {field}: {message}")]
    InvalidField { field: String, message: String },

    /// Two mutually exclusive fields were both set.
    #[error("{first} and {second} are mutually exclusive")]
    MutuallyExclusive { first: String, second: String },

    /// A required field (or one-of group) is missing entirely.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A regex-valued field failed to compile.
    #[error("invalid pattern in {field}: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },

    /// The envelope's `type` tag and populated spec disagree.
    #[error("mock type {mock_type} does not match populated spec {spec}")]
    TypeMismatch { mock_type: String, spec: String },
}

impl ConfigError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn exclusive(first: impl Into<String>, second: impl Into<String>) -> Self {
        ConfigError::MutuallyExclusive {
            first: first.into(),
            second: second.into(),
        }
    }
}

/// Errors from the recording store and its disk writer.
#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("recording {0} not found")]
    NotFound(String),

    #[error("failed to persist recording: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize recording: {0}")]
    Serialize(#[from] serde_json::Error),
}
