//! mockd core: mock definitions, validation, recordings, and shared
//! utilities.
//!
//! This crate owns the configuration surface shared by the streaming engine
//! and the recording proxy: the [`mock::Mock`] envelope with its
//! protocol-specific specs, the recording model, identifier generation, and
//! the glob matcher used by traffic filters.

pub mod chunked;
pub mod error;
pub mod glob;
pub mod http;
pub mod ids;
pub mod mock;
pub mod protocols;
pub mod recording;
pub mod sse;

pub use error::{ConfigError, RecordingError};
pub use mock::{Mock, MockType};
