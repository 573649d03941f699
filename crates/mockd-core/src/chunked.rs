//! Chunked transfer mock configuration.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Chunk size used when `chunkSize` is 0.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Chunked / NDJSON streaming response configuration.
///
/// Exactly one of `data`, `dataFile`, or `ndjsonItems` supplies the payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkedConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ndjson_items: Vec<serde_json::Value>,

    /// "ndjson" selects newline-delimited JSON output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Bytes per chunk; 0 means the 1024-byte default.
    #[serde(default)]
    pub chunk_size: i64,

    /// Delay between chunks in milliseconds.
    #[serde(default)]
    pub chunk_delay_ms: i64,
}

impl ChunkedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sources = [
            self.data.is_some(),
            self.data_file.is_some(),
            !self.ndjson_items.is_empty(),
        ]
        .iter()
        .filter(|s| **s)
        .count();
        match sources {
            0 => {
                return Err(ConfigError::MissingField(
                    "chunked.data, chunked.dataFile, or chunked.ndjsonItems".to_string(),
                ))
            }
            1 => {}
            _ => {
                return Err(ConfigError::field(
                    "chunked",
                    "data, dataFile, and ndjsonItems are mutually exclusive",
                ))
            }
        }
        if self.chunk_size < 0 {
            return Err(ConfigError::field("chunked.chunkSize", "must be >= 0"));
        }
        if self.chunk_delay_ms < 0 {
            return Err(ConfigError::field("chunked.chunkDelayMs", "must be >= 0"));
        }
        Ok(())
    }

    /// Effective chunk size with the 0-means-default rule applied.
    pub fn effective_chunk_size(&self) -> usize {
        if self.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.chunk_size as usize
        }
    }

    pub fn is_ndjson(&self) -> bool {
        self.format.as_deref() == Some("ndjson")
    }
}
