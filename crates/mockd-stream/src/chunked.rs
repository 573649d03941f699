//! Chunked transfer and NDJSON streaming.

use crate::error::StreamError;
use crate::writer::EventSink;
use bytes::Bytes;
use mockd_core::chunked::ChunkedConfig;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Content type for the response, by format.
pub fn content_type(config: &ChunkedConfig) -> &'static str {
    if config.is_ndjson() {
        "application/x-ndjson"
    } else {
        "application/octet-stream"
    }
}

/// Stream the configured payload in chunks.
///
/// NDJSON mode writes one serialized item plus newline per chunk; byte mode
/// slices the payload at the effective chunk size. The inter-chunk delay is
/// cancellable and skipped after the final chunk. Returns total bytes
/// written.
pub async fn run_chunked(
    config: &ChunkedConfig,
    sink: Box<dyn EventSink>,
    cancel: CancellationToken,
) -> Result<u64, StreamError> {
    let sink = AsyncMutex::new(sink);
    let delay = Duration::from_millis(config.chunk_delay_ms.max(0) as u64);
    let mut written: u64 = 0;

    if config.is_ndjson() && !config.ndjson_items.is_empty() {
        let count = config.ndjson_items.len();
        for (i, item) in config.ndjson_items.iter().enumerate() {
            let mut line = item.to_string();
            line.push('\n');
            written += write_chunk(&sink, Bytes::from(line)).await?;
            if i + 1 < count {
                sleep_or_cancel(delay, &cancel).await?;
            }
        }
        debug!(items = count, written, "ndjson stream complete");
        return Ok(written);
    }

    let payload: Vec<u8> = if let Some(ref data) = config.data {
        data.clone().into_bytes()
    } else if let Some(ref path) = config.data_file {
        tokio::fs::read(path).await.map_err(StreamError::DataFile)?
    } else {
        Vec::new()
    };

    let chunk_size = config.effective_chunk_size();
    let chunks: Vec<&[u8]> = payload.chunks(chunk_size.max(1)).collect();
    let count = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        written += write_chunk(&sink, Bytes::copy_from_slice(chunk)).await?;
        if i + 1 < count {
            sleep_or_cancel(delay, &cancel).await?;
        }
    }
    debug!(chunks = count, written, "chunked stream complete");
    Ok(written)
}

async fn write_chunk(sink: &AsyncMutex<Box<dyn EventSink>>, chunk: Bytes) -> Result<u64, StreamError> {
    let len = chunk.len() as u64;
    let mut guard = sink.lock().await;
    guard
        .write(chunk)
        .await
        .map_err(StreamError::ClientDisconnected)?;
    guard
        .flush()
        .await
        .map_err(StreamError::ClientDisconnected)?;
    Ok(len)
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), StreamError> {
    if delay.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(StreamError::Closed),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::CaptureSink;
    use serde_json::json;

    #[tokio::test]
    async fn test_byte_chunking_reassembles() {
        let config = ChunkedConfig {
            data: Some("Hello World! This is chunked data.".to_string()),
            chunk_size: 10,
            chunk_delay_ms: 1,
            ..Default::default()
        };
        let sink = CaptureSink::new();
        let written = run_chunked(&config, Box::new(sink.clone()), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.as_string(), "Hello World! This is chunked data.");
        assert_eq!(written, 34);
        // 34 bytes at 10 per chunk => 4 write boundaries.
        assert_eq!(sink.chunks().len(), 4);
        assert_eq!(sink.flushes(), 4);
    }

    #[tokio::test]
    async fn test_ndjson_lines() {
        let config = ChunkedConfig {
            ndjson_items: vec![
                json!({"id": 1, "name": "Alice"}),
                json!({"id": 2, "name": "Bob"}),
                json!({"id": 3, "name": "Charlie"}),
            ],
            format: Some("ndjson".to_string()),
            chunk_delay_ms: 1,
            ..Default::default()
        };
        assert_eq!(content_type(&config), "application/x-ndjson");

        let sink = CaptureSink::new();
        run_chunked(&config, Box::new(sink.clone()), CancellationToken::new())
            .await
            .unwrap();

        let body = sink.as_string();
        let lines: Vec<&str> = body.split('\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, json!({"id": 1, "name": "Alice"}));
        let third: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(third["name"], "Charlie");
        // One write + flush per item.
        assert_eq!(sink.chunks().len(), 3);
    }

    #[tokio::test]
    async fn test_default_chunk_size() {
        let config = ChunkedConfig {
            data: Some("x".repeat(2500)),
            ..Default::default()
        };
        let sink = CaptureSink::new();
        run_chunked(&config, Box::new(sink.clone()), CancellationToken::new())
            .await
            .unwrap();
        // 2500 bytes at the 1024 default => 3 chunks.
        assert_eq!(sink.chunks().len(), 3);
    }

    #[tokio::test]
    async fn test_cancellation_between_chunks() {
        let config = ChunkedConfig {
            data: Some("abcdef".to_string()),
            chunk_size: 2,
            chunk_delay_ms: 5_000,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let sink = CaptureSink::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });
        let result = run_chunked(&config, Box::new(sink.clone()), cancel).await;
        assert!(matches!(result, Err(StreamError::Closed)));
        // First chunk went out before the cancel landed.
        assert_eq!(sink.chunks().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_data_file() {
        let config = ChunkedConfig {
            data_file: Some("/nonexistent/file.bin".to_string()),
            ..Default::default()
        };
        let result = run_chunked(
            &config,
            Box::new(CaptureSink::new()),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(StreamError::DataFile(_))));
    }

    #[tokio::test]
    async fn test_data_file_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"file contents here").unwrap();

        let config = ChunkedConfig {
            data_file: Some(path.to_string_lossy().into_owned()),
            chunk_size: 4,
            ..Default::default()
        };
        let sink = CaptureSink::new();
        run_chunked(&config, Box::new(sink.clone()), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sink.as_string(), "file contents here");
    }

    #[tokio::test]
    async fn test_octet_stream_content_type() {
        let config = ChunkedConfig {
            data: Some("x".to_string()),
            ..Default::default()
        };
        assert_eq!(content_type(&config), "application/octet-stream");
    }
}
