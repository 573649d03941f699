//! W3C Server-Sent Events wire encoding.
//!
//! Field order within an event: comment lines, `event:`, `id:`, `retry:`,
//! then one `data:` line per newline-delimited segment, terminated by a
//! blank line. No space follows the field colon.

use crate::error::StreamError;
use bytes::Bytes;
use mockd_core::sse::SseEventDef;

/// Maximum encoded data size per event.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// The keepalive comment written on idle ticks.
pub const KEEPALIVE: &[u8] = b": keepalive\n\n";

/// Serialize an event to its SSE byte representation.
pub fn encode_event(event: &SseEventDef) -> Result<Bytes, StreamError> {
    if let Some(ref id) = event.id {
        ensure_line_safe(id)?;
    }
    if let Some(ref event_type) = event.event_type {
        ensure_line_safe(event_type)?;
    }

    let data = stringify_data(&event.data);
    if data.len() > MAX_EVENT_BYTES {
        return Err(StreamError::EventTooLarge { size: data.len() });
    }

    let mut out = String::with_capacity(data.len() + 64);
    if let Some(ref comment) = event.comment {
        for line in comment.split('\n') {
            out.push(':');
            out.push_str(line);
            out.push('\n');
        }
    }
    if let Some(ref event_type) = event.event_type {
        out.push_str("event:");
        out.push_str(event_type);
        out.push('\n');
    }
    if let Some(ref id) = event.id {
        out.push_str("id:");
        out.push_str(id);
        out.push('\n');
    }
    if let Some(retry) = event.retry {
        if retry > 0 {
            out.push_str("retry:");
            out.push_str(&retry.to_string());
            out.push('\n');
        }
    }
    for line in data.split('\n') {
        out.push_str("data:");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Ok(Bytes::from(out))
}

/// Keepalive comment bytes.
pub fn keepalive() -> Bytes {
    Bytes::from_static(KEEPALIVE)
}

/// Stringify event data: strings pass through verbatim, everything else
/// becomes its JSON textual form.
pub fn stringify_data(data: &serde_json::Value) -> String {
    match data {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn ensure_line_safe(value: &str) -> Result<(), StreamError> {
    if value.contains('\r') || value.contains('\n') {
        return Err(StreamError::InvalidEventId(value.to_string()));
    }
    Ok(())
}
