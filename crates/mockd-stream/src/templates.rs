//! Built-in event templates and the placeholder grammar used by random
//! generators.

use crate::error::StreamError;
use mockd_core::ids;
use mockd_core::sse::SseEventDef;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared RNG for template ids and placeholder expansion. Infrequent
/// per-event use, so one process-wide lock is fine.
static TEMPLATE_RNG: Lazy<Mutex<StdRng>> = Lazy::new(|| Mutex::new(StdRng::from_entropy()));

/// Expand a built-in template into its event list.
///
/// Unknown names fail with [`StreamError::TemplateNotFound`], which the
/// handler maps to a 500 at stream open.
pub fn resolve_template(name: &str, params: &Value) -> Result<Vec<SseEventDef>, StreamError> {
    match name {
        "openai-chat" => Ok(openai_chat(params)),
        "notification-stream" => Ok(notification_stream(params)),
        _ => Err(StreamError::TemplateNotFound(name.to_string())),
    }
}

fn openai_chat(params: &Value) -> Vec<SseEventDef> {
    let tokens: Vec<String> = params
        .get("tokens")
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_else(|| {
            vec!["Hello".to_string(), "!".to_string(), " How can I help?".to_string()]
        });
    let model = params
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("gpt-4-mock")
        .to_string();
    let finish_reason = params
        .get("finishReason")
        .and_then(Value::as_str)
        .unwrap_or("stop")
        .to_string();
    let include_done = params
        .get("includeDone")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let delay_per_token = params
        .get("delayPerToken")
        .and_then(Value::as_i64)
        .unwrap_or(50);

    let completion_id = format!("chatcmpl-{}", ids::new_alphanumeric(24));
    let created = unix_seconds();

    let mut events = Vec::with_capacity(tokens.len() + 1);
    let count = tokens.len();
    for (i, token) in tokens.into_iter().enumerate() {
        let last = i + 1 == count;
        let chunk = json!({
            "id": completion_id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "delta": { "content": token },
                "finish_reason": if last { json!(finish_reason) } else { Value::Null },
            }],
        });
        events.push(SseEventDef {
            data: chunk,
            delay_ms: Some(delay_per_token),
            ..Default::default()
        });
    }
    if include_done {
        events.push(SseEventDef {
            data: json!("[DONE]"),
            delay_ms: Some(delay_per_token),
            ..Default::default()
        });
    }
    events
}

fn notification_stream(params: &Value) -> Vec<SseEventDef> {
    let interval = params.get("interval").and_then(Value::as_i64).unwrap_or(0);
    let messages = params
        .get("messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    messages
        .into_iter()
        .map(|message| {
            let event_type = message
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string);
            let payload = message.get("payload").cloned().unwrap_or(Value::Null);
            SseEventDef {
                data: payload,
                event_type,
                delay_ms: Some(interval),
                ..Default::default()
            }
        })
        .collect()
}

/// Expand a placeholder string value.
///
/// `$uuid`, `$timestamp`, `$random(min,max)`, and `$pick(a,b,…)` are
/// recognized; anything else passes through untouched. `$timestamp` and
/// `$random` produce JSON integers.
pub fn expand_placeholder(s: &str) -> Value {
    match s {
        "$uuid" => Value::String(ids::new_uuid()),
        "$timestamp" => json!(unix_seconds()),
        _ => {
            if let Some(args) = parse_call(s, "$random(") {
                let parts: Vec<&str> = args.split(',').map(str::trim).collect();
                if let [min, max] = parts.as_slice() {
                    if let (Ok(min), Ok(max)) = (min.parse::<i64>(), max.parse::<i64>()) {
                        if min <= max {
                            let n = TEMPLATE_RNG.lock().gen_range(min..=max);
                            return json!(n);
                        }
                    }
                }
                Value::String(s.to_string())
            } else if let Some(args) = parse_call(s, "$pick(") {
                let choices: Vec<&str> = args.split(',').map(str::trim).collect();
                if choices.is_empty() {
                    return Value::String(s.to_string());
                }
                let idx = TEMPLATE_RNG.lock().gen_range(0..choices.len());
                Value::String(choices[idx].to_string())
            } else {
                Value::String(s.to_string())
            }
        }
    }
}

/// Recursively expand placeholder strings in a JSON value.
pub fn expand_placeholders(value: &Value) -> Value {
    match value {
        Value::String(s) => expand_placeholder(s),
        Value::Array(items) => Value::Array(items.iter().map(expand_placeholders).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_placeholders(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn parse_call<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    s.strip_prefix(prefix)?.strip_suffix(')')
}

fn unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
