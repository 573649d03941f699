//! Dynamic event synthesis for generator-backed streams.

use crate::templates::expand_placeholders;
use mockd_core::sse::{GeneratorConfig, SseEventDef, DEFAULT_GENERATOR_COUNT};
use serde_json::{json, Value};

/// Produce one batch of events from a generator config.
///
/// Called again (with the counter reset) whenever a stream exhausts its
/// current batch.
pub fn generate_batch(config: &GeneratorConfig) -> Vec<SseEventDef> {
    match config {
        GeneratorConfig::Sequence {
            start,
            increment,
            count,
            format,
        } => sequence(*start, *increment, effective_count(*count), format.as_deref()),
        GeneratorConfig::Random { schema, count } => random(schema, effective_count(*count)),
        GeneratorConfig::Template {
            events,
            repeat,
            count,
        } => template(events, *repeat, *count),
    }
}

fn effective_count(count: u64) -> u64 {
    if count == 0 {
        DEFAULT_GENERATOR_COUNT
    } else {
        count
    }
}

fn sequence(start: i64, increment: i64, count: u64, format: Option<&str>) -> Vec<SseEventDef> {
    (0..count)
        .map(|i| {
            let value = start + (i as i64) * increment;
            let data = match format {
                Some(f) => json!(f.replacen("%d", &value.to_string(), 1)),
                None => json!(value),
            };
            SseEventDef {
                data,
                id: Some(value.to_string()),
                ..Default::default()
            }
        })
        .collect()
}

fn random(schema: &Value, count: u64) -> Vec<SseEventDef> {
    (0..count)
        .map(|i| SseEventDef {
            data: expand_placeholders(schema),
            id: Some(i.to_string()),
            ..Default::default()
        })
        .collect()
}

fn template(events: &[SseEventDef], repeat: u64, count: u64) -> Vec<SseEventDef> {
    let repeat = repeat.max(1);
    let mut out = Vec::new();
    'outer: for _ in 0..repeat {
        for event in events {
            if count > 0 && out.len() as u64 >= count {
                break 'outer;
            }
            let mut event = event.clone();
            event.id = Some((out.len() as u64 + 1).to_string());
            out.push(event);
        }
    }
    out
}
