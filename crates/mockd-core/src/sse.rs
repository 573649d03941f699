//! SSE mock configuration: event definitions, timing, lifecycle, rate
//! limiting, resumption, and termination behavior.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Minimum keepalive interval in seconds when keepalives are enabled.
pub const MIN_KEEPALIVE_SECS: i64 = 5;

/// Default batch size for generators that do not specify a count.
pub const DEFAULT_GENERATOR_COUNT: u64 = 100;

/// Server-Sent Events stream configuration.
///
/// Exactly one event source must be configured: a static `events` list, a
/// `generator`, or a built-in `template`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SseEventDef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateConfig>,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,

    #[serde(default)]
    pub resume: ResumeConfig,

    #[serde(default)]
    pub termination: TerminationConfig,
}

impl SseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sources = [
            !self.events.is_empty(),
            self.generator.is_some(),
            self.template.is_some(),
        ]
        .iter()
        .filter(|s| **s)
        .count();
        match sources {
            0 => {
                return Err(ConfigError::MissingField(
                    "sse.events, sse.generator, or sse.template".to_string(),
                ))
            }
            1 => {}
            _ => {
                return Err(ConfigError::field(
                    "sse",
                    "events, generator, and template are mutually exclusive",
                ))
            }
        }

        for (i, event) in self.events.iter().enumerate() {
            event
                .validate()
                .map_err(|e| ConfigError::field(format!("sse.events[{i}]"), e.to_string()))?;
        }
        if let Some(ref generator) = self.generator {
            generator.validate()?;
        }
        self.timing.validate()?;
        self.lifecycle.validate()?;
        if let Some(ref rate_limit) = self.rate_limit {
            rate_limit.validate()?;
        }
        self.resume.validate()?;
        self.termination.validate()?;
        Ok(())
    }
}

/// A single SSE event definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseEventDef {
    /// Event payload; any JSON-encodable value. Strings are sent verbatim,
    /// everything else is serialized to JSON at encode time.
    pub data: serde_json::Value,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Client reconnection hint in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// Per-event delay override in milliseconds; takes precedence over every
    /// timing mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<i64>,
}

impl SseEventDef {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(delay) = self.delay_ms {
            if delay < 0 {
                return Err(ConfigError::field("delayMs", "must be >= 0"));
            }
        }
        Ok(())
    }
}

/// Delay scheduling between events. At most one mode may be active.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    /// Applied exactly once before the first event.
    #[serde(default)]
    pub initial_delay_ms: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_delay_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random: Option<RandomDelay>,

    /// Index-aligned per-event delays; events past the end fall through to
    /// the next mode in priority order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_event_delays_ms: Vec<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst: Option<BurstTiming>,
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay_ms < 0 {
            return Err(ConfigError::field("timing.initialDelayMs", "must be >= 0"));
        }
        let modes = [
            self.fixed_delay_ms.is_some(),
            self.random.is_some(),
            !self.per_event_delays_ms.is_empty(),
            self.burst.is_some(),
        ]
        .iter()
        .filter(|m| **m)
        .count();
        if modes > 1 {
            return Err(ConfigError::field(
                "timing",
                "at most one timing mode may be configured",
            ));
        }
        if let Some(fixed) = self.fixed_delay_ms {
            if fixed < 0 {
                return Err(ConfigError::field("timing.fixedDelayMs", "must be >= 0"));
            }
        }
        if let Some(ref random) = self.random {
            if random.min_ms < 0 {
                return Err(ConfigError::field("timing.random.minMs", "must be >= 0"));
            }
            if random.max_ms < random.min_ms {
                return Err(ConfigError::field(
                    "timing.random.maxMs",
                    "must be >= minMs",
                ));
            }
        }
        if self.per_event_delays_ms.iter().any(|d| *d < 0) {
            return Err(ConfigError::field(
                "timing.perEventDelaysMs",
                "delays must be >= 0",
            ));
        }
        if let Some(ref burst) = self.burst {
            if burst.count == 0 {
                return Err(ConfigError::field("timing.burst.count", "must be > 0"));
            }
            if burst.interval_ms < 0 || burst.pause_ms < 0 {
                return Err(ConfigError::field("timing.burst", "delays must be >= 0"));
            }
        }
        Ok(())
    }
}

/// Uniform random delay in `[minMs, maxMs]` inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomDelay {
    pub min_ms: i64,
    pub max_ms: i64,
}

/// Emit `count` events at `intervalMs`, then pause for `pauseMs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BurstTiming {
    pub count: u32,
    pub interval_ms: i64,
    pub pause_ms: i64,
}

/// Stream lifecycle limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleConfig {
    /// Keepalive comment interval in seconds; 0 disables keepalives.
    #[serde(default)]
    pub keepalive_interval: i64,

    /// 0 means unlimited.
    #[serde(default)]
    pub max_events: u64,

    /// Close the stream gracefully after this many seconds; 0 disables.
    #[serde(default)]
    pub connection_timeout: i64,

    /// Abruptly drop the connection after this many events; 0 disables.
    #[serde(default)]
    pub simulate_disconnect: u64,
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keepalive_interval != 0 && self.keepalive_interval < MIN_KEEPALIVE_SECS {
            return Err(ConfigError::field(
                "lifecycle.keepaliveInterval",
                format!("must be 0 or >= {MIN_KEEPALIVE_SECS} seconds"),
            ));
        }
        if self.connection_timeout < 0 {
            return Err(ConfigError::field(
                "lifecycle.connectionTimeout",
                "must be >= 0",
            ));
        }
        Ok(())
    }
}

/// Overflow strategy when the token bucket is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategy {
    /// Sleep until a token is available.
    #[default]
    Wait,
    /// Skip the event silently.
    Drop,
    /// Abort the stream.
    Error,
}

/// Token-bucket rate limiting for event emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub events_per_second: f64,

    /// Bucket capacity; 0 defaults to `eventsPerSecond`.
    #[serde(default)]
    pub burst_size: u32,

    #[serde(default)]
    pub strategy: RateLimitStrategy,

    /// Emit `X-RateLimit-*` response headers.
    #[serde(default)]
    pub emit_headers: bool,
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.events_per_second <= 0.0 {
            return Err(ConfigError::field(
                "rateLimit.eventsPerSecond",
                "must be > 0",
            ));
        }
        Ok(())
    }
}

/// Last-Event-ID resumption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Ring buffer capacity for replayable events.
    #[serde(default)]
    pub buffer_size: i64,

    /// Drop buffered events older than this many seconds; 0 disables.
    #[serde(default)]
    pub max_age: i64,
}

impl ResumeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.buffer_size <= 0 {
            return Err(ConfigError::field(
                "resume.bufferSize",
                "must be > 0 when resume is enabled",
            ));
        }
        if self.max_age < 0 {
            return Err(ConfigError::field("resume.maxAge", "must be >= 0"));
        }
        Ok(())
    }
}

/// End-of-stream behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationConfig {
    /// Written on graceful termination before closing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_event: Option<SseEventDef>,

    /// Written when the stream aborts with an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_event: Option<SseEventDef>,

    /// Linger after the final event, in milliseconds.
    #[serde(default)]
    pub close_delay_ms: i64,
}

impl TerminationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.close_delay_ms < 0 {
            return Err(ConfigError::field("termination.closeDelayMs", "must be >= 0"));
        }
        Ok(())
    }
}

/// Dynamic event synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum GeneratorConfig {
    /// Arithmetic sequence, one event per value.
    Sequence {
        #[serde(default)]
        start: i64,
        #[serde(default = "default_increment")]
        increment: i64,
        #[serde(default)]
        count: u64,
        /// Printf-like format with a single `%d` placeholder.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// Walk a JSON schema, expanding placeholder strings per event.
    Random {
        schema: serde_json::Value,
        #[serde(default)]
        count: u64,
    },
    /// Repeat a fixed event list.
    Template {
        events: Vec<SseEventDef>,
        #[serde(default = "default_repeat")]
        repeat: u64,
        #[serde(default)]
        count: u64,
    },
}

fn default_increment() -> i64 {
    1
}

fn default_repeat() -> u64 {
    1
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            GeneratorConfig::Sequence { .. } | GeneratorConfig::Random { .. } => Ok(()),
            GeneratorConfig::Template { events, .. } => {
                if events.is_empty() {
                    Err(ConfigError::field(
                        "generator.events",
                        "template generator requires at least one event",
                    ))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Built-in template reference with free-form parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateConfig {
    pub name: String,

    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one_event() -> Vec<SseEventDef> {
        vec![SseEventDef {
            data: json!("hello"),
            ..Default::default()
        }]
    }

    #[test]
    fn test_exactly_one_source_required() {
        let empty = SseConfig::default();
        assert!(empty.validate().is_err());

        let events_only = SseConfig {
            events: one_event(),
            ..Default::default()
        };
        assert!(events_only.validate().is_ok());

        let events_and_generator = SseConfig {
            events: one_event(),
            generator: Some(GeneratorConfig::Sequence {
                start: 0,
                increment: 1,
                count: 10,
                format: None,
            }),
            ..Default::default()
        };
        assert!(events_and_generator.validate().is_err());

        let all_three = SseConfig {
            events: one_event(),
            generator: Some(GeneratorConfig::Random {
                schema: json!({}),
                count: 1,
            }),
            template: Some(TemplateConfig {
                name: "openai-chat".to_string(),
                params: serde_json::Value::Null,
            }),
            ..Default::default()
        };
        assert!(all_three.validate().is_err());

        let template_only = SseConfig {
            template: Some(TemplateConfig {
                name: "openai-chat".to_string(),
                params: serde_json::Value::Null,
            }),
            ..Default::default()
        };
        assert!(template_only.validate().is_ok());
    }

    #[test]
    fn test_timing_single_mode() {
        let mut config = SseConfig {
            events: one_event(),
            ..Default::default()
        };
        config.timing.fixed_delay_ms = Some(10);
        assert!(config.validate().is_ok());

        config.timing.random = Some(RandomDelay { min_ms: 1, max_ms: 5 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_timing_random_bounds() {
        let mut timing = TimingConfig {
            random: Some(RandomDelay { min_ms: -1, max_ms: 5 }),
            ..Default::default()
        };
        assert!(timing.validate().is_err());

        timing.random = Some(RandomDelay { min_ms: 10, max_ms: 5 });
        assert!(timing.validate().is_err());

        timing.random = Some(RandomDelay { min_ms: 5, max_ms: 5 });
        assert!(timing.validate().is_ok());
    }

    #[test]
    fn test_burst_requires_positive_count() {
        let timing = TimingConfig {
            burst: Some(BurstTiming {
                count: 0,
                interval_ms: 10,
                pause_ms: 100,
            }),
            ..Default::default()
        };
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_keepalive_minimum() {
        let mut lifecycle = LifecycleConfig {
            keepalive_interval: 3,
            ..Default::default()
        };
        assert!(lifecycle.validate().is_err());
        lifecycle.keepalive_interval = 0;
        assert!(lifecycle.validate().is_ok());
        lifecycle.keepalive_interval = 5;
        assert!(lifecycle.validate().is_ok());
    }

    #[test]
    fn test_rate_limit_positive() {
        let limit = RateLimitConfig {
            events_per_second: 0.0,
            burst_size: 0,
            strategy: RateLimitStrategy::Wait,
            emit_headers: false,
        };
        assert!(limit.validate().is_err());
    }

    #[test]
    fn test_resume_buffer_size() {
        let resume = ResumeConfig {
            enabled: true,
            buffer_size: 0,
            max_age: 0,
        };
        assert!(resume.validate().is_err());

        let disabled = ResumeConfig::default();
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_generator_decoding() {
        let g: GeneratorConfig = serde_json::from_value(json!({
            "type": "sequence",
            "start": 5,
            "count": 3,
        }))
        .unwrap();
        match g {
            GeneratorConfig::Sequence {
                start,
                increment,
                count,
                format,
            } => {
                assert_eq!(start, 5);
                assert_eq!(increment, 1);
                assert_eq!(count, 3);
                assert!(format.is_none());
            }
            _ => panic!("expected sequence generator"),
        }
    }

    #[test]
    fn test_event_delay_override_non_negative() {
        let config = SseConfig {
            events: vec![SseEventDef {
                data: json!("x"),
                delay_ms: Some(-1),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
