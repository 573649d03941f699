//! The mock envelope: one definition per mock endpoint, tagged by protocol.
//!
//! Decoding is permissive (any well-formed JSON with the right field types
//! is accepted, including the legacy flat HTTP form); every structural rule
//! is enforced by [`Mock::validate`] so the admin path rejects bad
//! definitions before traffic ever sees them.

use crate::error::ConfigError;
use crate::http::{HttpMatcher, HttpResponse, HttpSpec};
use crate::protocols::{GraphQlSpec, GrpcSpec, MqttSpec, OAuthSpec, SoapSpec, WebSocketSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Protocol implemented by a mock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MockType {
    Http,
    Websocket,
    Graphql,
    Grpc,
    Soap,
    Mqtt,
    Oauth,
}

impl MockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MockType::Http => "http",
            MockType::Websocket => "websocket",
            MockType::Graphql => "graphql",
            MockType::Grpc => "grpc",
            MockType::Soap => "soap",
            MockType::Mqtt => "mqtt",
            MockType::Oauth => "oauth",
        }
    }
}

impl std::fmt::Display for MockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mock definition with identity, metadata, and exactly one populated
/// protocol spec matching `mock_type`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mock {
    pub id: String,

    #[serde(rename = "type")]
    pub mock_type: MockType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Canonical folder reference; the `folderId` alias is reconciled into
    /// this field on decode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_sort_key: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_version: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WebSocketSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graphql: Option<GraphQlSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc: Option<GrpcSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soap: Option<SoapSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthSpec>,
}

/// Decoder-side mirror of [`Mock`] that also accepts the legacy flat HTTP
/// form (top-level `matcher`/`response`/`priority`) and the `folderId`
/// alias.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMock {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "type")]
    mock_type: Option<MockType>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    folder_id: Option<String>,
    #[serde(default)]
    meta_sort_key: Option<f64>,
    #[serde(default)]
    workspace_id: Option<String>,
    #[serde(default)]
    sync_version: Option<i64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    http: Option<HttpSpec>,
    #[serde(default)]
    websocket: Option<WebSocketSpec>,
    #[serde(default)]
    graphql: Option<GraphQlSpec>,
    #[serde(default)]
    grpc: Option<GrpcSpec>,
    #[serde(default)]
    soap: Option<SoapSpec>,
    #[serde(default)]
    mqtt: Option<MqttSpec>,
    #[serde(default)]
    oauth: Option<OAuthSpec>,

    // Legacy flat HTTP form.
    #[serde(default)]
    matcher: Option<HttpMatcher>,
    #[serde(default)]
    response: Option<HttpResponse>,
    #[serde(default)]
    priority: Option<u32>,
}

impl<'de> Deserialize<'de> for Mock {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawMock::deserialize(deserializer)?;

        // Legacy detection: flat matcher/response with neither `type` nor
        // `http`. The new form always wins when both are present.
        let is_legacy = raw.mock_type.is_none()
            && raw.http.is_none()
            && (raw.matcher.is_some() || raw.response.is_some());

        let (mock_type, http) = if is_legacy {
            let spec = HttpSpec {
                priority: raw.priority.unwrap_or(0),
                matcher: raw.matcher.unwrap_or_default(),
                response: raw.response,
                sse: None,
                chunked: None,
            };
            (MockType::Http, Some(spec))
        } else {
            let mock_type = raw
                .mock_type
                .ok_or_else(|| serde::de::Error::missing_field("type"))?;
            (mock_type, raw.http)
        };

        let now = Utc::now();
        Ok(Mock {
            id: raw.id.unwrap_or_default(),
            mock_type,
            name: raw.name,
            description: raw.description,
            enabled: raw.enabled,
            parent_id: raw.parent_id.or(raw.folder_id),
            meta_sort_key: raw.meta_sort_key,
            workspace_id: raw.workspace_id,
            sync_version: raw.sync_version,
            created_at: raw.created_at.unwrap_or(now),
            updated_at: raw.updated_at.unwrap_or(now),
            http,
            websocket: raw.websocket,
            graphql: raw.graphql,
            grpc: raw.grpc,
            soap: raw.soap,
            mqtt: raw.mqtt,
            oauth: raw.oauth,
        })
    }
}

impl Mock {
    /// Validate identity, the exactly-one-spec invariant, type/spec
    /// agreement, and the populated spec itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.is_empty() {
            return Err(ConfigError::MissingField("id".to_string()));
        }

        let populated: Vec<&'static str> = [
            ("http", self.http.is_some()),
            ("websocket", self.websocket.is_some()),
            ("graphql", self.graphql.is_some()),
            ("grpc", self.grpc.is_some()),
            ("soap", self.soap.is_some()),
            ("mqtt", self.mqtt.is_some()),
            ("oauth", self.oauth.is_some()),
        ]
        .iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| *name)
        .collect();

        match populated.as_slice() {
            [] => {
                return Err(ConfigError::MissingField(format!(
                    "{} spec",
                    self.mock_type
                )))
            }
            [single] => {
                if *single != self.mock_type.as_str() {
                    return Err(ConfigError::TypeMismatch {
                        mock_type: self.mock_type.to_string(),
                        spec: (*single).to_string(),
                    });
                }
            }
            _ => {
                return Err(ConfigError::field(
                    "mock",
                    format!("multiple specs populated: {}", populated.join(", ")),
                ))
            }
        }

        match self.mock_type {
            MockType::Http => self.http.as_ref().map(HttpSpec::validate),
            MockType::Websocket => self.websocket.as_ref().map(WebSocketSpec::validate),
            MockType::Graphql => self.graphql.as_ref().map(GraphQlSpec::validate),
            MockType::Grpc => self.grpc.as_ref().map(GrpcSpec::validate),
            MockType::Soap => self.soap.as_ref().map(SoapSpec::validate),
            MockType::Mqtt => self.mqtt.as_ref().map(MqttSpec::validate),
            MockType::Oauth => self.oauth.as_ref().map(OAuthSpec::validate),
        }
        .unwrap_or(Ok(()))
    }

    /// The mock is served unless explicitly disabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}
