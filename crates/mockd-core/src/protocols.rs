//! Configuration shapes for the non-HTTP protocol handlers.
//!
//! The handlers themselves live outside this crate; the envelope only needs
//! the shapes so it can decode, validate, and route.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketSpec {
    pub path: String,
    /// Scripted messages played back to the client in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<serde_json::Value>,
    /// Echo client frames back when no script applies.
    #[serde(default)]
    pub echo: bool,
}

impl WebSocketSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::field("websocket.path", "must begin with '/'"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlSpec {
    pub path: String,
    /// Responses keyed by operation name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub responses: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl GraphQlSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::field("graphql.path", "must begin with '/'"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcSpec {
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub response: serde_json::Value,
    #[serde(default)]
    pub status_code: u32,
}

impl GrpcSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.is_empty() {
            return Err(ConfigError::MissingField("grpc.service".to_string()));
        }
        if self.method.is_empty() {
            return Err(ConfigError::MissingField("grpc.method".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soap_action: Option<String>,
    pub response_xml: String,
}

impl SoapSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::field("soap.path", "must begin with '/'"));
        }
        if self.response_xml.is_empty() {
            return Err(ConfigError::MissingField("soap.responseXml".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttSpec {
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Quality of service level 0, 1, or 2.
    #[serde(default)]
    pub qos: u8,
}

impl MqttSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.is_empty() {
            return Err(ConfigError::MissingField("mqtt.topic".to_string()));
        }
        if self.qos > 2 {
            return Err(ConfigError::field("mqtt.qos", "must be 0, 1, or 2"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSpec {
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clients: Vec<OAuthClient>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub token_ttl: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthClient {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl OAuthSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::MissingField("oauth.issuer".to_string()));
        }
        if self.token_ttl < 0 {
            return Err(ConfigError::field("oauth.tokenTtl", "must be >= 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_path() {
        let spec = WebSocketSpec {
            path: "ws".to_string(),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_mqtt_qos_bounds() {
        let spec = MqttSpec {
            topic: "devices/+/state".to_string(),
            qos: 3,
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_grpc_requires_service_and_method() {
        let spec = GrpcSpec {
            service: "users.v1.Users".to_string(),
            method: String::new(),
            ..Default::default()
        };
        assert!(spec.validate().is_err());
    }
}
