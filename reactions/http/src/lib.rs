//! The `http` reaction kind: delivers every result change to a webhook as a
//! JSON body `{queryId, changeType, result | before+after, timestamp}`.
//! Transport failures are retryable (IO / TIMEOUT), client errors are not.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use rudder_core::{
    Attributes, ConfigSchema, EngineError, PropertyKind, PropertySchema, QueryResult, Reaction, ReactionBase,
    ReactionConfig, ReactionError, ReactionHandler, ReactionProvider, ValidationReport,
};
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "http";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const ALLOWED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

pub struct WebhookHandler {
    client: reqwest::Client,
    url: Url,
    method: Method,
}

impl WebhookHandler {
    async fn send(&self, body: serde_json::Value) -> Result<(), ReactionError> {
        let response = self
            .client
            .request(self.method.clone(), self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ReactionError::timeout(format!("webhook request to {} timed out", self.url)).with_cause(err)
                } else {
                    ReactionError::io(format!("webhook request to {} failed", self.url)).with_cause(err)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %self.url, %status, "webhook delivered");
            Ok(())
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(ReactionError::io(format!("webhook returned {status}")))
        } else {
            Err(ReactionError::other(format!("webhook returned {status}")))
        }
    }

    fn json(result: &QueryResult) -> Result<serde_json::Value, ReactionError> {
        serde_json::to_value(result)
            .map_err(|err| ReactionError::serialization("failed to encode query result").with_cause(err))
    }
}

#[async_trait]
impl ReactionHandler for WebhookHandler {
    async fn on_added(
        &self,
        result: &QueryResult,
        query_id: &str,
        _query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        self.send(serde_json::json!({
            "queryId": query_id,
            "changeType": "added",
            "result": Self::json(result)?,
            "timestamp": result.timestamp,
        }))
        .await
    }

    async fn on_updated(
        &self,
        before: &QueryResult,
        after: &QueryResult,
        query_id: &str,
        _query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        self.send(serde_json::json!({
            "queryId": query_id,
            "changeType": "updated",
            "before": Self::json(before)?,
            "after": Self::json(after)?,
            "timestamp": after.timestamp,
        }))
        .await
    }

    async fn on_removed(
        &self,
        before: &QueryResult,
        query_id: &str,
        _query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        self.send(serde_json::json!({
            "queryId": query_id,
            "changeType": "deleted",
            "before": Self::json(before)?,
            "timestamp": before.timestamp,
        }))
        .await
    }
}

pub struct HttpReactionProvider;

impl HttpReactionProvider {
    fn parse_method(config: &ReactionConfig) -> Result<Method, String> {
        match config.property_str("method") {
            None => Ok(Method::POST),
            Some(raw) => {
                let upper = raw.to_ascii_uppercase();
                if ALLOWED_METHODS.contains(&upper.as_str()) {
                    upper.parse::<Method>().map_err(|_| format!("invalid method '{raw}'"))
                } else {
                    Err(format!("method must be one of {}, got '{raw}'", ALLOWED_METHODS.join("/")))
                }
            }
        }
    }

    fn parse_headers(config: &ReactionConfig) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        let Some(value) = config.properties.get("headers") else {
            return Ok(headers);
        };
        let Some(map) = value.as_object() else {
            return Err("property 'headers' must be an object of strings".to_string());
        };
        for (name, value) in map {
            let Some(value) = value.as_str() else {
                return Err(format!("header '{name}' must be a string"));
            };
            let name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| format!("invalid header name '{name}'"))?;
            let value = HeaderValue::from_str(value).map_err(|_| format!("invalid value for header '{name}'"))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn parse_url(config: &ReactionConfig) -> Result<Url, String> {
        let raw = config.property_str("webhookUrl").ok_or("property 'webhookUrl' is required")?;
        Url::parse(raw).map_err(|err| format!("invalid webhookUrl '{raw}': {err}"))
    }
}

#[async_trait]
impl ReactionProvider for HttpReactionProvider {
    fn kind(&self) -> &str { KIND }

    fn validate(&self, config: &ReactionConfig) -> ValidationReport {
        let mut errors = Vec::new();
        if let Err(err) = Self::parse_url(config) {
            errors.push(err);
        }
        if let Err(err) = Self::parse_method(config) {
            errors.push(err);
        }
        if let Err(err) = Self::parse_headers(config) {
            errors.push(err);
        }
        if let Some(value) = config.properties.get("timeoutMs") {
            if value.as_u64().is_none() {
                errors.push(format!("property 'timeoutMs' must be a positive integer, got {value}"));
            }
        }
        ValidationReport::invalid(errors)
    }

    async fn create(&self, config: &ReactionConfig) -> Result<Arc<dyn Reaction>, EngineError> {
        let invalid = EngineError::InvalidReactionConfig;
        let url = Self::parse_url(config).map_err(|e| invalid(vec![e]))?;
        let method = Self::parse_method(config).map_err(|e| invalid(vec![e]))?;
        let headers = Self::parse_headers(config).map_err(|e| invalid(vec![e]))?;
        let timeout = Duration::from_millis(config.property_u64("timeoutMs").unwrap_or(DEFAULT_TIMEOUT_MS));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| invalid(vec![format!("failed to build http client: {err}")]))?;

        Ok(Arc::new(ReactionBase::new(config.clone(), WebhookHandler { client, url, method })))
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema {
            kind: KIND.to_string(),
            description: "Delivers result changes to a webhook as JSON".to_string(),
            properties: vec![
                PropertySchema::new("webhookUrl", PropertyKind::String, true, "Target URL for deliveries"),
                PropertySchema::new("method", PropertyKind::String, false, "HTTP method")
                    .with_default(serde_json::json!("POST")),
                PropertySchema::new("headers", PropertyKind::Object, false, "Extra request headers")
                    .with_default(serde_json::json!({})),
                PropertySchema::new("timeoutMs", PropertyKind::Integer, false, "Per-request timeout")
                    .with_default(serde_json::json!(DEFAULT_TIMEOUT_MS)),
            ],
        }
    }
}
