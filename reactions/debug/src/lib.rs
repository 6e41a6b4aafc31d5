//! The `debug` reaction kind: logs every change it receives. With
//! `verbose: true` changes are logged at info level with their full payload,
//! otherwise a one-line summary at debug level.

use async_trait::async_trait;
use rudder_core::{
    Attributes, ConfigSchema, EngineError, PropertyKind, PropertySchema, QueryResult, Reaction, ReactionBase,
    ReactionConfig, ReactionError, ReactionHandler, ReactionProvider, ValidationReport,
};
use std::sync::Arc;

pub const KIND: &str = "debug";

pub struct DebugHandler {
    verbose: bool,
}

impl DebugHandler {
    pub fn new(verbose: bool) -> Self { Self { verbose } }

    fn payload(result: &QueryResult) -> String {
        serde_json::to_string(&result.data).unwrap_or_else(|_| "<unserializable>".to_string())
    }
}

#[async_trait]
impl ReactionHandler for DebugHandler {
    async fn on_added(
        &self,
        result: &QueryResult,
        query_id: &str,
        _query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        if self.verbose {
            tracing::info!(query_id, result_id = %result.result_id, data = %Self::payload(result), "result added");
        } else {
            tracing::debug!(query_id, result_id = %result.result_id, "result added");
        }
        Ok(())
    }

    async fn on_updated(
        &self,
        before: &QueryResult,
        after: &QueryResult,
        query_id: &str,
        _query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        if self.verbose {
            tracing::info!(
                query_id,
                result_id = %after.result_id,
                before = %Self::payload(before),
                after = %Self::payload(after),
                "result updated"
            );
        } else {
            tracing::debug!(query_id, result_id = %after.result_id, "result updated");
        }
        Ok(())
    }

    async fn on_removed(
        &self,
        before: &QueryResult,
        query_id: &str,
        _query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        if self.verbose {
            tracing::info!(query_id, result_id = %before.result_id, data = %Self::payload(before), "result removed");
        } else {
            tracing::debug!(query_id, result_id = %before.result_id, "result removed");
        }
        Ok(())
    }
}

pub struct DebugReactionProvider;

#[async_trait]
impl ReactionProvider for DebugReactionProvider {
    fn kind(&self) -> &str { KIND }

    fn validate(&self, config: &ReactionConfig) -> ValidationReport {
        let mut errors = Vec::new();
        if let Some(value) = config.properties.get("verbose") {
            if !value.is_boolean() {
                errors.push(format!("property 'verbose' must be a boolean, got {value}"));
            }
        }
        ValidationReport::invalid(errors)
    }

    async fn create(&self, config: &ReactionConfig) -> Result<Arc<dyn Reaction>, EngineError> {
        let verbose = config.property_bool("verbose").unwrap_or(false);
        Ok(Arc::new(ReactionBase::new(config.clone(), DebugHandler::new(verbose))))
    }

    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema {
            kind: KIND.to_string(),
            description: "Logs every result change".to_string(),
            properties: vec![PropertySchema::new(
                "verbose",
                PropertyKind::Boolean,
                false,
                "Log full payloads at info level",
            )
            .with_default(serde_json::Value::Bool(false))],
        }
    }
}
