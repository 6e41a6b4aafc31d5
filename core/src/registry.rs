use crate::error::EngineError;
use crate::reaction::{Reaction, ReactionConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of provider-side config validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self { Self { valid: true, errors: Vec::new() } }

    pub fn invalid(errors: Vec<String>) -> Self { Self { valid: errors.is_empty(), errors } }

    pub fn error(message: impl Into<String>) -> Self { Self { valid: false, errors: vec![message.into()] } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Boolean,
    Integer,
    Float,
    Object,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub kind: PropertyKind,
    pub required: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl PropertySchema {
    pub fn new(name: impl Into<String>, kind: PropertyKind, required: bool, description: impl Into<String>) -> Self {
        Self { name: name.into(), kind, required, description: description.into(), default: None }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Self-description of a reaction kind: what its `properties` accept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSchema {
    pub kind: String,
    pub description: String,
    pub properties: Vec<PropertySchema>,
}

/// Factory and schema for one reaction kind. Providers are registered
/// explicitly with [`ReactionRegistry::register_provider`].
#[async_trait]
pub trait ReactionProvider: Send + Sync {
    /// Unique registry key.
    fn kind(&self) -> &str;

    fn validate(&self, config: &ReactionConfig) -> ValidationReport;

    async fn create(&self, config: &ReactionConfig) -> Result<Arc<dyn Reaction>, EngineError>;

    fn config_schema(&self) -> ConfigSchema;
}

/// Provider lookup plus the live reaction instances, both keyed by string.
pub struct ReactionRegistry {
    providers: DashMap<String, Arc<dyn ReactionProvider>>,
    reactions: DashMap<String, Arc<dyn Reaction>>,
}

impl Default for ReactionRegistry {
    fn default() -> Self { Self::new() }
}

impl ReactionRegistry {
    pub fn new() -> Self { Self { providers: DashMap::new(), reactions: DashMap::new() } }

    pub fn register_provider(&self, provider: Arc<dyn ReactionProvider>) {
        let kind = provider.kind().to_string();
        if self.providers.insert(kind.clone(), provider).is_some() {
            tracing::warn!(kind, "replacing previously registered reaction provider");
        } else {
            tracing::debug!(kind, "registered reaction provider");
        }
    }

    pub fn provider(&self, kind: &str) -> Option<Arc<dyn ReactionProvider>> {
        self.providers.get(kind).map(|entry| entry.value().clone())
    }

    pub fn provider_kinds(&self) -> Vec<String> { self.providers.iter().map(|e| e.key().clone()).collect() }

    pub fn schemas(&self) -> Vec<ConfigSchema> { self.providers.iter().map(|e| e.value().config_schema()).collect() }

    /// Validate and instantiate a reaction from its config.
    pub async fn create(&self, config: &ReactionConfig) -> Result<Arc<dyn Reaction>, EngineError> {
        let provider =
            self.provider(&config.kind).ok_or_else(|| EngineError::UnknownReactionKind(config.kind.clone()))?;

        let report = provider.validate(config);
        if !report.valid {
            return Err(EngineError::InvalidReactionConfig(report.errors));
        }

        let reaction = provider.create(config).await?;
        self.reactions.insert(config.id.clone(), reaction.clone());
        tracing::info!(reaction_id = %config.id, kind = %config.kind, "created reaction");
        Ok(reaction)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Reaction>> { self.reactions.get(id).map(|e| e.value().clone()) }

    pub fn list(&self) -> Vec<Arc<dyn Reaction>> { self.reactions.iter().map(|e| e.value().clone()).collect() }

    /// Stop and forget a reaction instance.
    pub async fn remove(&self, id: &str) -> Result<(), EngineError> {
        let (_, reaction) =
            self.reactions.remove(id).ok_or_else(|| EngineError::ReactionNotFound(id.to_string()))?;
        reaction.stop().await?;
        Ok(())
    }
}
