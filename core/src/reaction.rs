//! The reaction side of the pipeline: configuration, the object-safe
//! [`Reaction`] contract the dispatcher drives, and [`ReactionBase`], the
//! shared runtime (retry, stats, health) a concrete reaction kind embeds by
//! supplying a [`ReactionHandler`].

use crate::changes::Attributes;
use crate::error::{ErrorKind, ReactionError};
use crate::result::{QueryResult, ResultUpdate, UpdateKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    /// Serialized per reaction, arrival order.
    Sync,
    /// Concurrent up to `max_concurrency`; no per-reaction order guarantee.
    #[default]
    Async,
    /// Grouped delivery: flush at `batch_size` or `batch_window_ms`.
    Batch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    pub batch_size: usize,
    pub batch_window_ms: u64,
    pub throttle_rate_ms: u64,
    pub max_concurrency: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self { mode: ExecutionMode::Async, batch_size: 100, batch_window_ms: 1000, throttle_rate_ms: 0, max_concurrency: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_errors: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            retryable_errors: vec![ErrorKind::Io, ErrorKind::Timeout],
        }
    }
}

impl RetryConfig {
    /// Backoff before the `retry`-th retry (1-based):
    /// `min(initial × multiplier^(retry-1), max)`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
        let ms = (self.initial_backoff_ms as f64 * exp).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

/// Declarative configuration of one reaction instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionConfig {
    pub id: String,
    pub name: String,
    /// Selects the provider in the registry.
    pub kind: String,
    /// Queries this reaction consumes.
    #[serde(default)]
    pub query_ids: Vec<String>,
    /// Optional per-query sub-config, keyed by query id.
    #[serde(default)]
    pub query_configs: HashMap<String, Attributes>,
    /// Kind-specific settings, validated by the provider.
    #[serde(default)]
    pub properties: Attributes,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ReactionConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: kind.into(),
            query_ids: Vec::new(),
            query_configs: HashMap::new(),
            properties: Attributes::new(),
            execution: ExecutionConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_queries(mut self, query_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.query_ids = query_ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn query_config(&self, query_id: &str) -> Option<&Attributes> { self.query_configs.get(query_id) }

    pub fn property_str(&self, name: &str) -> Option<&str> { self.properties.get(name).and_then(|v| v.as_str()) }

    pub fn property_bool(&self, name: &str) -> Option<bool> { self.properties.get(name).and_then(|v| v.as_bool()) }

    pub fn property_u64(&self, name: &str) -> Option<u64> { self.properties.get(name).and_then(|v| v.as_u64()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionHealth {
    pub healthy: bool,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionStats {
    pub total_processed: u64,
    pub total_errors: u64,
    pub added: u64,
    pub updated: u64,
    pub removed: u64,
    pub avg_processing_ms: f64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

/// The contract the dispatcher drives. `process_change` is the single entry
/// point; everything else is lifecycle and observability.
#[async_trait]
pub trait Reaction: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn kind(&self) -> &str;
    fn config(&self) -> &ReactionConfig;

    fn query_ids(&self) -> &[String] { &self.config().query_ids }

    async fn start(&self) -> Result<(), ReactionError>;
    async fn stop(&self) -> Result<(), ReactionError>;
    fn is_running(&self) -> bool;

    async fn process_change(&self, change: &ResultUpdate) -> Result<(), ReactionError>;

    fn health(&self) -> ReactionHealth;
    fn stats(&self) -> ReactionStats;
}

impl std::fmt::Debug for dyn Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction").field("id", &self.id()).field("name", &self.name()).field("kind", &self.kind()).finish()
    }
}

/// The three side-effect callbacks a concrete reaction kind implements, plus
/// optional lifecycle and error hooks. Defaults: updates re-use the added
/// path, removals are ignored, errors are logged.
#[async_trait]
pub trait ReactionHandler: Send + Sync {
    async fn on_added(
        &self,
        result: &QueryResult,
        query_id: &str,
        query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError>;

    async fn on_updated(
        &self,
        _before: &QueryResult,
        after: &QueryResult,
        query_id: &str,
        query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        self.on_added(after, query_id, query_config).await
    }

    async fn on_removed(
        &self,
        _before: &QueryResult,
        _query_id: &str,
        _query_config: Option<&Attributes>,
    ) -> Result<(), ReactionError> {
        Ok(())
    }

    async fn on_error(&self, change: &ResultUpdate, error: &ReactionError) {
        tracing::error!(query_id = %change.query_id, kind = %change.kind, %error, "reaction failed to process change");
    }

    async fn on_start(&self) -> Result<(), ReactionError> { Ok(()) }

    async fn on_stop(&self) -> Result<(), ReactionError> { Ok(()) }
}

#[derive(Default)]
struct StatsCounters {
    total_processed: AtomicU64,
    total_errors: AtomicU64,
    added: AtomicU64,
    updated: AtomicU64,
    removed: AtomicU64,
    processing_micros: AtomicU64,
    last_processed_at: Mutex<Option<DateTime<Utc>>>,
}

/// Shared reaction runtime wrapping a [`ReactionHandler`]: per-query config
/// selection, dispatch by update kind, retry with exponential backoff, stats
/// counters, and the health policy. Counters are atomics; `process_change`
/// may run concurrently when the execution mode allows it.
pub struct ReactionBase<H> {
    config: ReactionConfig,
    handler: H,
    running: AtomicBool,
    stats: StatsCounters,
}

impl<H: ReactionHandler> ReactionBase<H> {
    pub fn new(config: ReactionConfig, handler: H) -> Self {
        Self { config, handler, running: AtomicBool::new(false), stats: StatsCounters::default() }
    }

    pub fn handler(&self) -> &H { &self.handler }

    async fn process_once(&self, change: &ResultUpdate) -> Result<(), ReactionError> {
        let query_config = self.config.query_config(&change.query_id);
        match change.kind {
            UpdateKind::Added => {
                let after = change
                    .after
                    .as_ref()
                    .ok_or_else(|| ReactionError::invalid_state("added change is missing its after result"))?;
                self.handler.on_added(after, &change.query_id, query_config).await?;
                self.stats.added.fetch_add(1, Ordering::Relaxed);
            }
            UpdateKind::Updated => {
                let before = change
                    .before
                    .as_ref()
                    .ok_or_else(|| ReactionError::invalid_state("updated change is missing its before result"))?;
                let after = change
                    .after
                    .as_ref()
                    .ok_or_else(|| ReactionError::invalid_state("updated change is missing its after result"))?;
                self.handler.on_updated(before, after, &change.query_id, query_config).await?;
                self.stats.updated.fetch_add(1, Ordering::Relaxed);
            }
            UpdateKind::Removed => {
                let before = change
                    .before
                    .as_ref()
                    .ok_or_else(|| ReactionError::invalid_state("removed change is missing its before result"))?;
                self.handler.on_removed(before, &change.query_id, query_config).await?;
                self.stats.removed.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: ReactionHandler> Reaction for ReactionBase<H> {
    fn id(&self) -> &str { &self.config.id }

    fn name(&self) -> &str { &self.config.name }

    fn kind(&self) -> &str { &self.config.kind }

    fn config(&self) -> &ReactionConfig { &self.config }

    async fn start(&self) -> Result<(), ReactionError> {
        self.handler.on_start().await?;
        self.running.store(true, Ordering::Release);
        tracing::debug!(reaction_id = %self.config.id, kind = %self.config.kind, "reaction started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ReactionError> {
        self.running.store(false, Ordering::Release);
        self.handler.on_stop().await?;
        tracing::debug!(reaction_id = %self.config.id, "reaction stopped");
        Ok(())
    }

    fn is_running(&self) -> bool { self.running.load(Ordering::Acquire) }

    async fn process_change(&self, change: &ResultUpdate) -> Result<(), ReactionError> {
        if !self.is_running() {
            return Err(ReactionError::invalid_state("reaction is not running"));
        }

        let started = std::time::Instant::now();
        let retry = &self.config.retry;
        let mut retries: u32 = 0;

        loop {
            match self.process_once(change).await {
                Ok(()) => {
                    self.stats.total_processed.fetch_add(1, Ordering::Relaxed);
                    self.stats.processing_micros.fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
                    *self.stats.last_processed_at.lock().unwrap() = Some(Utc::now());
                    return Ok(());
                }
                Err(error) => {
                    self.stats.total_errors.fetch_add(1, Ordering::Relaxed);
                    self.handler.on_error(change, &error).await;

                    let will_retry =
                        retry.enabled && retries < retry.max_attempts && error.is_retryable(&retry.retryable_errors);
                    if !will_retry {
                        return Err(error);
                    }

                    retries += 1;
                    let backoff = retry.backoff(retries);
                    tracing::debug!(
                        reaction_id = %self.config.id,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "retrying change after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn health(&self) -> ReactionHealth {
        if !self.is_running() {
            return ReactionHealth {
                healthy: false,
                status: "STOPPED".to_string(),
                message: Some("reaction is not running".to_string()),
            };
        }
        let processed = self.stats.total_processed.load(Ordering::Relaxed);
        let errors = self.stats.total_errors.load(Ordering::Relaxed);
        if processed > 100 && errors as f64 > 0.10 * processed as f64 {
            ReactionHealth {
                healthy: false,
                status: "UNHEALTHY".to_string(),
                message: Some(format!("{} errors over {} processed changes", errors, processed)),
            }
        } else {
            ReactionHealth { healthy: true, status: "HEALTHY".to_string(), message: None }
        }
    }

    fn stats(&self) -> ReactionStats {
        let total_processed = self.stats.total_processed.load(Ordering::Relaxed);
        let micros = self.stats.processing_micros.load(Ordering::Relaxed);
        let avg_processing_ms =
            if total_processed == 0 { 0.0 } else { micros as f64 / total_processed as f64 / 1000.0 };
        ReactionStats {
            total_processed,
            total_errors: self.stats.total_errors.load(Ordering::Relaxed),
            added: self.stats.added.load(Ordering::Relaxed),
            updated: self.stats.updated.load(Ordering::Relaxed),
            removed: self.stats.removed.load(Ordering::Relaxed),
            avg_processing_ms,
            last_processed_at: *self.stats.last_processed_at.lock().unwrap(),
        }
    }
}
