//! Top-level orchestrator: owns the source/query/reaction registries, the
//! change and result buses, and the lifecycle that wires them together.

use crate::bus::EventBus;
use crate::changes::ChangeEvent;
use crate::dispatcher::ChangeDispatcher;
use crate::error::EngineError;
use crate::query::{ContinuousQuery, QueryExecutor};
use crate::reaction::ReactionConfig;
use crate::registry::{ReactionProvider, ReactionRegistry};
use crate::result::ResultUpdate;
use crate::source::Source;
use append_only_vec::AppendOnlyVec;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EngineStatus {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Created => "CREATED",
            EngineStatus::Starting => "STARTING",
            EngineStatus::Running => "RUNNING",
            EngineStatus::Stopping => "STOPPING",
            EngineStatus::Stopped => "STOPPED",
            EngineStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// The Rudder engine. Cheap to clone; all clones share state.
///
/// Lifecycle: `Created → Starting → Running → Stopping → Stopped`, with
/// `Error` terminal. `start` is legal from Created and Stopped; `stop` is a
/// no-op unless Running. Sources, queries, and reactions may be added at any
/// time; additions while Running are wired immediately.
pub struct RudderEngine(Arc<EngineInner>);

struct EngineInner {
    status: Mutex<EngineStatus>,
    sources: AppendOnlyVec<Arc<dyn Source>>,
    queries: AppendOnlyVec<Arc<QueryExecutor>>,
    reactions: AppendOnlyVec<ReactionConfig>,
    registry: Arc<ReactionRegistry>,
    dispatcher: ChangeDispatcher,
    /// Replaced with fresh buses on every start so the engine can be
    /// restarted after a stop.
    change_bus: Mutex<EventBus<ChangeEvent>>,
    result_bus: Mutex<EventBus<ResultUpdate>>,
    stopping: AtomicBool,
    shutdown: Notify,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Clone for RudderEngine {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl Default for RudderEngine {
    fn default() -> Self { Self::new() }
}

impl RudderEngine {
    pub fn new() -> Self {
        let registry = Arc::new(ReactionRegistry::new());
        let dispatcher = ChangeDispatcher::new(registry.clone());
        Self(Arc::new(EngineInner {
            status: Mutex::new(EngineStatus::Created),
            sources: AppendOnlyVec::new(),
            queries: AppendOnlyVec::new(),
            reactions: AppendOnlyVec::new(),
            registry,
            dispatcher,
            change_bus: Mutex::new(EventBus::new()),
            result_bus: Mutex::new(EventBus::new()),
            stopping: AtomicBool::new(false),
            shutdown: Notify::new(),
            tasks: Mutex::new(Vec::new()),
        }))
    }

    /// Construct with an initial set of sources, queries, and reactions.
    pub fn with(
        sources: Vec<Arc<dyn Source>>,
        queries: Vec<ContinuousQuery>,
        reactions: Vec<ReactionConfig>,
    ) -> Self {
        let engine = Self::new();
        for source in sources {
            engine.0.sources.push(source);
        }
        for query in queries {
            engine.0.queries.push(Arc::new(QueryExecutor::new(query)));
        }
        for reaction in reactions {
            engine.0.reactions.push(reaction);
        }
        engine
    }

    pub fn status(&self) -> EngineStatus { *self.0.status.lock().unwrap() }

    pub fn register_provider(&self, provider: Arc<dyn ReactionProvider>) {
        self.0.registry.register_provider(provider);
    }

    pub fn registry(&self) -> &Arc<ReactionRegistry> { &self.0.registry }

    pub fn dispatcher(&self) -> &ChangeDispatcher { &self.0.dispatcher }

    pub fn sources(&self) -> Vec<Arc<dyn Source>> { self.0.sources.iter().cloned().collect() }

    pub fn queries(&self) -> Vec<Arc<QueryExecutor>> { self.0.queries.iter().cloned().collect() }

    pub fn reactions(&self) -> Vec<ReactionConfig> { self.0.reactions.iter().cloned().collect() }

    fn change_bus(&self) -> EventBus<ChangeEvent> { self.0.change_bus.lock().unwrap().clone() }

    fn result_bus(&self) -> EventBus<ResultUpdate> { self.0.result_bus.lock().unwrap().clone() }

    /// Start everything: queries subscribe to the change bus, reactions are
    /// created/started and subscribed via the dispatcher, then sources begin
    /// streaming. Fails with InvalidState unless Created or Stopped.
    pub async fn start(&self) -> Result<(), EngineError> {
        {
            let mut status = self.0.status.lock().unwrap();
            match *status {
                EngineStatus::Created | EngineStatus::Stopped => *status = EngineStatus::Starting,
                other => {
                    return Err(EngineError::InvalidState { expected: "CREATED or STOPPED", actual: other.to_string() })
                }
            }
        }

        match self.start_inner().await {
            Ok(()) => {
                *self.0.status.lock().unwrap() = EngineStatus::Running;
                tracing::info!(
                    sources = self.0.sources.len(),
                    queries = self.0.queries.len(),
                    reactions = self.0.reactions.len(),
                    "rudder engine running"
                );
                Ok(())
            }
            Err(err) => {
                *self.0.status.lock().unwrap() = EngineStatus::Error;
                tracing::error!(%err, "engine failed to start");
                Err(err)
            }
        }
    }

    async fn start_inner(&self) -> Result<(), EngineError> {
        self.0.stopping.store(false, Ordering::Release);
        {
            *self.0.change_bus.lock().unwrap() = EventBus::new();
            *self.0.result_bus.lock().unwrap() = EventBus::new();
        }

        // routing first, then consumers, then producers, so nothing is missed
        self.spawn_result_router();
        for executor in self.0.queries.iter() {
            self.spawn_query_task(executor.clone());
        }
        for config in self.0.reactions.iter() {
            self.wire_reaction(config).await?;
        }
        for source in self.0.sources.iter() {
            self.spawn_source_pump(source.clone());
        }
        Ok(())
    }

    /// Stop in reverse order: reactions, source subscriptions, sources, then
    /// complete both buses and drain the tasks. No-op unless Running.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut status = self.0.status.lock().unwrap();
            if *status != EngineStatus::Running {
                tracing::debug!(status = %*status, "stop requested while not running, ignoring");
                return Ok(());
            }
            *status = EngineStatus::Stopping;
        }
        self.0.stopping.store(true, Ordering::Release);

        for config in self.0.reactions.iter() {
            if let Some(reaction) = self.0.registry.get(&config.id) {
                if let Err(err) = reaction.stop().await {
                    tracing::warn!(reaction_id = %config.id, %err, "reaction failed to stop");
                }
            }
        }

        self.0.shutdown.notify_waiters();
        for source in self.0.sources.iter() {
            if let Err(err) = source.stop().await {
                tracing::warn!(source_id = %source.id(), %err, "source failed to stop");
            }
        }

        self.change_bus().close();
        self.result_bus().close();

        let tasks: Vec<JoinHandle<()>> = self.0.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(%err, "engine task ended abnormally");
            }
        }

        self.0.dispatcher.shutdown().await;

        *self.0.status.lock().unwrap() = EngineStatus::Stopped;
        tracing::info!("rudder engine stopped");
        Ok(())
    }

    /// Register a source; when Running it starts streaming immediately.
    pub fn add_source(&self, source: Arc<dyn Source>) {
        self.0.sources.push(source.clone());
        if self.status() == EngineStatus::Running {
            self.spawn_source_pump(source);
        }
    }

    /// Register a query; when Running it subscribes to the change bus
    /// immediately. Returns the executor that maintains its view.
    pub fn add_query(&self, query: ContinuousQuery) -> Arc<QueryExecutor> {
        let executor = Arc::new(QueryExecutor::new(query));
        self.0.queries.push(executor.clone());
        if self.status() == EngineStatus::Running {
            self.spawn_query_task(executor.clone());
        }
        executor
    }

    /// Register a reaction config; when Running it is created, started, and
    /// subscribed immediately.
    pub async fn add_reaction(&self, config: ReactionConfig) -> Result<(), EngineError> {
        self.0.reactions.push(config.clone());
        if self.status() == EngineStatus::Running {
            self.wire_reaction(&config).await?;
        }
        Ok(())
    }

    async fn wire_reaction(&self, config: &ReactionConfig) -> Result<(), EngineError> {
        let reaction = match self.0.registry.get(&config.id) {
            Some(reaction) => reaction,
            None => self.0.registry.create(config).await?,
        };
        reaction.start().await?;

        for query_id in &config.query_ids {
            self.0.dispatcher.subscribe(query_id, &config.id)?;
        }
        for executor in self.0.queries.iter() {
            if config.query_ids.iter().any(|id| id == executor.id()) {
                self.0.dispatcher.connect_to_query(executor);
            }
        }
        Ok(())
    }

    fn spawn_result_router(&self) {
        let mut updates = self.result_bus().subscribe();
        let dispatcher = self.0.dispatcher.clone();
        let handle = tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                dispatcher.dispatch_change(&update);
            }
        });
        self.0.tasks.lock().unwrap().push(handle);
    }

    fn spawn_query_task(&self, executor: Arc<QueryExecutor>) {
        let mut changes = self.change_bus().subscribe();
        let results = self.result_bus();
        let handle = tokio::spawn(async move {
            while let Some(event) = changes.recv().await {
                for update in executor.process_event(&event) {
                    results.publish(update);
                }
            }
            tracing::debug!(query_id = %executor.id(), "query task finished");
        });
        self.0.tasks.lock().unwrap().push(handle);
    }

    fn spawn_source_pump(&self, source: Arc<dyn Source>) {
        let bus = self.change_bus();
        let inner = self.0.clone();
        let handle = tokio::spawn(async move {
            let mut stream = match source.start().await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!(source_id = %source.id(), %err, "source failed to start");
                    return;
                }
            };
            loop {
                if inner.stopping.load(Ordering::Acquire) {
                    break;
                }
                tokio::select! {
                    _ = inner.shutdown.notified() => break,
                    item = stream.next() => match item {
                        Some(Ok(event)) => {
                            bus.publish(event);
                        }
                        Some(Err(err)) => {
                            // isolated: this source is done, the engine keeps serving the rest
                            tracing::error!(source_id = %source.id(), %err, "source stream failed");
                            break;
                        }
                        None => {
                            tracing::debug!(source_id = %source.id(), "source stream completed");
                            break;
                        }
                    },
                }
            }
        });
        self.0.tasks.lock().unwrap().push(handle);
    }
}
