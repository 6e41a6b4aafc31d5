//! Routes result deltas from queries to their subscribed reactions. Each
//! reaction gets its own delivery worker so a slow or failing reaction never
//! holds up the others; the worker enforces the reaction's execution mode
//! (sync / async / batch), concurrency limit, and throttle.

use crate::error::EngineError;
use crate::query::QueryExecutor;
use crate::reaction::{ExecutionConfig, ExecutionMode, Reaction};
use crate::registry::ReactionRegistry;
use crate::result::ResultUpdate;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

pub struct ChangeDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: Arc<ReactionRegistry>,
    /// query id -> subscribed reaction ids, insertion order.
    subscriptions: DashMap<String, Vec<String>>,
    /// reaction id -> its delivery worker.
    workers: DashMap<String, ReactionWorker>,
}

struct ReactionWorker {
    tx: mpsc::UnboundedSender<ResultUpdate>,
    handle: JoinHandle<()>,
}

impl Clone for ChangeDispatcher {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl ChangeDispatcher {
    pub fn new(registry: Arc<ReactionRegistry>) -> Self {
        Self { inner: Arc::new(DispatcherInner { registry, subscriptions: DashMap::new(), workers: DashMap::new() }) }
    }

    /// Subscribe a reaction to a query's deltas. The reaction handle is
    /// cached in the worker at subscribe time, so dispatching does not go
    /// back through the registry per change.
    pub fn subscribe(&self, query_id: &str, reaction_id: &str) -> Result<(), EngineError> {
        let reaction = self
            .inner
            .registry
            .get(reaction_id)
            .ok_or_else(|| EngineError::ReactionNotFound(reaction_id.to_string()))?;

        self.inner
            .workers
            .entry(reaction_id.to_string())
            .or_insert_with(|| spawn_worker(reaction));

        let mut subscribers = self.inner.subscriptions.entry(query_id.to_string()).or_default();
        if !subscribers.iter().any(|id| id == reaction_id) {
            subscribers.push(reaction_id.to_string());
            tracing::debug!(query_id, reaction_id, "reaction subscribed to query");
        }
        Ok(())
    }

    pub fn unsubscribe(&self, query_id: &str, reaction_id: &str) {
        if let Some(mut subscribers) = self.inner.subscriptions.get_mut(query_id) {
            subscribers.retain(|id| id != reaction_id);
        }
        let still_subscribed =
            self.inner.subscriptions.iter().any(|entry| entry.value().iter().any(|id| id == reaction_id));
        if !still_subscribed {
            // dropping the sender lets the worker drain and exit
            self.inner.workers.remove(reaction_id);
        }
    }

    pub fn subscribers(&self, query_id: &str) -> Vec<String> {
        self.inner.subscriptions.get(query_id).map(|entry| entry.value().clone()).unwrap_or_default()
    }

    /// Fan a delta out to every subscriber of its query. Enqueueing never
    /// blocks; per-reaction failures stay inside that reaction's worker.
    pub fn dispatch_change(&self, change: &ResultUpdate) {
        let Some(subscribers) = self.inner.subscriptions.get(&change.query_id) else {
            return;
        };
        for reaction_id in subscribers.iter() {
            if let Some(worker) = self.inner.workers.get(reaction_id) {
                if worker.tx.send(change.clone()).is_err() {
                    tracing::warn!(reaction_id = %reaction_id, "reaction worker is gone, change dropped");
                }
            }
        }
    }

    /// On query attach: replay the query's initial rows as Added changes.
    pub fn connect_to_query(&self, executor: &QueryExecutor) {
        for row in executor.initial_evaluation() {
            self.dispatch_change(&ResultUpdate::added(row));
        }
    }

    /// Drop all subscriptions and wait for the workers to drain their queues.
    /// In-flight deliveries finish.
    pub async fn shutdown(&self) {
        self.inner.subscriptions.clear();
        let ids: Vec<String> = self.inner.workers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, worker)) = self.inner.workers.remove(&id) {
                drop(worker.tx);
                if let Err(err) = worker.handle.await {
                    tracing::warn!(reaction_id = %id, %err, "reaction worker ended abnormally");
                }
            }
        }
    }
}

fn spawn_worker(reaction: Arc<dyn Reaction>) -> ReactionWorker {
    let (tx, rx) = mpsc::unbounded_channel();
    let exec = reaction.config().execution.clone();
    let handle = tokio::spawn(async move {
        match exec.mode {
            ExecutionMode::Sync => run_serial(reaction, rx, exec).await,
            ExecutionMode::Async => run_concurrent(reaction, rx, exec).await,
            ExecutionMode::Batch => run_batched(reaction, rx, exec).await,
        }
    });
    ReactionWorker { tx, handle }
}

async fn deliver(reaction: &Arc<dyn Reaction>, change: &ResultUpdate) {
    if let Err(err) = reaction.process_change(change).await {
        tracing::warn!(
            reaction_id = %reaction.id(),
            query_id = %change.query_id,
            %err,
            "reaction failed to process change, dropped for this reaction only"
        );
    }
}

/// Sync mode: strictly serial, arrival order, with an optional minimum gap
/// between successive invocation starts.
async fn run_serial(reaction: Arc<dyn Reaction>, mut rx: mpsc::UnboundedReceiver<ResultUpdate>, exec: ExecutionConfig) {
    let throttle = Duration::from_millis(exec.throttle_rate_ms);
    while let Some(change) = rx.recv().await {
        let started = tokio::time::Instant::now();
        deliver(&reaction, &change).await;
        if !throttle.is_zero() {
            tokio::time::sleep_until(started + throttle).await;
        }
    }
}

/// Async mode: up to `max_concurrency` deliveries in flight.
async fn run_concurrent(
    reaction: Arc<dyn Reaction>,
    mut rx: mpsc::UnboundedReceiver<ResultUpdate>,
    exec: ExecutionConfig,
) {
    let limit = exec.max_concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let throttle = Duration::from_millis(exec.throttle_rate_ms);

    while let Some(change) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let started = tokio::time::Instant::now();
        let reaction = reaction.clone();
        tokio::spawn(async move {
            deliver(&reaction, &change).await;
            drop(permit);
        });
        if !throttle.is_zero() {
            tokio::time::sleep_until(started + throttle).await;
        }
    }

    // queue closed: wait for in-flight deliveries before exiting
    let _ = semaphore.acquire_many(limit as u32).await;
}

/// Batch mode: group up to `batch_size` changes, flush when the batch fills
/// or `batch_window_ms` elapses after its first change; deliver serially.
async fn run_batched(reaction: Arc<dyn Reaction>, mut rx: mpsc::UnboundedReceiver<ResultUpdate>, exec: ExecutionConfig) {
    let capacity = exec.batch_size.max(1);
    let window = Duration::from_millis(exec.batch_window_ms.max(1));
    let throttle = Duration::from_millis(exec.throttle_rate_ms);
    let mut batch: Vec<ResultUpdate> = Vec::with_capacity(capacity);

    'outer: loop {
        match rx.recv().await {
            Some(change) => batch.push(change),
            None => break,
        }
        let deadline = tokio::time::Instant::now() + window;

        while batch.len() < capacity {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(change) => batch.push(change),
                    None => {
                        flush(&reaction, &mut batch, throttle).await;
                        break 'outer;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
        flush(&reaction, &mut batch, throttle).await;
    }
}

async fn flush(reaction: &Arc<dyn Reaction>, batch: &mut Vec<ResultUpdate>, throttle: Duration) {
    if batch.is_empty() {
        return;
    }
    tracing::debug!(reaction_id = %reaction.id(), size = batch.len(), "flushing change batch");
    for change in batch.drain(..) {
        let started = tokio::time::Instant::now();
        deliver(reaction, &change).await;
        if !throttle.is_zero() {
            tokio::time::sleep_until(started + throttle).await;
        }
    }
}
