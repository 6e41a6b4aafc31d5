use crate::changes::{Attributes, ChangeEvent, ChangeKind};
use crate::matcher::QueryMatcher;
use crate::result::{result_id, QueryResult, ResultUpdate};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Declarative configuration of one continuous query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousQuery {
    pub id: String,
    pub name: String,
    /// Pattern text in the dialect recognized by [`rudderql`].
    pub query: String,
    /// Sources to listen to; empty means all sources.
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Attributes>,
}

impl ContinuousQuery {
    pub fn new(id: impl Into<String>, name: impl Into<String>, query: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), query: query.into(), source_ids: Vec::new(), config: None }
    }

    pub fn with_source_ids(mut self, source_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.source_ids = source_ids.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-query incremental view maintenance: a result cache keyed by entity,
/// fed one change event at a time, emitting the minimal delta.
///
/// The cache is mutated only by the engine task driving this executor;
/// concurrent readers (`results`, `len`) are safe against those writes.
pub struct QueryExecutor {
    query: ContinuousQuery,
    matcher: QueryMatcher,
    cache: DashMap<String, QueryResult>,
}

impl QueryExecutor {
    pub fn new(query: ContinuousQuery) -> Self {
        let matcher = QueryMatcher::compile(&query.query);
        Self { query, matcher, cache: DashMap::new() }
    }

    pub fn id(&self) -> &str { &self.query.id }

    pub fn query(&self) -> &ContinuousQuery { &self.query }

    pub fn matcher(&self) -> &QueryMatcher { &self.matcher }

    /// Source filter: empty `source_ids` accepts every source.
    pub fn accepts_source(&self, source_id: &str) -> bool {
        self.query.source_ids.is_empty() || self.query.source_ids.iter().any(|s| s == source_id)
    }

    /// Reserved bootstrap hook. Always empty here: initial state arrives as
    /// Snapshot events from the sources.
    pub fn initial_evaluation(&self) -> Vec<QueryResult> { Vec::new() }

    /// Apply one event to the materialized view and return the deltas it
    /// caused (at most one today). Events that cannot be evaluated are
    /// logged and skipped; they do not poison the stream.
    pub fn process_event(&self, event: &ChangeEvent) -> Vec<ResultUpdate> {
        if !self.accepts_source(&event.source_id) {
            return Vec::new();
        }

        let slot = result_id(&self.query.id, &event.entity_type, &event.entity_id);
        match event.kind {
            ChangeKind::Delete => self.remove(&slot),
            ChangeKind::Insert | ChangeKind::Update | ChangeKind::Snapshot => {
                if self.matcher.matches(event) {
                    self.upsert(slot, event)
                } else {
                    self.remove(&slot)
                }
            }
        }
    }

    fn upsert(&self, slot: String, event: &ChangeEvent) -> Vec<ResultUpdate> {
        let Some(after) = event.after.as_ref() else {
            tracing::warn!(
                query_id = %self.query.id,
                event_id = %event.id,
                kind = %event.kind,
                "event is missing its after payload, skipping"
            );
            return Vec::new();
        };
        let new = QueryResult::from_event(&self.query.id, event, after.clone());

        match self.cache.entry(slot) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().same_data(&new) {
                    Vec::new()
                } else {
                    let old = occupied.insert(new.clone());
                    vec![ResultUpdate::updated(old, new)]
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(new.clone());
                vec![ResultUpdate::added(new)]
            }
        }
    }

    fn remove(&self, slot: &str) -> Vec<ResultUpdate> {
        match self.cache.remove(slot) {
            Some((_, old)) => vec![ResultUpdate::removed(old)],
            None => Vec::new(),
        }
    }

    pub fn results(&self) -> Vec<QueryResult> { self.cache.iter().map(|entry| entry.value().clone()).collect() }

    pub fn len(&self) -> usize { self.cache.len() }

    pub fn is_empty(&self) -> bool { self.cache.is_empty() }
}
