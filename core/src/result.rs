use crate::changes::{Attributes, ChangeEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Deterministic cache key: the same (query, entity type, entity id) tuple
/// always maps to the same slot.
pub fn result_id(query_id: &str, entity_type: &str, entity_id: &str) -> String {
    format!("{}_{}_{}", query_id, entity_type, entity_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub entity_type: String,
    pub entity_id: String,
    pub source_id: String,
}

/// One row of a query's materialized view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub result_id: String,
    pub query_id: String,
    /// The triggering event's `after` payload, verbatim. The pattern
    /// dialect's RETURN clause is not projected.
    pub data: Attributes,
    pub timestamp: DateTime<Utc>,
    pub metadata: ResultMetadata,
}

impl QueryResult {
    pub fn from_event(query_id: &str, event: &ChangeEvent, data: Attributes) -> Self {
        Self {
            result_id: result_id(query_id, &event.entity_type, &event.entity_id),
            query_id: query_id.to_string(),
            data,
            timestamp: Utc::now(),
            metadata: ResultMetadata {
                entity_type: event.entity_type.clone(),
                entity_id: event.entity_id.clone(),
                source_id: event.source_id.clone(),
            },
        }
    }

    /// Result equality for delta purposes is structural equality of `data`.
    pub fn same_data(&self, other: &QueryResult) -> bool { self.data == other.data }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateKind {
    Added,
    Updated,
    Removed,
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UpdateKind::Added => "ADDED",
            UpdateKind::Updated => "UPDATED",
            UpdateKind::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}

/// The minimal change to a query's result set caused by a single event.
///
/// Added carries `after` only, Removed carries `before` only, Updated carries
/// both with differing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultUpdate {
    pub query_id: String,
    pub kind: UpdateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<QueryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<QueryResult>,
    pub timestamp: DateTime<Utc>,
}

impl ResultUpdate {
    pub fn added(after: QueryResult) -> Self {
        Self {
            query_id: after.query_id.clone(),
            kind: UpdateKind::Added,
            before: None,
            after: Some(after),
            timestamp: Utc::now(),
        }
    }

    pub fn updated(before: QueryResult, after: QueryResult) -> Self {
        Self {
            query_id: after.query_id.clone(),
            kind: UpdateKind::Updated,
            before: Some(before),
            after: Some(after),
            timestamp: Utc::now(),
        }
    }

    pub fn removed(before: QueryResult) -> Self {
        Self {
            query_id: before.query_id.clone(),
            kind: UpdateKind::Removed,
            before: Some(before),
            after: None,
            timestamp: Utc::now(),
        }
    }

    /// The most relevant row for this update: `after` when present, else `before`.
    pub fn result(&self) -> Option<&QueryResult> { self.after.as_ref().or(self.before.as_ref()) }
}
