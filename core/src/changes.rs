use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field map used for event payloads, result rows, and free-form config.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// What a source observed happening to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Backfill of an existing row; handled exactly like [`ChangeKind::Insert`]
    /// by the query executor.
    Snapshot,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::Snapshot => "SNAPSHOT",
        };
        f.write_str(s)
    }
}

/// Immutable record of one observed entity mutation.
///
/// Payload invariants: Insert and Snapshot carry `after` only, Delete carries
/// `before` only, Update carries both. The constructors uphold these; events
/// deserialized from outside are taken as-is and validated downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: String,
    pub kind: ChangeKind,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Attributes>,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Attributes>,
}

impl ChangeEvent {
    fn new(
        kind: ChangeKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        before: Option<Attributes>,
        after: Option<Attributes>,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            before,
            after,
            timestamp: Utc::now(),
            source_id: source_id.into(),
            metadata: None,
        }
    }

    pub fn insert(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        after: Attributes,
        source_id: impl Into<String>,
    ) -> Self {
        Self::new(ChangeKind::Insert, entity_type, entity_id, None, Some(after), source_id)
    }

    pub fn update(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        before: Attributes,
        after: Attributes,
        source_id: impl Into<String>,
    ) -> Self {
        Self::new(ChangeKind::Update, entity_type, entity_id, Some(before), Some(after), source_id)
    }

    pub fn delete(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        before: Attributes,
        source_id: impl Into<String>,
    ) -> Self {
        Self::new(ChangeKind::Delete, entity_type, entity_id, Some(before), None, source_id)
    }

    pub fn snapshot(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        after: Attributes,
        source_id: impl Into<String>,
    ) -> Self {
        Self::new(ChangeKind::Snapshot, entity_type, entity_id, None, Some(after), source_id)
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// The payload the matcher evaluates predicates against: `after` when
    /// present, otherwise `before`.
    pub fn payload(&self) -> Option<&Attributes> { self.after.as_ref().or(self.before.as_ref()) }
}
