use serde::{Deserialize, Serialize};

/// A literal value on the right-hand side of an equality condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Literal {
    /// Canonical string representation used for lossy comparisons.
    pub fn canonical(&self) -> String {
        match self {
            Literal::String(s) => s.clone(),
            Literal::Integer(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Boolean(b) => b.to_string(),
        }
    }

    /// Compare against a JSON scalar. Numbers compare numerically when both
    /// sides are numeric, everything else falls back to canonical strings.
    /// Nulls, arrays and objects never match.
    pub fn matches_json(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match (self, value) {
            (Literal::Integer(i), Value::Number(n)) => n.as_f64() == Some(*i as f64),
            (Literal::Float(f), Value::Number(n)) => n.as_f64() == Some(*f),
            (Literal::Boolean(b), Value::Bool(v)) => b == v,
            (lit, Value::String(s)) => *s == lit.canonical(),
            (lit, Value::Number(n)) => n.to_string() == lit.canonical(),
            (lit, Value::Bool(b)) => b.to_string() == lit.canonical(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.canonical()),
        }
    }
}

/// A single `var.field = literal` predicate parsed from a WHERE clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    pub value: Literal,
}

impl FieldPredicate {
    /// True when `data` holds the field and its value compares equal.
    pub fn matches(&self, data: &serde_json::Map<String, serde_json::Value>) -> bool {
        data.get(&self.field).map(|v| self.value.matches_json(v)).unwrap_or(false)
    }
}

impl std::fmt::Display for FieldPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{} = {}", self.field, self.value) }
}

/// The compiled form of a continuous-query pattern: an optional entity-type
/// label plus zero or more field-equality predicates.
///
/// A pattern with no label and no predicates matches every event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pattern {
    pub entity_type: Option<String>,
    pub predicates: Vec<FieldPredicate>,
}

impl Pattern {
    /// A pattern that accepts everything.
    pub fn match_all() -> Self { Self::default() }

    /// Entity-type labels compare case-insensitively; an absent label accepts any.
    pub fn matches_entity_type(&self, label: &str) -> bool {
        match &self.entity_type {
            Some(expected) => expected.eq_ignore_ascii_case(label),
            None => true,
        }
    }

    /// Evaluate every predicate against a field map.
    pub fn matches_data(&self, data: &serde_json::Map<String, serde_json::Value>) -> bool {
        self.predicates.iter().all(|p| p.matches(data))
    }
}
