use crate::changes::ChangeEvent;
use rudderql::Pattern;

/// Decides whether a change event falls inside a query's filter.
///
/// Compilation never fails: texts outside the recognized dialect degrade to
/// label-only or match-all patterns (see [`rudderql::compile`]).
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    pattern: Pattern,
}

impl QueryMatcher {
    pub fn compile(query_text: &str) -> Self { Self { pattern: rudderql::compile(query_text) } }

    pub fn pattern(&self) -> &Pattern { &self.pattern }

    /// Label filter first, then every field predicate against the event's
    /// `after` payload (or `before` for deletes). An event with predicates
    /// but no payload never matches.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.pattern.matches_entity_type(&event.entity_type) {
            return false;
        }
        match event.payload() {
            Some(data) => self.pattern.matches_data(data),
            None => self.pattern.predicates.is_empty(),
        }
    }
}
