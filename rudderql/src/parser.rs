use crate::ast::{FieldPredicate, Literal, Pattern};
use crate::error::ParseError;
use crate::grammar::{self, Rule};
use pest::iterators::Pair;
use pest::Parser;

/// Strict parse of a pattern text. Fails on anything outside the recognized
/// dialect; callers that want the lossy behavior use [`compile`] instead.
pub fn parse_pattern(input: &str) -> Result<Pattern, ParseError> {
    let mut pairs =
        grammar::PatternParser::parse(Rule::Pattern, input).map_err(|e| ParseError::SyntaxError(e.to_string()))?;
    let pattern = pairs.next().ok_or(ParseError::Missing("pattern"))?;

    let mut entity_type = None;
    let mut predicates = Vec::new();

    for pair in pattern.into_inner() {
        match pair.as_rule() {
            Rule::MatchClause => {
                let mut inner = pair.into_inner();
                let _var = inner.next().ok_or(ParseError::Missing("match variable"))?;
                let label = inner.next().ok_or(ParseError::Missing("entity label"))?;
                entity_type = Some(label.as_str().to_string());
            }
            Rule::WhereClause => {
                for condition in pair.into_inner() {
                    if let Some(predicate) = parse_condition(condition)? {
                        predicates.push(predicate);
                    }
                }
            }
            Rule::ReturnClause | Rule::EOI => {} // RETURN is accepted but not projected
            _ => return Err(ParseError::UnexpectedRule { expected: "MATCH, WHERE or RETURN", got: pair.as_rule() }),
        }
    }

    Ok(Pattern { entity_type, predicates })
}

/// Lenient compilation: the public entry point for query texts.
///
/// Anything the dialect does not recognize degrades rather than failing:
/// non-equality conditions are dropped clause-by-clause, and a text that does
/// not parse at all falls back to matching by entity label alone (or to
/// match-all when no label can be recovered). Degradations are logged once
/// here, at compile time.
pub fn compile(input: &str) -> Pattern {
    match parse_pattern(input) {
        Ok(pattern) => pattern,
        Err(err) => {
            let entity_type = recover_entity_type(input);
            tracing::warn!(%err, ?entity_type, query = %input, "pattern text not fully recognized, matching by entity label only");
            Pattern { entity_type, predicates: Vec::new() }
        }
    }
}

fn parse_condition(pair: Pair<Rule>) -> Result<Option<FieldPredicate>, ParseError> {
    let text = pair.as_str().to_string();
    let mut inner = pair.into_inner();
    let path = inner.next().ok_or(ParseError::Missing("path"))?;
    let op = inner.next().ok_or(ParseError::Missing("operator"))?;
    let literal = inner.next().ok_or(ParseError::Missing("literal"))?;

    if op.as_str() != "=" {
        tracing::warn!(condition = %text, "ignoring unsupported non-equality condition");
        return Ok(None);
    }

    let field = path.into_inner().nth(1).ok_or(ParseError::Missing("field"))?.as_str().to_string();
    Ok(Some(FieldPredicate { field, value: parse_literal(literal)? }))
}

fn parse_literal(pair: Pair<Rule>) -> Result<Literal, ParseError> {
    let inner = pair.into_inner().next().ok_or(ParseError::Missing("literal value"))?;
    match inner.as_rule() {
        Rule::String => {
            let value = inner.into_inner().next().map(|p| p.as_str().to_string()).unwrap_or_default();
            Ok(Literal::String(value))
        }
        Rule::Number => {
            let s = inner.as_str();
            if s.contains('.') {
                s.parse::<f64>().map(Literal::Float).map_err(|_| ParseError::InvalidNumber(s.to_string()))
            } else {
                s.parse::<i64>().map(Literal::Integer).map_err(|_| ParseError::InvalidNumber(s.to_string()))
            }
        }
        Rule::Boolean => Ok(Literal::Boolean(inner.as_str().eq_ignore_ascii_case("true"))),
        other => Err(ParseError::UnexpectedRule { expected: "string, number or boolean", got: other }),
    }
}

/// Best-effort label extraction for texts the grammar rejects: scan for the
/// first `MATCH ( ... : Label ... )` shape and take the label.
fn recover_entity_type(input: &str) -> Option<String> {
    let lower = input.to_ascii_lowercase();
    let at = lower.find("match")?;
    let rest = input.get(at + "match".len()..)?;
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    let inside = rest.get(open + 1..close)?;
    let label: String = inside
        .split(':')
        .nth(1)?
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}
