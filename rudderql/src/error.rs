use crate::grammar;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    SyntaxError(String),
    #[error("expected {expected}, got {got:?}")]
    UnexpectedRule { expected: &'static str, got: grammar::Rule },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid number literal: {0}")]
    InvalidNumber(String),
}
