use thiserror::Error;

/// Raised on the first token the grammar cannot accept; parsing stops there.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Expected {expected}, found {found} at {line}:{column}")]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub line: usize,
    pub column: usize,
}

pub type ParseResult<T> = Result<T, ParseError>;
