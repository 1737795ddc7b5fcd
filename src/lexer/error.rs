use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("Unexpected character '{character}' at {line}:{column}")]
    UnexpectedCharacter {
        character: char,
        line: usize,
        column: usize,
    },
    #[error("Invalid integer literal '{literal}' at {line}:{column}")]
    InvalidIntegerLiteral {
        literal: String,
        line: usize,
        column: usize,
    },
    #[error("Unterminated string literal at {line}:{column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("Unterminated block comment at {line}:{column}")]
    UnterminatedComment { line: usize, column: usize },
}

pub type LexResult<T> = Result<T, LexError>;
