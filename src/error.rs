use thiserror::Error;

use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::semantic::SemanticError;

/// First failure of the front half of the pipeline. Later stages never run
/// once one of these is produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
}

impl CompileError {
    /// Name of the stage that failed, as shown by the driver.
    pub fn stage(&self) -> &'static str {
        match self {
            CompileError::Lex(_) => "Lexer",
            CompileError::Parse(_) => "Parser",
            CompileError::Semantic(_) => "Semantic",
        }
    }
}
