use thiserror::Error;

/// First grammar mismatch in a token stream; parsing stops here.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("Expected {expected}, found {found} at line {line}")]
pub struct SyntaxError {
    pub expected: String,
    pub found: String,
    pub line: usize,
}

pub type ParseResult<T> = Result<T, SyntaxError>;
