//! Error types for prompt assembly, tool-call parsing and generation.

use thiserror::Error;

/// Failure reported by the inference engine (tokenizer, detokenizer or decode loop).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Tokenization failed: {0}")]
    Tokenize(String),

    #[error("Detokenization failed: {0}")]
    Detokenize(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Special token {0:?} is not in the vocabulary")]
    UnknownSpecialToken(String),
}

/// Malformed conversation. Fatal to the request, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// No expression in a tool region matched a whitelisted signature.
///
/// Carries the original text so the caller can still pass it through.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid tool call: {text}")]
pub struct ToolCallSyntaxError {
    pub text: String,
}

impl ToolCallSyntaxError {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Errors that end a generation session before or during prompt building.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Inference engine has been released")]
    EngineReleased,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
