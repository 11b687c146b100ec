use std::time::Duration;

use thiserror::Error;

/// Backend initialization failure. Once returned, the backend stays in
/// keyword-only mode for the rest of the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("model backend disabled by configuration")]
    Disabled,
    #[error("backend `{backend}` is not available in this build: {reason}")]
    Unsupported {
        backend: &'static str,
        reason: String,
    },
    #[error("model artifacts unavailable: {0}")]
    Artifacts(String),
    #[error("device initialization failed: {0}")]
    Device(String),
    #[error("model initialization failed: {0}")]
    Model(String),
}

/// Single-call generation failure; the caller falls back to keywords.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model is not loaded")]
    NotLoaded,
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("model produced no text")]
    EmptyOutput,
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("inference worker failed: {0}")]
    Worker(String),
}

/// Rejected input. This is the only error the analysis pipeline surfaces.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("text cannot be empty or whitespace only")]
    EmptyText,
    #[error("text is {len} characters long, the limit is {max}")]
    TooLong { len: usize, max: usize },
    #[error("sentence text cannot be empty")]
    EmptySentence,
}
