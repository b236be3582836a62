//! Engine error taxonomy
//!
//! A closed set of error kinds. Errors are recovered at the narrowest scope
//! that can continue making useful progress (per source, per hypothesis,
//! per task, per run); only `ConfigInvalid` and startup I/O failures abort
//! the run.

use thiserror::Error;

use crate::llm::LlmError;
use crate::prompts::PromptError;

/// Scope whose deadline fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineScope {
    Run,
    Task,
}

impl std::fmt::Display for DeadlineScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Run => write!(f, "run"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// Errors raised by the research engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Startup configuration is unusable. Fatal, non-zero exit.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// An adapter could not be instantiated. The source is removed from the
    /// live registry for the rest of the run.
    #[error("integration '{source_id}' unavailable: {reason}")]
    IntegrationUnavailable { source_id: String, reason: String },

    /// An adapter search returned an error, timed out, or produced
    /// malformed results. The hypothesis continues with other sources.
    #[error("integration '{source_id}' call failed: {reason}")]
    IntegrationCallFailed { source_id: String, reason: String },

    /// An LLM call failed after the fallback chain was exhausted.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// A prompt template could not be resolved or rendered. Fails the
    /// enclosing LLM call.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// A hypothesis named no sources that resolve against the registry.
    #[error("hypothesis {hypothesis_id} has no resolvable sources")]
    NoResolvableSources { hypothesis_id: u32 },

    /// A per-task or per-run deadline fired. Orderly shutdown of the
    /// affected scope.
    #[error("{scope} deadline exceeded")]
    DeadlineExceeded { scope: DeadlineScope },

    /// The audit log sink cannot be written. Warned once, never fatal.
    #[error("audit sink unavailable")]
    SinkUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// True for errors that abort the whole run rather than a narrower scope
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::ConfigInvalid(_) | EngineError::Io(_))
    }
}
