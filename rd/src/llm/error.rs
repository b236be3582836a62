//! LLM error types

use std::time::Duration;
use thiserror::Error;

/// Errors from structured LLM calls
#[derive(Debug, Error)]
pub enum LlmError {
    /// The per-call deadline fired before the model responded. Cancellation
    /// is treated identically.
    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    /// The model or transport is unavailable (connection refused, missing
    /// credentials, provider outage)
    #[error("LLM unavailable: {0}")]
    Unavailable(String),

    /// The response did not validate against the requested schema
    #[error("LLM response did not match schema: {0}")]
    SchemaInvalid(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Transient failures trigger the fallback-model chain
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout(_) => true,
            LlmError::Unavailable(_) => true,
            LlmError::SchemaInvalid(_) => true,
            LlmError::Network(_) => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout(Duration::from_secs(180)).is_transient());
        assert!(LlmError::Unavailable("down".into()).is_transient());
        assert!(LlmError::SchemaInvalid("missing field".into()).is_transient());
        assert!(
            LlmError::Api {
                status: 529,
                message: "overloaded".into()
            }
            .is_transient()
        );
        assert!(
            LlmError::Api {
                status: 429,
                message: "rate limited".into()
            }
            .is_transient()
        );
        assert!(
            !LlmError::Api {
                status: 401,
                message: "bad key".into()
            }
            .is_transient()
        );
    }
}
