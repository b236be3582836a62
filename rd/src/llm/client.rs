//! LlmClient trait: one structured, schema-constrained call
//!
//! Each call is independent; no conversation state is kept between calls.
//! The engine always asks for a JSON object matching a schema, never free
//! text, so the trait has a single operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::LlmError;

/// Token accounting for one call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A schema-constrained completion request
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// System prompt framing the engine's role
    pub system: String,
    /// Rendered user prompt
    pub prompt: String,
    /// Name of the schema, used as the forced tool name and for scripting
    /// in tests; the engine passes the purpose tag here
    pub schema_name: String,
    /// JSON schema the response object must satisfy
    pub schema: serde_json::Value,
    /// Model to use for this attempt (primary or a fallback)
    pub model: String,
    pub max_tokens: u32,
}

/// The structured value a model returned, with usage
#[derive(Debug, Clone)]
pub struct StructuredResponse {
    pub value: serde_json::Value,
    pub model: String,
    pub usage: TokenUsage,
}

/// Stateless structured-output LLM client
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Request one JSON object conforming to `request.schema`
    async fn structured(&self, request: StructuredRequest) -> Result<StructuredResponse, LlmError>;
}

/// Scripted client for tests
///
/// Replies are queued per schema name (the engine's purpose tag), so a test
/// can script "the second coverage_assessment call returns stop" without
/// caring how many other calls happen in between.
pub mod testing {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedLlm {
        scripts: Mutex<HashMap<String, VecDeque<Result<serde_json::Value, LlmError>>>>,
        /// Replies used when a purpose's queue is empty
        defaults: Mutex<HashMap<String, serde_json::Value>>,
        /// Artificial latency applied to every call
        delay: Mutex<Option<Duration>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue one reply for the given purpose
        pub fn push(&self, purpose: &str, value: serde_json::Value) -> &Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(purpose.to_string())
                .or_default()
                .push_back(Ok(value));
            self
        }

        /// Queue one failure for the given purpose
        pub fn push_err(&self, purpose: &str, err: LlmError) -> &Self {
            self.scripts
                .lock()
                .unwrap()
                .entry(purpose.to_string())
                .or_default()
                .push_back(Err(err));
            self
        }

        /// Reply used whenever the queue for a purpose is exhausted
        pub fn default_reply(&self, purpose: &str, value: serde_json::Value) -> &Self {
            self.defaults
                .lock()
                .unwrap()
                .insert(purpose.to_string(), value);
            self
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        /// Purposes of every call received, in order
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self, purpose: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.as_str() == purpose)
                .count()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn structured(
            &self,
            request: StructuredRequest,
        ) -> Result<StructuredResponse, LlmError> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(request.schema_name.clone());

            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&request.schema_name)
                .and_then(|queue| queue.pop_front());
            let value = match scripted {
                Some(Ok(value)) => value,
                Some(Err(err)) => return Err(err),
                None => self
                    .defaults
                    .lock()
                    .unwrap()
                    .get(&request.schema_name)
                    .cloned()
                    .ok_or_else(|| {
                        LlmError::Unavailable(format!(
                            "no scripted reply for '{}'",
                            request.schema_name
                        ))
                    })?,
            };

            Ok(StructuredResponse {
                value,
                model: request.model,
                usage: TokenUsage {
                    input_tokens: (request.prompt.len() / 4) as u64,
                    output_tokens: 64,
                },
            })
        }
    }

}
