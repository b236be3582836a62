//! LLM gateway
//!
//! The single path every LLM interaction takes: render the named template,
//! call the model under a hard per-call deadline, fall back through the
//! configured model chain on transient failure, validate the response into
//! the caller's typed schema, account cost, and emit an `llm_call` audit
//! event.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{LlmClient, LlmError, StructuredRequest, TokenUsage};
use crate::config::LlmConfig;
use crate::error::EngineError;
use crate::events::{ActionType, AuditLogger};
use crate::prompts::PromptLoader;

const SYSTEM_PROMPT: &str = "You are the reasoning component of an autonomous \
investigative research engine. Answer only by calling the provided tool with \
an object that satisfies its schema.";

/// Accumulated cost for one purpose tag
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurposeCost {
    pub calls: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_latency_ms: u64,
}

/// Mutex-protected cost accounting, keyed by purpose tag
#[derive(Debug, Default)]
pub struct CostLedger {
    inner: Mutex<HashMap<String, PurposeCost>>,
}

impl CostLedger {
    pub fn record(&self, purpose: &str, usage: TokenUsage, latency: Duration, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entry(purpose.to_string()).or_default();
        entry.calls += 1;
        if !success {
            entry.failures += 1;
        }
        entry.input_tokens += usage.input_tokens;
        entry.output_tokens += usage.output_tokens;
        entry.total_latency_ms += latency.as_millis() as u64;
    }

    /// Sorted snapshot for metadata.json
    pub fn snapshot(&self) -> BTreeMap<String, PurposeCost> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Structured JSON-schema calls with timeout, fallback chain, and cost
/// accounting
pub struct LlmGateway {
    client: Arc<dyn LlmClient>,
    prompts: PromptLoader,
    config: LlmConfig,
    ledger: CostLedger,
    audit: AuditLogger,
}

impl LlmGateway {
    pub fn new(
        client: Arc<dyn LlmClient>,
        prompts: PromptLoader,
        config: LlmConfig,
        audit: AuditLogger,
    ) -> Self {
        Self {
            client,
            prompts,
            config,
            ledger: CostLedger::default(),
            audit,
        }
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    /// Render `template` with `vars` and obtain a `T` from the model.
    ///
    /// The template name doubles as the purpose tag for cost accounting and
    /// audit. Transient failures (timeout, unavailable, schema mismatch)
    /// walk the fallback chain; the last error is returned when the chain
    /// is exhausted.
    pub async fn call<T, V>(
        &self,
        template: &str,
        vars: &V,
        schema: serde_json::Value,
        task_id: Option<u32>,
    ) -> Result<T, EngineError>
    where
        T: DeserializeOwned,
        V: Serialize,
    {
        let prompt = self.prompts.render(template, vars)?;
        let call_id = Uuid::now_v7();
        let timeout = Duration::from_secs(self.config.request_timeout_seconds);
        let chain = std::iter::once(self.config.model.as_str())
            .chain(self.config.fallback_models.iter().map(String::as_str));

        let started = Instant::now();
        let mut attempts: u32 = 0;
        let mut last_err = LlmError::Unavailable("no models configured".to_string());

        for model in chain {
            if attempts > 0 {
                // brief jittered pause before a fallback model, so a
                // provider mid-incident is not hammered back-to-back
                let backoff = Duration::from_millis(50 + rand::random_range(0..150));
                tokio::time::sleep(backoff).await;
            }
            attempts += 1;
            let request = StructuredRequest {
                system: SYSTEM_PROMPT.to_string(),
                prompt: prompt.clone(),
                schema_name: template.to_string(),
                schema: schema.clone(),
                model: model.to_string(),
                max_tokens: self.config.max_tokens,
            };

            let attempt_started = Instant::now();
            let outcome = tokio::time::timeout(timeout, self.client.structured(request)).await;
            let latency = attempt_started.elapsed();

            let response = match outcome {
                Err(_) => {
                    self.ledger
                        .record(template, TokenUsage::default(), latency, false);
                    last_err = LlmError::Timeout(timeout);
                    warn!(%template, %model, "LLM call timed out, trying next model");
                    continue;
                }
                Ok(Err(e)) => {
                    self.ledger
                        .record(template, TokenUsage::default(), latency, false);
                    if e.is_transient() {
                        warn!(%template, %model, error = %e, "transient LLM failure, trying next model");
                        last_err = e;
                        continue;
                    }
                    self.emit_llm_event(template, task_id, call_id, model, attempts, latency, None, false);
                    return Err(EngineError::Llm(e));
                }
                Ok(Ok(response)) => response,
            };

            match serde_json::from_value::<T>(response.value.clone()) {
                Ok(typed) => {
                    self.ledger.record(template, response.usage, latency, true);
                    self.emit_llm_event(
                        template,
                        task_id,
                        call_id,
                        &response.model,
                        attempts,
                        started.elapsed(),
                        Some(response.usage),
                        true,
                    );
                    debug!(%template, model = %response.model, attempts, "LLM call succeeded");
                    return Ok(typed);
                }
                Err(e) => {
                    self.ledger.record(template, response.usage, latency, false);
                    warn!(%template, %model, error = %e, "LLM response failed schema validation");
                    last_err = LlmError::SchemaInvalid(e.to_string());
                }
            }
        }

        self.emit_llm_event(
            template,
            task_id,
            call_id,
            &self.config.model,
            attempts,
            started.elapsed(),
            None,
            false,
        );
        Err(EngineError::Llm(last_err))
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_llm_event(
        &self,
        purpose: &str,
        task_id: Option<u32>,
        call_id: Uuid,
        model: &str,
        attempts: u32,
        latency: Duration,
        usage: Option<TokenUsage>,
        success: bool,
    ) {
        let mut payload = serde_json::json!({
            "call_id": call_id.to_string(),
            "purpose": purpose,
            "model": model,
            "attempts": attempts,
            "latency_ms": latency.as_millis() as u64,
            "success": success,
        });
        if let Some(usage) = usage {
            payload["input_tokens"] = usage.input_tokens.into();
            payload["output_tokens"] = usage.output_tokens.into();
        }
        self.audit.emit(task_id, ActionType::LlmCall, Some(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::spawn_audit_logger;
    use crate::llm::testing::ScriptedLlm;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Decomposition {
        tasks: Vec<Seed>,
    }

    #[derive(Debug, Deserialize)]
    struct Seed {
        query: String,
    }

    fn schema() -> serde_json::Value {
        serde_json::json!({"type": "object", "required": ["tasks"]})
    }

    fn vars() -> serde_json::Value {
        serde_json::json!({"question": "who buys drones", "max_tasks": 4})
    }

    async fn gateway_with(
        client: Arc<ScriptedLlm>,
        config: LlmConfig,
    ) -> (LlmGateway, tempfile::TempDir, tokio::task::JoinHandle<()>) {
        let temp = tempfile::tempdir().unwrap();
        let (audit, join) = spawn_audit_logger(&temp.path().join("log.jsonl"), "run-test").unwrap();
        let gateway = LlmGateway::new(client, PromptLoader::embedded_only(), config, audit);
        (gateway, temp, join)
    }

    #[tokio::test]
    async fn test_call_returns_typed_value() {
        let client = Arc::new(ScriptedLlm::new());
        client.push(
            "task_decomposition",
            serde_json::json!({"tasks": [{"query": "sam.gov drone awards"}]}),
        );
        let (gateway, _temp, _join) = gateway_with(client, LlmConfig::default()).await;

        let out: Decomposition = gateway
            .call("task_decomposition", &vars(), schema(), None)
            .await
            .unwrap();
        assert_eq!(out.tasks.len(), 1);
        assert_eq!(out.tasks[0].query, "sam.gov drone awards");
    }

    #[tokio::test]
    async fn test_schema_mismatch_walks_fallback_chain() {
        let client = Arc::new(ScriptedLlm::new());
        // first model returns junk, fallback returns a valid object
        client.push("task_decomposition", serde_json::json!({"wrong": true}));
        client.push(
            "task_decomposition",
            serde_json::json!({"tasks": [{"query": "retry worked"}]}),
        );
        let config = LlmConfig {
            fallback_models: vec!["fallback-model".to_string()],
            ..LlmConfig::default()
        };
        let (gateway, _temp, _join) = gateway_with(Arc::clone(&client), config).await;

        let out: Decomposition = gateway
            .call("task_decomposition", &vars(), schema(), None)
            .await
            .unwrap();
        assert_eq!(out.tasks[0].query, "retry worked");
        assert_eq!(client.call_count("task_decomposition"), 2);
    }

    #[tokio::test]
    async fn test_exhausted_chain_returns_last_error() {
        let client = Arc::new(ScriptedLlm::new());
        client.push_err("task_decomposition", LlmError::Unavailable("down".into()));
        let (gateway, _temp, _join) = gateway_with(client, LlmConfig::default()).await;

        let err = gateway
            .call::<Decomposition, _>("task_decomposition", &vars(), schema(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Llm(LlmError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_its_own_kind() {
        let client = Arc::new(ScriptedLlm::new());
        client.default_reply("task_decomposition", serde_json::json!({"tasks": []}));
        client.set_delay(Duration::from_millis(300));
        let config = LlmConfig {
            request_timeout_seconds: 0,
            ..LlmConfig::default()
        };
        let (gateway, _temp, _join) = gateway_with(client, config).await;

        let err = gateway
            .call::<Decomposition, _>("task_decomposition", &vars(), schema(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Llm(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_missing_template_fails_before_any_model_call() {
        let client = Arc::new(ScriptedLlm::new());
        let (gateway, _temp, _join) = gateway_with(Arc::clone(&client), LlmConfig::default()).await;

        let err = gateway
            .call::<Decomposition, _>("nonexistent", &vars(), schema(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Prompt(_)));
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ledger_accumulates_per_purpose() {
        let client = Arc::new(ScriptedLlm::new());
        client.default_reply("task_decomposition", serde_json::json!({"tasks": []}));
        let (gateway, _temp, _join) = gateway_with(client, LlmConfig::default()).await;

        for _ in 0..3 {
            let _: Decomposition = gateway
                .call("task_decomposition", &vars(), schema(), None)
                .await
                .unwrap();
        }
        let snapshot = gateway.ledger().snapshot();
        let cost = &snapshot["task_decomposition"];
        assert_eq!(cost.calls, 3);
        assert_eq!(cost.failures, 0);
        assert!(cost.output_tokens > 0);
    }
}
