//! Integration contract
//!
//! Every data-source adapter exposes the same four operations; the engine
//! never reaches into adapter internals. Concrete adapters (SAM.gov, DVIDS,
//! USAJobs, social networks, web search) are plug-ins registered with the
//! [`registry::IntegrationRegistry`] at startup.

mod registry;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Hypothesis, SearchResult};

pub use registry::{IntegrationFactory, IntegrationRegistry};

/// Rough cost class of one search against a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostHint {
    Free,
    Metered,
    Expensive,
}

/// Stable description of a source adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationMeta {
    /// Stable id ("sam_gov", "usajobs")
    pub id: String,
    /// Human-readable name ("SAM.gov", "USAJobs") as hypotheses refer to it
    pub display_name: String,
    /// Category ("contracts", "jobs", "social", "web")
    pub category: String,
    pub requires_api_key: bool,
    pub cost_hint: CostHint,
    /// Typical round-trip, for scheduling hints only
    pub latency_hint_ms: u64,
}

/// Task-scoped context handed to query generation
#[derive(Debug, Clone)]
pub struct TaskContext<'a> {
    pub task_id: u32,
    pub task_query: &'a str,
    pub question: &'a str,
}

/// Outcome of `generate_query`
#[derive(Debug, Clone)]
pub enum QueryPlan {
    /// Source-specific parameters plus the reasoning that produced them
    Search {
        params: serde_json::Map<String, serde_json::Value>,
        reasoning: String,
    },
    /// The source cannot contribute to this question
    NotApplicable { reasoning: String },
}

/// Outcome of one `execute_search` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub success: bool,
    /// Total matches the source claims, which may exceed `results.len()`
    pub total: u64,
    /// Ordered as the source returned them
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: u64,
}

/// Adapter-side failures
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// The adapter cannot be constructed (missing key, import failure)
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The external call failed or returned malformed data
    #[error("call failed: {0}")]
    CallFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Uniform adapter interface
#[async_trait]
pub trait Integration: Send + Sync {
    fn metadata(&self) -> &IntegrationMeta;

    /// Fast, non-LLM advisory heuristic
    fn is_relevant(&self, question: &str) -> bool;

    /// Build source-specific search parameters; may call the LLM gateway
    /// internally via the prompt renderer
    async fn generate_query(
        &self,
        question: &str,
        task: &TaskContext<'_>,
        hypothesis: Option<&Hypothesis>,
    ) -> Result<QueryPlan, IntegrationError>;

    /// Perform the external call under the adapter's own timeout
    async fn execute_search(
        &self,
        params: &serde_json::Map<String, serde_json::Value>,
        api_key: Option<&str>,
        limit: usize,
    ) -> Result<QueryOutcome, IntegrationError>;
}

/// Params keys carrying adapter rejection metadata rather than search input
pub const REJECTION_KEYS: [&str; 3] = ["relevant", "rejection_reason", "suggested_reformulation"];

/// Strip rejection metadata from generated params before `execute_search`,
/// returning the rejection reasoning (if any) for the audit log.
pub fn strip_rejection_metadata(
    params: &mut serde_json::Map<String, serde_json::Value>,
) -> Option<String> {
    let mut flagged = false;
    let mut parts = Vec::new();
    for key in REJECTION_KEYS {
        let Some(value) = params.remove(key) else {
            continue;
        };
        flagged = true;
        match key {
            "rejection_reason" => {
                if let Some(reason) = value.as_str() {
                    parts.push(reason.to_string());
                }
            }
            "suggested_reformulation" => {
                if let Some(reformulation) = value.as_str() {
                    parts.push(format!("suggested reformulation: {reformulation}"));
                }
            }
            _ => {}
        }
    }

    if !flagged {
        return None;
    }
    Some(if parts.is_empty() {
        "adapter flagged relevance".to_string()
    } else {
        parts.join("; ")
    })
}

/// In-memory stub adapters for tests
pub mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    /// An adapter that serves a fixed result list
    pub struct StaticIntegration {
        meta: IntegrationMeta,
        results: Vec<SearchResult>,
        fail_with: Option<String>,
        delay: Option<Duration>,
        /// Params observed by execute_search, for wrapper-discipline asserts
        pub seen_params: Mutex<Vec<serde_json::Map<String, serde_json::Value>>>,
    }

    impl StaticIntegration {
        pub fn new(id: &str, display_name: &str, results: Vec<SearchResult>) -> Self {
            Self {
                meta: IntegrationMeta {
                    id: id.to_string(),
                    display_name: display_name.to_string(),
                    category: "test".to_string(),
                    requires_api_key: false,
                    cost_hint: CostHint::Free,
                    latency_hint_ms: 1,
                },
                results,
                fail_with: None,
                delay: None,
                seen_params: Mutex::new(Vec::new()),
            }
        }

        /// Make every search fail with the given message
        pub fn failing(id: &str, display_name: &str, message: &str) -> Self {
            let mut stub = Self::new(id, display_name, Vec::new());
            stub.fail_with = Some(message.to_string());
            stub
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Integration for StaticIntegration {
        fn metadata(&self) -> &IntegrationMeta {
            &self.meta
        }

        fn is_relevant(&self, _question: &str) -> bool {
            true
        }

        async fn generate_query(
            &self,
            _question: &str,
            task: &TaskContext<'_>,
            _hypothesis: Option<&Hypothesis>,
        ) -> Result<QueryPlan, IntegrationError> {
            let mut params = serde_json::Map::new();
            params.insert("query".into(), serde_json::json!(task.task_query));
            Ok(QueryPlan::Search {
                params,
                reasoning: "passthrough task query".to_string(),
            })
        }

        async fn execute_search(
            &self,
            params: &serde_json::Map<String, serde_json::Value>,
            _api_key: Option<&str>,
            limit: usize,
        ) -> Result<QueryOutcome, IntegrationError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.seen_params.lock().unwrap().push(params.clone());
            if let Some(message) = &self.fail_with {
                return Err(IntegrationError::CallFailed(message.clone()));
            }
            let results: Vec<SearchResult> = self
                .results
                .iter()
                .take(limit)
                .cloned()
                .map(|mut r| {
                    if r.source.is_none() {
                        r.source = Some(self.meta.id.clone());
                    }
                    r
                })
                .collect();
            Ok(QueryOutcome {
                success: true,
                total: self.results.len() as u64,
                results,
                error: None,
                response_time_ms: 1,
            })
        }
    }
}
