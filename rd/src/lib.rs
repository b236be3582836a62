//! researchdaemon - autonomous investigative research orchestrator
//!
//! Given a natural-language research question, the engine plans research
//! tasks, executes them against heterogeneous data sources through a
//! uniform integration contract, assesses coverage after each hypothesis,
//! generates follow-up tasks for identified gaps, detects saturation, and
//! synthesizes a final report with entity extraction and evidence
//! attribution.
//!
//! # Core concepts
//!
//! - **Hypothesis-first research**: each task is attacked through testable
//!   hypotheses, each with its own source strategy and search queries.
//! - **Facts from the engine, judgment from the model**: coverage and
//!   saturation decisions are LLM prose, but every number attached to them
//!   is computed from result-store deltas.
//! - **Narrow-scope recovery**: a failed source degrades to the remaining
//!   sources, a failed hypothesis to the remaining hypotheses, a failed
//!   task to the remaining queue; only invalid configuration aborts a run.
//! - **Append-only audit**: every observable action is one JSONL record,
//!   and replaying the log reproduces the run's summary counts.
//!
//! # Modules
//!
//! - [`engine`] - manager, task runner, hypothesis executor, synthesizer
//! - [`integrations`] - adapter contract and lazy registry
//! - [`llm`] - client trait, Anthropic transport, structured-call gateway
//! - [`store`] - deduplicating result store with attribution
//! - [`events`] - audit event stream and replay
//! - [`prompts`] - named prompt templates
//! - [`config`] - configuration types and loading
//! - [`domain`] - run, task, hypothesis, result, coverage types

pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod integrations;
pub mod llm;
pub mod prompts;
pub mod store;

// Re-export commonly used types
pub use config::{Config, HypothesisMode, IntegrationSettings, LlmConfig};
pub use domain::{
    CoverageCall, CoverageDecision, CoverageFacts, Hypothesis, ResearchTask, RunClock, RunContext,
    SaturationRecommendation, SaturationVerdict, SearchResult, SearchStrategy, StoredResult,
    TaskStatus,
};
pub use engine::{EngineContext, Manager, RunSummary, TerminationReason};
pub use error::{DeadlineScope, EngineError};
pub use events::{ActionType, AuditEvent, AuditLogger, ReplayCounts, read_run_events, replay};
pub use integrations::{
    CostHint, Integration, IntegrationError, IntegrationMeta, IntegrationRegistry, QueryOutcome,
    QueryPlan, TaskContext,
};
pub use llm::{AnthropicClient, CostLedger, LlmClient, LlmError, LlmGateway, TokenUsage};
pub use prompts::{PromptError, PromptLoader, TEMPLATE_NAMES};
pub use store::{AddOutcome, ResultStore, StoreSnapshot};
