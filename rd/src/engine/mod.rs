//! Research orchestration engine
//!
//! Control flow: manager -> task runner -> hypothesis executor ->
//! integrations (fan-out) -> result store. The coverage assessor and
//! follow-up generation feed back into the manager's queue. Every component
//! publishes through the audit logger.

mod coverage;
mod hypothesis;
mod manager;
mod synthesizer;
mod task_runner;

use std::collections::HashMap;

use crate::config::Config;
use crate::domain::RunContext;
use crate::events::AuditLogger;
use crate::integrations::IntegrationRegistry;
use crate::llm::LlmGateway;
use crate::store::ResultStore;

pub use coverage::assess_coverage;
pub use hypothesis::{HypothesisOutcome, execute_hypothesis};
pub use manager::{Manager, ManagerState, RunSummary, TerminationReason};
pub use task_runner::{TaskOutcome, run_task};

/// Shared, read-mostly state every component of a run sees
///
/// The result store is the only shared mutable state during a task; it
/// serializes its own writes. Everything else is read-only after engine
/// init.
pub struct EngineContext {
    pub run: RunContext,
    pub config: Config,
    pub gateway: LlmGateway,
    pub registry: IntegrationRegistry,
    pub store: ResultStore,
    pub audit: AuditLogger,
    /// Lowercased display-name -> source-id map, built once at init
    pub source_names: HashMap<String, String>,
}
