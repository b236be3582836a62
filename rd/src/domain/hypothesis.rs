//! Hypothesis: one investigative sub-question within a task

use serde::{Deserialize, Serialize};

/// Where and how to look for evidence supporting a hypothesis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStrategy {
    /// Human-readable source names ("USAJobs", "Twitter"). Resolved against
    /// the registry's display-name map at execution time; unresolved names
    /// are logged and skipped, never silently dropped.
    pub sources: Vec<String>,
    /// Entity types the hypothesis expects to surface (person, contract, unit)
    #[serde(default)]
    pub expected_entities: Vec<String>,
    /// Keywords that signal a relevant result
    #[serde(default)]
    pub signals: Vec<String>,
}

/// A single investigative sub-question with an associated search strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    /// Unique within the owning task
    pub id: u32,
    pub statement: String,
    pub strategy: SearchStrategy,
    /// 0-100
    pub confidence: u8,
    /// 1-N within the task
    pub priority: u32,
    pub rationale: String,
}

impl Hypothesis {
    /// Signals joined for prompt interpolation
    pub fn signals_line(&self) -> String {
        self.strategy.signals.join(", ")
    }

    /// Expected entity types joined for prompt interpolation
    pub fn expected_entities_line(&self) -> String {
        self.strategy.expected_entities.join(", ")
    }
}
