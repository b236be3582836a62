//! Coverage decisions and the run-level saturation verdict

use serde::{Deserialize, Serialize};

/// Continue or stop the task's hypothesis loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageCall {
    Continue,
    Stop,
}

/// Objective facts about one hypothesis execution
///
/// Computed by the engine from result-store deltas, never by the LLM.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CoverageFacts {
    pub new_results: u32,
    pub duplicate_results: u32,
    /// new / max(1, new + duplicates) x 100, rounded to integer
    pub incremental_gain_percent: u8,
    pub new_entities: u32,
}

/// An LLM judgment about task coverage, with the engine's facts attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageDecision {
    pub decision: CoverageCall,
    /// Opaque prose assessment
    pub assessment: String,
    /// Outstanding gap descriptions; opaque prose
    pub gaps_identified: Vec<String>,
    /// Attached by the engine after the LLM call returns
    pub facts: CoverageFacts,
}

impl CoverageDecision {
    /// A stop with no gaps ends the task loop immediately
    pub fn is_terminal_stop(&self) -> bool {
        self.decision == CoverageCall::Stop && self.gaps_identified.is_empty()
    }
}

/// Recommendation accompanying a saturation verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationRecommendation {
    Continue,
    Stop,
    ContinueLimited,
}

/// Run-level judgment that additional tasks are unlikely to add information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaturationVerdict {
    pub saturated: bool,
    /// 0-100
    pub confidence: u8,
    pub reasoning: String,
    pub recommendation: SaturationRecommendation,
}
