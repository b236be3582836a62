//! Coverage assessor
//!
//! After every hypothesis except a task's first, an LLM judges whether the
//! task should continue or stop and names the outstanding gaps. The engine
//! attaches the facts it computed from the result store; the LLM never
//! produces the numbers.

use serde::Deserialize;
use tracing::warn;

use super::EngineContext;
use crate::domain::{CoverageCall, CoverageDecision, CoverageFacts, Hypothesis};
use crate::events::ActionType;

/// Compact record of an earlier hypothesis for the assessment prompt
#[derive(Debug, Clone)]
pub struct PriorHypothesis {
    pub statement: String,
    pub facts: CoverageFacts,
}

#[derive(Debug, Deserialize)]
struct CoverageOutput {
    decision: CoverageCall,
    #[serde(default)]
    assessment: String,
    #[serde(default)]
    gaps_identified: Vec<String>,
}

fn coverage_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "decision": {"type": "string", "enum": ["continue", "stop"]},
            "assessment": {"type": "string"},
            "gaps_identified": {"type": "array", "items": {"type": "string"}},
        },
        "required": ["decision", "assessment", "gaps_identified"],
    })
}

fn facts_block(facts: &CoverageFacts) -> String {
    format!(
        "new results: {} | duplicates: {} | incremental gain: {}% | new entities: {}",
        facts.new_results,
        facts.duplicate_results,
        facts.incremental_gain_percent,
        facts.new_entities
    )
}

/// Assess coverage after one hypothesis execution.
///
/// Advisory: a failed assessment call returns None and the task loop falls
/// back to continuing until its hard ceilings.
pub async fn assess_coverage(
    ctx: &EngineContext,
    task_id: u32,
    task_query: &str,
    hypothesis: &Hypothesis,
    facts: CoverageFacts,
    prior: &[PriorHypothesis],
) -> Option<CoverageDecision> {
    let prior_block = if prior.is_empty() {
        "none".to_string()
    } else {
        prior
            .iter()
            .map(|p| format!("- {} ({})", p.statement, facts_block(&p.facts)))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let vars = serde_json::json!({
        "question": ctx.run.question,
        "task_query": task_query,
        "hypothesis": hypothesis.statement,
        "facts_block": facts_block(&facts),
        "prior_block": prior_block,
    });

    let output: CoverageOutput = match ctx
        .gateway
        .call("coverage_assessment", &vars, coverage_schema(), Some(task_id))
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(task_id, hypothesis_id = hypothesis.id, error = %e,
                "coverage assessment failed; continuing to hard ceilings");
            return None;
        }
    };

    // The facts come from the engine; the LLM's JSON carries none.
    let decision = CoverageDecision {
        decision: output.decision,
        assessment: output.assessment,
        gaps_identified: output.gaps_identified,
        facts,
    };

    ctx.audit.emit(
        Some(task_id),
        ActionType::CoverageAssessment,
        Some(serde_json::json!({
            "hypothesis_id": hypothesis.id,
            "decision": decision.decision,
            "assessment": decision.assessment,
            "gaps_identified": decision.gaps_identified,
            "facts": decision.facts,
        })),
    );

    Some(decision)
}
