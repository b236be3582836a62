//! Replay: recompute run-level counts from the execution log
//!
//! The audit stream is complete enough that replaying it against empty
//! state reproduces the run summary counts in metadata.json.

use serde::{Deserialize, Serialize};

use super::types::{ActionType, AuditEvent};

/// Counts recovered from an execution log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayCounts {
    pub tasks_executed: u32,
    pub tasks_failed: u32,
    pub results_accumulated: u32,
    pub duplicates_suppressed: u32,
    pub coverage_decisions: u32,
    pub hypotheses_executed: u32,
    pub follow_ups_created: u32,
}

/// Fold an event stream into run counts
pub fn replay(events: &[AuditEvent]) -> ReplayCounts {
    let mut counts = ReplayCounts::default();
    for event in events {
        match event.action_type {
            ActionType::TaskComplete => {
                counts.tasks_executed += 1;
                if let Some(payload) = &event.action_payload {
                    counts.results_accumulated += payload_u32(payload, "new_results");
                    counts.duplicates_suppressed += payload_u32(payload, "duplicate_results");
                }
            }
            ActionType::TaskFailed => counts.tasks_failed += 1,
            ActionType::CoverageAssessment => counts.coverage_decisions += 1,
            ActionType::HypothesisExecuted => counts.hypotheses_executed += 1,
            ActionType::FollowUpCreated => counts.follow_ups_created += 1,
            _ => {}
        }
    }
    counts
}

fn payload_u32(payload: &serde_json::Value, key: &str) -> u32 {
    payload.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32
}
