//! Audit event vocabulary
//!
//! Every observable engine action emits one append-only record: timestamp,
//! run id, optional task id, action type, and an action-specific payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    RunStart,
    RunComplete,
    Decomposition,
    Prioritization,
    TaskStart,
    TaskComplete,
    TaskFailed,
    HypothesesGenerated,
    HypothesisQueryGeneration,
    HypothesisExecuted,
    HypothesisFailed,
    RelevanceScoring,
    CoverageAssessment,
    SaturationAssessment,
    FollowUpCreated,
    EntityExtraction,
    LlmCall,
    IntegrationCall,
    IntegrationError,
    Dedup,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStart => "run_start",
            Self::RunComplete => "run_complete",
            Self::Decomposition => "decomposition",
            Self::Prioritization => "prioritization",
            Self::TaskStart => "task_start",
            Self::TaskComplete => "task_complete",
            Self::TaskFailed => "task_failed",
            Self::HypothesesGenerated => "hypotheses_generated",
            Self::HypothesisQueryGeneration => "hypothesis_query_generation",
            Self::HypothesisExecuted => "hypothesis_executed",
            Self::HypothesisFailed => "hypothesis_failed",
            Self::RelevanceScoring => "relevance_scoring",
            Self::CoverageAssessment => "coverage_assessment",
            Self::SaturationAssessment => "saturation_assessment",
            Self::FollowUpCreated => "follow_up_created",
            Self::EntityExtraction => "entity_extraction",
            Self::LlmCall => "llm_call",
            Self::IntegrationCall => "integration_call",
            Self::IntegrationError => "integration_error",
            Self::Dedup => "dedup",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of the execution log
///
/// Bit-level contract: UTF-8, one JSON object per line, newline-terminated.
/// Required keys `timestamp`, `run_id`, `action_type`; optional `task_id`
/// and `action_payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u32>,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_payload: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        run_id: impl Into<String>,
        task_id: Option<u32>,
        action_type: ActionType,
        action_payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.into(),
            task_id,
            action_type,
            action_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ActionType::HypothesisExecuted).unwrap(),
            "\"hypothesis_executed\""
        );
        let parsed: ActionType = serde_json::from_str("\"follow_up_created\"").unwrap();
        assert_eq!(parsed, ActionType::FollowUpCreated);
    }

    #[test]
    fn test_as_str_matches_serde() {
        for action in [
            ActionType::RunStart,
            ActionType::Dedup,
            ActionType::SaturationAssessment,
            ActionType::IntegrationError,
        ] {
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.as_str()));
        }
    }

    #[test]
    fn test_event_omits_empty_optionals() {
        let event = AuditEvent::new("run-1", None, ActionType::RunStart, None);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("task_id").is_none());
        assert!(json.get("action_payload").is_none());
        assert!(json.get("timestamp").is_some());
        assert_eq!(json["run_id"], "run-1");
        assert_eq!(json["action_type"], "run_start");
    }

    #[test]
    fn test_event_round_trip_with_payload() {
        let event = AuditEvent::new(
            "run-1",
            Some(4),
            ActionType::TaskComplete,
            Some(serde_json::json!({"new_results": 12})),
        );
        let line = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&line).unwrap();
        assert_eq!(back.task_id, Some(4));
        assert_eq!(back.action_payload.unwrap()["new_results"], 12);
    }
}
