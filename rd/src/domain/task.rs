//! Research task entity and lifecycle

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::coverage::CoverageDecision;
use super::hypothesis::Hypothesis;

/// Default priority for tasks that have not been through prioritization.
/// Priorities run 1-10 with 1 highest.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of what one task execution actually did
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskExecutionSummary {
    pub hypotheses_generated: u32,
    pub hypotheses_executed: u32,
    pub hypotheses_failed: u32,
    pub new_results: u32,
    pub duplicate_results: u32,
    pub initial_search_results: u32,
    pub entities_extracted: u32,
    pub deadline_hit: bool,
}

/// Fixed-shape task metadata plus a typed extras map for debug data
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
    /// Coverage decisions in the order they were made
    pub coverage_decisions: Vec<CoverageDecision>,
    /// Execution summary, set when the task reaches a terminal state
    pub execution: Option<TaskExecutionSummary>,
    /// Adapter- or prompt-specific debug extras
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

/// One research task within a run
///
/// Tasks are records held in the run's flat task list; lifecycle transitions
/// are performed only by the task runner and the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchTask {
    /// Run-local monotone id
    pub id: u32,
    /// What this task investigates
    pub query: String,
    /// Parent task for follow-ups; None for decomposition seeds
    pub parent_id: Option<u32>,
    /// 1-10, 1 = highest
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_reasoning: Option<String>,
    /// 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_value_percent: Option<u8>,
    /// 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_redundancy_percent: Option<u8>,
    pub retry_count: u32,
    pub status: TaskStatus,
    /// Entities attributed to this task
    pub entities: BTreeSet<String>,
    /// Hypotheses in generation order
    pub hypotheses: Vec<Hypothesis>,
    pub metadata: TaskMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResearchTask {
    pub fn new(id: u32, query: impl Into<String>, parent_id: Option<u32>) -> Self {
        Self {
            id,
            query: query.into(),
            parent_id,
            priority: DEFAULT_PRIORITY,
            priority_reasoning: None,
            estimated_value_percent: None,
            estimated_redundancy_percent: None,
            retry_count: 0,
            status: TaskStatus::Pending,
            entities: BTreeSet::new(),
            hypotheses: Vec::new(),
            metadata: TaskMetadata::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// pending -> in_progress on dispatch
    pub fn mark_in_progress(&mut self) {
        debug!(task_id = %self.id, "task -> in_progress");
        self.status = TaskStatus::InProgress;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// in_progress -> completed when the runner exits normally
    pub fn mark_completed(&mut self, summary: TaskExecutionSummary) {
        debug!(task_id = %self.id, "task -> completed");
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.metadata.execution = Some(summary);
    }

    /// in_progress -> failed on unrecoverable error or an empty-handed deadline
    pub fn mark_failed(&mut self, summary: TaskExecutionSummary) {
        debug!(task_id = %self.id, "task -> failed");
        self.status = TaskStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.metadata.execution = Some(summary);
    }

    /// in_progress -> pending, used only when the task body reported no
    /// usable results and the retry budget allows another attempt
    pub fn reset_for_retry(&mut self) {
        debug!(task_id = %self.id, retry = self.retry_count + 1, "task requeued for retry");
        self.status = TaskStatus::Pending;
        self.retry_count += 1;
        self.hypotheses.clear();
    }

    pub fn record_coverage_decision(&mut self, decision: CoverageDecision) {
        self.metadata.coverage_decisions.push(decision);
    }

    /// The last coverage decision, if any
    pub fn final_coverage_decision(&self) -> Option<&CoverageDecision> {
        self.metadata.coverage_decisions.last()
    }
}
