//! Manager - the run scheduler
//!
//! Decomposes the question into seed tasks, prioritizes the pending queue,
//! dispatches tasks one at a time, generates follow-ups for coverage gaps,
//! detects saturation, and terminates into synthesis. The state machine is
//! strictly sequential within a run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::synthesizer::synthesize;
use super::task_runner::run_task;
use super::EngineContext;
use crate::config::Config;
use crate::domain::{ResearchTask, RunContext, SaturationVerdict, TaskStatus};
use crate::error::EngineError;
use crate::events::{ActionType, spawn_audit_logger};
use crate::integrations::IntegrationRegistry;
use crate::llm::{LlmClient, LlmGateway};
use crate::prompts::PromptLoader;
use crate::store::ResultStore;

/// How long to wait for the audit writer to drain at shutdown
const LOGGER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Scheduler phases; strictly sequential, Terminating is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Initializing,
    Prioritizing,
    Dispatching,
    RunningTask,
    PostTask,
    Terminating,
}

/// Why the manager stopped scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    QueueEmpty,
    RunExpired,
    MaxTasks,
    Saturated,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QueueEmpty => write!(f, "queue_empty"),
            Self::RunExpired => write!(f, "run_expired"),
            Self::MaxTasks => write!(f, "max_tasks"),
            Self::Saturated => write!(f, "saturated"),
        }
    }
}

/// What a run produced, returned to the caller after synthesis
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub question: String,
    pub output_dir: std::path::PathBuf,
    pub termination: TerminationReason,
    pub tasks_created: u32,
    pub tasks_executed: u32,
    pub tasks_failed: u32,
    pub results_accumulated: u32,
    pub duplicates_suppressed: u64,
    pub entities: u32,
}

#[derive(Debug, Deserialize)]
struct DecompositionOutput {
    tasks: Vec<SeedTask>,
}

#[derive(Debug, Deserialize)]
struct SeedTask {
    query: String,
    #[serde(default)]
    #[allow(dead_code)]
    rationale: String,
}

fn decomposition_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "rationale": {"type": "string"},
                    },
                    "required": ["query", "rationale"],
                },
            },
        },
        "required": ["tasks"],
    })
}

#[derive(Debug, Deserialize)]
struct PrioritizationOutput {
    tasks: Vec<TaskPriorityUpdate>,
}

#[derive(Debug, Deserialize)]
struct TaskPriorityUpdate {
    task_id: u32,
    priority: u8,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    estimated_value_percent: Option<u8>,
    #[serde(default)]
    estimated_redundancy_percent: Option<u8>,
}

fn prioritization_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "task_id": {"type": "integer"},
                        "priority": {"type": "integer", "minimum": 1, "maximum": 10},
                        "reasoning": {"type": "string"},
                        "estimated_value_percent": {"type": "integer", "minimum": 0, "maximum": 100},
                        "estimated_redundancy_percent": {"type": "integer", "minimum": 0, "maximum": 100},
                    },
                    "required": ["task_id", "priority", "reasoning"],
                },
            },
        },
        "required": ["tasks"],
    })
}

fn saturation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "saturated": {"type": "boolean"},
            "confidence": {"type": "integer", "minimum": 0, "maximum": 100},
            "reasoning": {"type": "string"},
            "recommendation": {
                "type": "string",
                "enum": ["continue", "stop", "continue_limited"],
            },
        },
        "required": ["saturated", "confidence", "reasoning", "recommendation"],
    })
}

#[derive(Debug, Deserialize)]
struct FollowUpOutput {
    #[serde(default)]
    follow_ups: Vec<FollowUpSpec>,
}

#[derive(Debug, Deserialize)]
struct FollowUpSpec {
    query: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    gap_type: String,
}

fn follow_up_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "follow_ups": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "rationale": {"type": "string"},
                        "gap_type": {"type": "string"},
                    },
                    "required": ["query", "rationale", "gap_type"],
                },
            },
        },
        "required": ["follow_ups"],
    })
}

/// The run scheduler
pub struct Manager {
    ctx: EngineContext,
    tasks: Vec<ResearchTask>,
    state: ManagerState,
    /// Order in which tasks reached a terminal state
    task_execution_order: Vec<u32>,
    follow_up_counts: HashMap<u32, u32>,
    saturation_stop: bool,
    prioritized_once: bool,
    logger_join: Option<JoinHandle<()>>,
}

impl Manager {
    /// Build a manager for one research run.
    ///
    /// Validates configuration, creates the run directory and audit logger,
    /// and freezes the display-name map from the registry.
    pub fn new(
        question: &str,
        config: Config,
        output_root: &Path,
        client: Arc<dyn LlmClient>,
        registry: IntegrationRegistry,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let run = RunContext::create(question, &config, output_root)?;
        let (audit, logger_join) = spawn_audit_logger(&run.log_path(), &run.run_id)?;
        let gateway = LlmGateway::new(
            client,
            PromptLoader::new("."),
            config.llm.clone(),
            audit.clone(),
        );
        let source_names = registry.display_name_map();

        if registry.is_empty() {
            warn!("no integrations registered; hypotheses will have no resolvable sources");
        }

        Ok(Self {
            ctx: EngineContext {
                run,
                config,
                gateway,
                registry,
                store: ResultStore::new(),
                audit,
                source_names,
            },
            tasks: Vec::new(),
            state: ManagerState::Initializing,
            task_execution_order: Vec::new(),
            follow_up_counts: HashMap::new(),
            saturation_stop: false,
            prioritized_once: false,
            logger_join: Some(logger_join),
        })
    }

    /// Run the whole research loop and synthesize the artifacts.
    ///
    /// Always drains the audit writer before returning so the execution log
    /// is complete on disk.
    pub async fn run(mut self) -> Result<RunSummary, EngineError> {
        let outcome = self.run_inner().await;
        let join = self.logger_join.take();
        drop(self);
        if let Some(join) = join {
            let _ = tokio::time::timeout(LOGGER_FLUSH_TIMEOUT, join).await;
        }
        outcome
    }

    async fn run_inner(&mut self) -> Result<RunSummary, EngineError> {
        info!(run_id = %self.ctx.run.run_id, question = %self.ctx.run.question, "run starting");
        self.ctx.audit.emit(
            None,
            ActionType::RunStart,
            Some(serde_json::json!({
                "question": self.ctx.run.question,
                "config": serde_json::to_value(&self.ctx.config)?,
                "sources": self.ctx.registry.list_ids(),
            })),
        );

        self.decompose().await;

        let termination = loop {
            self.state = ManagerState::Prioritizing;

            if self.ctx.run.clock.run_expired() {
                break TerminationReason::RunExpired;
            }
            if self.saturation_stop {
                break TerminationReason::Saturated;
            }
            if !self.tasks.iter().any(|t| t.status == TaskStatus::Pending) {
                break TerminationReason::QueueEmpty;
            }
            let started_or_done = self
                .tasks
                .iter()
                .filter(|t| t.status != TaskStatus::Pending)
                .count() as u32;
            if started_or_done >= self.ctx.config.run.max_tasks {
                break TerminationReason::MaxTasks;
            }

            if self.ctx.config.manager.enabled
                && (!self.prioritized_once || self.ctx.config.manager.reprioritize_after_task)
            {
                self.prioritize().await;
                self.prioritized_once = true;
            }

            self.state = ManagerState::Dispatching;
            let Some(idx) = self.next_task_index() else {
                break TerminationReason::QueueEmpty;
            };

            self.state = ManagerState::RunningTask;
            let outcome = run_task(&self.ctx, &mut self.tasks[idx]).await;

            self.state = ManagerState::PostTask;
            if outcome.requeued {
                debug!(task_id = self.tasks[idx].id, "task requeued, no post-task work");
                continue;
            }
            self.task_execution_order.push(self.tasks[idx].id);

            if self.tasks[idx].status == TaskStatus::Completed {
                self.generate_follow_ups(idx).await;
                self.check_saturation().await;
            }
        };

        self.state = ManagerState::Terminating;
        info!(%termination, "run terminating");

        synthesize(
            &self.ctx,
            &self.tasks,
            termination,
            &self.task_execution_order,
        )
        .await?;

        let summary = self.build_summary(termination);
        self.ctx.audit.emit(
            None,
            ActionType::RunComplete,
            Some(serde_json::to_value(&summary)?),
        );
        Ok(summary)
    }

    /// Current scheduler phase
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Lowest priority number first, ties broken by lower id
    fn next_task_index(&self) -> Option<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Pending)
            .min_by_key(|(_, t)| (t.priority, t.id))
            .map(|(idx, _)| idx)
    }

    fn next_task_id(&self) -> u32 {
        self.tasks.len() as u32 + 1
    }

    /// Seed the queue from the decomposition call. A failed call degrades
    /// to a single task carrying the original question.
    async fn decompose(&mut self) {
        let vars = serde_json::json!({
            "question": self.ctx.run.question,
            "max_tasks": self.ctx.config.run.max_tasks,
        });
        let seeds = match self
            .ctx
            .gateway
            .call::<DecompositionOutput, _>("task_decomposition", &vars, decomposition_schema(), None)
            .await
        {
            Ok(output) => output
                .tasks
                .into_iter()
                .take(self.ctx.config.run.max_tasks as usize)
                .map(|seed| seed.query)
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "decomposition failed; seeding with the question itself");
                vec![self.ctx.run.question.clone()]
            }
        };

        for query in &seeds {
            let task = ResearchTask::new(self.next_task_id(), query.clone(), None);
            self.tasks.push(task);
        }

        self.ctx.audit.emit(
            None,
            ActionType::Decomposition,
            Some(serde_json::json!({
                "count": seeds.len(),
                "queries": seeds,
            })),
        );
        info!(count = self.tasks.len(), "question decomposed into seed tasks");
    }

    /// Re-rank the pending queue. A failed call retains prior priorities.
    async fn prioritize(&mut self) {
        let pending_block = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| {
                format!(
                    "id {} | priority {} | retries {} | {}",
                    t.id, t.priority, t.retry_count, t.query
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        if pending_block.is_empty() {
            return;
        }

        let vars = serde_json::json!({
            "question": self.ctx.run.question,
            "pending_tasks": pending_block,
            "coverage_summary": self.global_coverage_summary(),
        });
        let output: PrioritizationOutput = match self
            .ctx
            .gateway
            .call("task_prioritization", &vars, prioritization_schema(), None)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "prioritization failed; queue keeps prior priorities");
                return;
            }
        };

        let mut updated = 0;
        for update in output.tasks {
            let Some(task) = self
                .tasks
                .iter_mut()
                .find(|t| t.id == update.task_id && t.status == TaskStatus::Pending)
            else {
                warn!(task_id = update.task_id, "prioritization named an unknown pending task");
                continue;
            };
            task.priority = update.priority.clamp(1, 10);
            task.priority_reasoning = Some(update.reasoning);
            task.estimated_value_percent = update.estimated_value_percent.map(|v| v.min(100));
            task.estimated_redundancy_percent =
                update.estimated_redundancy_percent.map(|v| v.min(100));
            updated += 1;
        }

        self.ctx.audit.emit(
            None,
            ActionType::Prioritization,
            Some(serde_json::json!({
                "updated": updated,
                "pending": self
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .map(|t| serde_json::json!({"task_id": t.id, "priority": t.priority}))
                    .collect::<Vec<_>>(),
            })),
        );
    }

    /// Follow-ups target the parent's coverage gaps, subject to the
    /// per-parent ceiling and the run's remaining task budget. A parent
    /// whose final coverage decision was a stop with no gaps gets none.
    async fn generate_follow_ups(&mut self, parent_idx: usize) {
        let parent = &self.tasks[parent_idx];
        let parent_id = parent.id;

        let Some(final_decision) = parent.final_coverage_decision() else {
            return;
        };
        if final_decision.is_terminal_stop() {
            return;
        }
        if self.ctx.run.clock.run_expired() {
            return;
        }

        let budget_remaining = self
            .ctx
            .config
            .run
            .max_tasks
            .saturating_sub(self.tasks.len() as u32);
        let parent_used = *self.follow_up_counts.get(&parent_id).unwrap_or(&0);
        let parent_remaining = match self.ctx.config.follow_up.max_follow_ups_per_task {
            Some(ceiling) => ceiling.saturating_sub(parent_used),
            None => u32::MAX,
        };
        let allowed = budget_remaining.min(parent_remaining);
        if allowed == 0 {
            return;
        }

        let task_summary = {
            let parent = &self.tasks[parent_idx];
            let execution = parent.metadata.execution.clone().unwrap_or_default();
            let gaps: Vec<String> = parent
                .metadata
                .coverage_decisions
                .iter()
                .flat_map(|d| d.gaps_identified.iter().cloned())
                .collect();
            format!(
                "hypotheses executed: {} | new results: {} | gaps: {}",
                execution.hypotheses_executed,
                execution.new_results,
                if gaps.is_empty() {
                    "none".to_string()
                } else {
                    gaps.join("; ")
                }
            )
        };

        let vars = serde_json::json!({
            "question": self.ctx.run.question,
            "task_query": self.tasks[parent_idx].query,
            "task_summary": task_summary,
            "coverage_summary": self.global_coverage_summary(),
            "max_follow_ups": allowed,
        });
        let output: FollowUpOutput = match self
            .ctx
            .gateway
            .call("follow_up_generation", &vars, follow_up_schema(), Some(parent_id))
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(parent_id, error = %e, "follow-up generation failed");
                return;
            }
        };

        for spec in output.follow_ups.into_iter().take(allowed as usize) {
            let id = self.next_task_id();
            let task = ResearchTask::new(id, spec.query.clone(), Some(parent_id));
            self.tasks.push(task);
            *self.follow_up_counts.entry(parent_id).or_insert(0) += 1;
            self.ctx.audit.emit(
                Some(parent_id),
                ActionType::FollowUpCreated,
                Some(serde_json::json!({
                    "follow_up_task_id": id,
                    "query": spec.query,
                    "rationale": spec.rationale,
                    "gap_type": spec.gap_type,
                })),
            );
            debug!(parent_id, follow_up_id = id, "follow-up task created");
        }
    }

    /// Saturation check, run after each completed task over a window of the
    /// last `saturation-check-interval` task summaries. The verdict may
    /// halt scheduling only when allow-saturation-stop is set and the
    /// confidence threshold is met.
    async fn check_saturation(&mut self) {
        if !self.ctx.config.manager.enabled || !self.ctx.config.manager.saturation_detection {
            return;
        }

        let window = self.ctx.config.manager.saturation_check_interval as usize;
        let recent_ids: Vec<u32> = self
            .task_execution_order
            .iter()
            .rev()
            .take(window)
            .rev()
            .copied()
            .collect();
        let recent_block = recent_ids
            .iter()
            .filter_map(|id| self.tasks.iter().find(|t| t.id == *id))
            .map(|task| {
                let execution = task.metadata.execution.clone().unwrap_or_default();
                let assessments: Vec<String> = task
                    .metadata
                    .coverage_decisions
                    .iter()
                    .map(|d| {
                        format!(
                            "{:?}: {} (gaps: {})",
                            d.decision,
                            d.assessment,
                            d.gaps_identified.len()
                        )
                    })
                    .collect();
                format!(
                    "task {}: {} | hypotheses {} | new {} | duplicates {} | {}",
                    task.id,
                    task.query,
                    execution.hypotheses_executed,
                    execution.new_results,
                    execution.duplicate_results,
                    if assessments.is_empty() {
                        "no assessments".to_string()
                    } else {
                        assessments.join(" / ")
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let vars = serde_json::json!({
            "question": self.ctx.run.question,
            "recent_tasks_block": recent_block,
        });
        let verdict: SaturationVerdict = match self
            .ctx
            .gateway
            .call("saturation_detection", &vars, saturation_schema(), None)
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "saturation check failed; no saturation stop this interval");
                return;
            }
        };

        self.ctx.audit.emit(
            None,
            ActionType::SaturationAssessment,
            Some(serde_json::to_value(&verdict).unwrap_or_default()),
        );

        let threshold = self.ctx.config.manager.saturation_confidence_threshold;
        if verdict.saturated && verdict.confidence >= threshold {
            if self.ctx.config.manager.allow_saturation_stop {
                info!(confidence = verdict.confidence, "saturation stop triggered");
                self.saturation_stop = true;
            } else {
                info!(
                    confidence = verdict.confidence,
                    "saturation detected but stopping is disabled"
                );
            }
        }
    }

    /// Aggregate gaps and highlights across completed tasks, for the
    /// prioritization and follow-up prompts
    fn global_coverage_summary(&self) -> String {
        let mut lines = Vec::new();
        for task in &self.tasks {
            if !task.status.is_terminal() {
                continue;
            }
            let execution = task.metadata.execution.clone().unwrap_or_default();
            let gaps: Vec<String> = task
                .metadata
                .coverage_decisions
                .iter()
                .flat_map(|d| d.gaps_identified.iter().cloned())
                .collect();
            lines.push(format!(
                "task {} ({}): {} new results, gaps: {}",
                task.id,
                task.query,
                execution.new_results,
                if gaps.is_empty() {
                    "none".to_string()
                } else {
                    gaps.join("; ")
                }
            ));
        }
        if lines.is_empty() {
            "no tasks completed yet".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn build_summary(&self, termination: TerminationReason) -> RunSummary {
        RunSummary {
            run_id: self.ctx.run.run_id.clone(),
            question: self.ctx.run.question.clone(),
            output_dir: self.ctx.run.output_dir.clone(),
            termination,
            tasks_created: self.tasks.len() as u32,
            tasks_executed: self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count() as u32,
            tasks_failed: self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Failed)
                .count() as u32,
            results_accumulated: self.ctx.store.len() as u32,
            duplicates_suppressed: self.ctx.store.duplicates(),
            entities: self.ctx.store.entities().len() as u32,
        }
    }
}
