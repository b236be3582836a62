//! Task runner
//!
//! Runs one research task end to end: optional initial search, hypothesis
//! generation, the coverage-assessed hypothesis loop, entity extraction,
//! and the terminal transition.

use std::time::Instant;

use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::coverage::{PriorHypothesis, assess_coverage};
use super::hypothesis::execute_hypothesis;
use super::EngineContext;
use crate::config::HypothesisMode;
use crate::domain::{Hypothesis, ResearchTask, SearchStrategy, TaskExecutionSummary};
use crate::events::ActionType;
use crate::integrations::{QueryPlan, TaskContext, strip_rejection_metadata};
use crate::store::AddOutcome;

/// How a task run ended
#[derive(Debug, Clone, Copy)]
pub struct TaskOutcome {
    /// The task reported no usable results and was reset to pending
    pub requeued: bool,
    /// The per-task deadline fired during the run
    pub deadline_hit: bool,
}

#[derive(Debug, Deserialize)]
struct HypothesesOutput {
    #[serde(default)]
    hypotheses: Vec<HypothesisSeed>,
}

#[derive(Debug, Deserialize)]
struct HypothesisSeed {
    statement: String,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default)]
    expected_entities: Vec<String>,
    #[serde(default)]
    signals: Vec<String>,
    #[serde(default = "default_confidence")]
    confidence: u8,
    #[serde(default)]
    priority: Option<u32>,
    #[serde(default)]
    rationale: String,
}

fn default_confidence() -> u8 {
    50
}

fn hypotheses_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "hypotheses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "statement": {"type": "string"},
                        "sources": {"type": "array", "items": {"type": "string"}},
                        "expected_entities": {"type": "array", "items": {"type": "string"}},
                        "signals": {"type": "array", "items": {"type": "string"}},
                        "confidence": {"type": "integer", "minimum": 0, "maximum": 100},
                        "priority": {"type": "integer"},
                        "rationale": {"type": "string"},
                    },
                    "required": ["statement", "sources"],
                },
            },
        },
        "required": ["hypotheses"],
    })
}

#[derive(Debug, Deserialize)]
struct EntityOutput {
    #[serde(default)]
    entities: Vec<EntityItem>,
}

#[derive(Debug, Deserialize)]
struct EntityItem {
    name: String,
    #[serde(default)]
    #[allow(dead_code)]
    entity_type: Option<String>,
}

fn entity_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "entity_type": {"type": "string"},
                    },
                    "required": ["name"],
                },
            },
        },
        "required": ["entities"],
    })
}

/// Run one task to a terminal state.
///
/// The per-task deadline is advisory: it stops the launch of new
/// hypotheses and the task returns with whatever was gathered.
pub async fn run_task(ctx: &EngineContext, task: &mut ResearchTask) -> TaskOutcome {
    let task_started = Instant::now();
    let store_before = ctx.store.snapshot();
    let first_dispatch = task.started_at.is_none();
    task.mark_in_progress();

    // One task_start per task id, retries included
    if first_dispatch {
        ctx.audit.emit(
            Some(task.id),
            ActionType::TaskStart,
            Some(serde_json::json!({
                "query": task.query,
                "parent_id": task.parent_id,
                "priority": task.priority,
                "retry_count": task.retry_count,
            })),
        );
    }

    let mut summary = TaskExecutionSummary::default();

    // Legacy pre-hypothesis phase; also the whole task body in Off mode
    if ctx.config.task.initial_search || ctx.config.hypothesis.mode == HypothesisMode::Off {
        summary.initial_search_results = initial_search(ctx, task).await;
    }

    if ctx.config.hypothesis.mode != HypothesisMode::Off {
        let deadline_ok = !ctx.run.clock.task_expired(task_started) && !ctx.run.clock.run_expired();
        if deadline_ok {
            match generate_hypotheses(ctx, task).await {
                Ok(hypotheses) => {
                    summary.hypotheses_generated = hypotheses.len() as u32;
                    task.hypotheses = hypotheses;
                }
                Err(e) => {
                    warn!(task_id = task.id, error = %e, "hypothesis generation failed");
                }
            }
        }

        if ctx.config.hypothesis.mode == HypothesisMode::Execution && !task.hypotheses.is_empty() {
            if ctx.config.hypothesis.coverage_mode {
                run_hypotheses_sequential(ctx, task, task_started, &mut summary).await;
            } else {
                run_hypotheses_parallel(ctx, task, task_started, &mut summary).await;
            }
        }
    }

    // Entity extraction over everything the task accumulated
    let task_results = ctx.store.results_for_task(task.id);
    if !task_results.is_empty() {
        extract_entities(ctx, task, &mut summary).await;
    }

    let facts = ctx.store.delta(&store_before);
    summary.new_results = facts.new_results;
    summary.duplicate_results = facts.duplicate_results;
    summary.deadline_hit = ctx.run.clock.task_expired(task_started);

    // No hypotheses and nothing accumulated: the task body reported no
    // usable results and may retry. External-call failures do not reset the
    // task; a deadline abandonment never retries.
    let usable = summary.hypotheses_generated > 0
        || summary.new_results >= ctx.config.run.min_results_per_task;
    if !usable
        && !summary.deadline_hit
        && task.retry_count < ctx.config.run.max_retries_per_task
    {
        task.reset_for_retry();
        return TaskOutcome {
            requeued: true,
            deadline_hit: false,
        };
    }

    // A deadline that fired before any results or hypotheses arrived fails
    // the task; every other exit is a normal completion, empty results
    // included.
    let empty_handed = summary.new_results == 0
        && summary.hypotheses_generated == 0
        && summary.hypotheses_executed == 0
        && summary.initial_search_results == 0;
    let payload = serde_json::json!({
        "query": task.query,
        "hypotheses_generated": summary.hypotheses_generated,
        "hypotheses_executed": summary.hypotheses_executed,
        "hypotheses_failed": summary.hypotheses_failed,
        "new_results": summary.new_results,
        "duplicate_results": summary.duplicate_results,
        "entities_extracted": summary.entities_extracted,
        "coverage_decisions": task.metadata.coverage_decisions.len(),
        "deadline_hit": summary.deadline_hit,
    });

    if summary.deadline_hit && empty_handed {
        task.mark_failed(summary);
        ctx.audit
            .emit(Some(task.id), ActionType::TaskFailed, Some(payload));
        return TaskOutcome {
            requeued: false,
            deadline_hit: true,
        };
    }

    let deadline_hit = summary.deadline_hit;
    task.mark_completed(summary);
    ctx.audit
        .emit(Some(task.id), ActionType::TaskComplete, Some(payload));
    info!(task_id = task.id, "task completed");

    TaskOutcome {
        requeued: false,
        deadline_hit,
    }
}

async fn generate_hypotheses(
    ctx: &EngineContext,
    task: &ResearchTask,
) -> Result<Vec<Hypothesis>, crate::error::EngineError> {
    let available_sources = ctx
        .registry
        .metas()
        .map(|m| format!("- {} ({})", m.display_name, m.category))
        .collect::<Vec<_>>()
        .join("\n");
    let vars = serde_json::json!({
        "question": ctx.run.question,
        "task_query": task.query,
        "available_sources": available_sources,
        "max_hypotheses": ctx.config.hypothesis.max_hypotheses_per_task,
    });

    let output: HypothesesOutput = ctx
        .gateway
        .call("hypothesis_generation", &vars, hypotheses_schema(), Some(task.id))
        .await?;

    let hypotheses: Vec<Hypothesis> = output
        .hypotheses
        .into_iter()
        .enumerate()
        .map(|(idx, seed)| Hypothesis {
            id: idx as u32 + 1,
            statement: seed.statement,
            strategy: SearchStrategy {
                sources: seed.sources,
                expected_entities: seed.expected_entities,
                signals: seed.signals,
            },
            confidence: seed.confidence.min(100),
            priority: seed.priority.unwrap_or(idx as u32 + 1),
            rationale: seed.rationale,
        })
        .collect();

    ctx.audit.emit(
        Some(task.id),
        ActionType::HypothesesGenerated,
        Some(serde_json::json!({
            "count": hypotheses.len(),
            "statements": hypotheses.iter().map(|h| h.statement.clone()).collect::<Vec<_>>(),
        })),
    );
    Ok(hypotheses)
}

/// Sequential execution with coverage assessment after every hypothesis
/// except the first. The loop exits immediately on a stop decision with no
/// gaps, a ceiling, or a deadline.
async fn run_hypotheses_sequential(
    ctx: &EngineContext,
    task: &mut ResearchTask,
    task_started: Instant,
    summary: &mut TaskExecutionSummary,
) {
    let ceiling = ctx.config.hypothesis.max_hypotheses_per_task as usize;
    let hypotheses: Vec<Hypothesis> = task.hypotheses.iter().take(ceiling).cloned().collect();
    let mut prior: Vec<PriorHypothesis> = Vec::new();

    for (idx, hypothesis) in hypotheses.iter().enumerate() {
        if ctx.run.clock.task_expired(task_started) || ctx.run.clock.run_expired() {
            debug!(task_id = task.id, "deadline reached, no further hypotheses");
            break;
        }

        let before = ctx.store.snapshot();
        match execute_hypothesis(ctx, task.id, &task.query, hypothesis).await {
            Ok(_) => summary.hypotheses_executed += 1,
            Err(e) => {
                summary.hypotheses_failed += 1;
                ctx.audit.emit(
                    Some(task.id),
                    ActionType::HypothesisFailed,
                    Some(serde_json::json!({
                        "hypothesis_id": hypothesis.id,
                        "error": e.to_string(),
                    })),
                );
                continue;
            }
        }
        let facts = ctx.store.delta(&before);

        // the first hypothesis has nothing to compare against
        if idx > 0 {
            if let Some(decision) =
                assess_coverage(ctx, task.id, &task.query, hypothesis, facts, &prior).await
            {
                let stop = decision.is_terminal_stop();
                task.record_coverage_decision(decision);
                if stop {
                    debug!(task_id = task.id, "coverage stop with no gaps, loop ends");
                    break;
                }
            }
        }

        prior.push(PriorHypothesis {
            statement: hypothesis.statement.clone(),
            facts,
        });
    }
}

/// Parallel execution, used only when the coverage-assessment loop is off
async fn run_hypotheses_parallel(
    ctx: &EngineContext,
    task: &mut ResearchTask,
    task_started: Instant,
    summary: &mut TaskExecutionSummary,
) {
    if ctx.run.clock.task_expired(task_started) || ctx.run.clock.run_expired() {
        return;
    }
    let ceiling = ctx.config.hypothesis.max_hypotheses_per_task as usize;
    let hypotheses: Vec<Hypothesis> = task.hypotheses.iter().take(ceiling).cloned().collect();
    let task_id = task.id;
    let task_query = task.query.clone();

    let outcomes: Vec<Result<super::HypothesisOutcome, crate::error::EngineError>> =
        futures::stream::iter(hypotheses.iter().map(|hypothesis| {
            let task_query = task_query.clone();
            async move { execute_hypothesis(ctx, task_id, &task_query, hypothesis).await }
        }))
        .buffered(ctx.config.hypothesis.max_sources_fanout)
        .collect()
        .await;

    for (hypothesis, outcome) in hypotheses.iter().zip(outcomes) {
        match outcome {
            Ok(_) => summary.hypotheses_executed += 1,
            Err(e) => {
                summary.hypotheses_failed += 1;
                ctx.audit.emit(
                    Some(task_id),
                    ActionType::HypothesisFailed,
                    Some(serde_json::json!({
                        "hypothesis_id": hypothesis.id,
                        "error": e.to_string(),
                    })),
                );
            }
        }
    }
}

/// Legacy initial search: every registered source that self-reports as
/// relevant generates its own query and is searched once, results
/// attributed to the task only.
async fn initial_search(ctx: &EngineContext, task: &ResearchTask) -> u32 {
    let task_ctx = TaskContext {
        task_id: task.id,
        task_query: &task.query,
        question: &ctx.run.question,
    };

    let candidates: Vec<String> = ctx
        .registry
        .list_ids()
        .into_iter()
        .filter(|id| {
            ctx.registry
                .get(id)
                .map(|adapter| adapter.is_relevant(&ctx.run.question))
                .unwrap_or(false)
        })
        .collect();

    let limit = ctx.config.hypothesis.max_results_per_source;
    let task_id = task.id;
    let gathered: Vec<Vec<crate::domain::SearchResult>> =
        futures::stream::iter(candidates.iter().map(|source_id| {
            let task_ctx = task_ctx.clone();
            async move {
                initial_search_one(ctx, task_id, source_id, &task_ctx, limit).await
            }
        }))
        .buffer_unordered(ctx.config.hypothesis.max_sources_fanout)
        .collect()
        .await;

    let mut accepted = 0;
    for results in gathered {
        for result in results {
            if ctx.store.add(result, None, task_id) == AddOutcome::New {
                accepted += 1;
            } else {
                ctx.audit.emit(
                    Some(task_id),
                    ActionType::Dedup,
                    Some(serde_json::json!({"phase": "initial_search"})),
                );
            }
        }
    }
    accepted
}

async fn initial_search_one(
    ctx: &EngineContext,
    task_id: u32,
    source_id: &str,
    task_ctx: &TaskContext<'_>,
    limit: usize,
) -> Vec<crate::domain::SearchResult> {
    let Some(adapter) = ctx.registry.get(source_id) else {
        return Vec::new();
    };
    let plan = match adapter
        .generate_query(&ctx.run.question, task_ctx, None)
        .await
    {
        Ok(plan) => plan,
        Err(e) => {
            ctx.audit.emit(
                Some(task_id),
                ActionType::IntegrationError,
                Some(serde_json::json!({
                    "source_id": source_id,
                    "phase": "initial_search",
                    "error": e.to_string(),
                })),
            );
            return Vec::new();
        }
    };

    let (mut params, reasoning) = match plan {
        QueryPlan::NotApplicable { reasoning } => {
            debug!(source_id, %reasoning, "source not applicable to initial search");
            return Vec::new();
        }
        QueryPlan::Search { params, reasoning } => (params, reasoning),
    };

    // Wrapper discipline: rejection metadata never reaches execute_search
    let rejection = strip_rejection_metadata(&mut params);

    let settings = ctx.registry.settings(source_id).cloned().unwrap_or_default();
    let deadline = std::time::Duration::from_secs(settings.timeout_seconds);
    let api_key = settings.resolved_api_key();

    let searched = tokio::time::timeout(
        deadline,
        adapter.execute_search(&params, api_key.as_deref(), limit),
    )
    .await;

    match searched {
        Ok(Ok(outcome)) if outcome.success => {
            ctx.audit.emit(
                Some(task_id),
                ActionType::IntegrationCall,
                Some(serde_json::json!({
                    "source_id": source_id,
                    "phase": "initial_search",
                    "reasoning": reasoning,
                    "rejection": rejection,
                    "total": outcome.total,
                    "returned": outcome.results.len(),
                    "response_time_ms": outcome.response_time_ms,
                })),
            );
            let mut results = outcome.results;
            for result in &mut results {
                if result.source.is_none() {
                    result.source = Some(source_id.to_string());
                }
            }
            results
        }
        Ok(Ok(outcome)) => {
            ctx.audit.emit(
                Some(task_id),
                ActionType::IntegrationError,
                Some(serde_json::json!({
                    "source_id": source_id,
                    "phase": "initial_search",
                    "error": outcome.error.unwrap_or_else(|| "adapter reported failure".into()),
                })),
            );
            Vec::new()
        }
        Ok(Err(e)) => {
            ctx.audit.emit(
                Some(task_id),
                ActionType::IntegrationError,
                Some(serde_json::json!({
                    "source_id": source_id,
                    "phase": "initial_search",
                    "error": e.to_string(),
                })),
            );
            Vec::new()
        }
        Err(_) => {
            ctx.audit.emit(
                Some(task_id),
                ActionType::IntegrationError,
                Some(serde_json::json!({
                    "source_id": source_id,
                    "phase": "initial_search",
                    "error": format!("timed out after {deadline:?}"),
                })),
            );
            Vec::new()
        }
    }
}

async fn extract_entities(
    ctx: &EngineContext,
    task: &mut ResearchTask,
    summary: &mut TaskExecutionSummary,
) {
    const SAMPLE_MAX: usize = 50;
    let results = ctx.store.results_for_task(task.id);
    let results_block = results
        .iter()
        .take(SAMPLE_MAX)
        .map(|stored| {
            format!(
                "- {} | {} | {}",
                stored.result.title,
                stored.result.source.as_deref().unwrap_or("unknown"),
                stored.result.description.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let vars = serde_json::json!({
        "question": ctx.run.question,
        "task_query": task.query,
        "results_block": results_block,
    });

    let output: EntityOutput = match ctx
        .gateway
        .call("entity_extraction", &vars, entity_schema(), Some(task.id))
        .await
    {
        Ok(output) => output,
        Err(e) => {
            warn!(task_id = task.id, error = %e, "entity extraction failed");
            return;
        }
    };

    let names: Vec<String> = output.entities.into_iter().map(|e| e.name).collect();
    summary.entities_extracted = names.len() as u32;
    let new_entities = ctx.store.merge_entities(names.iter().cloned());
    task.entities.extend(names);

    ctx.audit.emit(
        Some(task.id),
        ActionType::EntityExtraction,
        Some(serde_json::json!({
            "extracted": summary.entities_extracted,
            "new_to_run": new_entities,
        })),
    );
}
