//! Hypothesis executor
//!
//! Takes one task and one hypothesis and produces a set of new, attributed,
//! relevance-filtered results: resolve sources, generate a query per
//! source, fan out the searches under a concurrency bound, filter the
//! merged list with one relevance call, and accumulate the survivors.

use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use super::EngineContext;
use crate::domain::{Hypothesis, SearchResult};
use crate::error::EngineError;
use crate::events::ActionType;
use crate::integrations::QueryOutcome;
use crate::store::AddOutcome;

/// What one hypothesis execution did
#[derive(Debug, Clone, Copy, Default)]
pub struct HypothesisOutcome {
    /// Sources that returned a usable response
    pub sources_searched: u32,
    /// Sources that errored or timed out
    pub sources_failed: u32,
    /// Results merged before relevance filtering
    pub merged: u32,
    /// Results that survived filtering
    pub kept: u32,
    /// Survivors that were new to the result store
    pub accepted_new: u32,
    /// Survivors folded into already-stored records
    pub duplicates: u32,
}

#[derive(Debug, Deserialize)]
struct QueryGenOutput {
    #[serde(default = "default_applicable")]
    applicable: bool,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    reasoning: String,
}

fn default_applicable() -> bool {
    true
}

fn query_generation_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "applicable": {"type": "boolean"},
            "query": {"type": "string"},
            "reasoning": {"type": "string"},
        },
        "required": ["applicable", "reasoning"],
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum RelevanceCall {
    #[serde(rename = "ACCEPT")]
    Accept,
    #[serde(rename = "REJECT")]
    Reject,
}

#[derive(Debug, Default, Deserialize, serde::Serialize)]
struct ReasoningBreakdown {
    #[serde(default)]
    strategy: String,
    #[serde(default)]
    interesting_decisions: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RelevanceOutput {
    decision: RelevanceCall,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    relevant_indices: Vec<usize>,
    #[serde(default)]
    continue_searching: bool,
    #[serde(default)]
    continuation_reason: Option<String>,
    #[serde(default)]
    reasoning_breakdown: Option<ReasoningBreakdown>,
}

fn relevance_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "decision": {"type": "string", "enum": ["ACCEPT", "REJECT"]},
            "reasoning": {"type": "string"},
            "relevant_indices": {"type": "array", "items": {"type": "integer"}},
            "continue_searching": {"type": "boolean"},
            "continuation_reason": {"type": "string"},
            "reasoning_breakdown": {
                "type": "object",
                "properties": {
                    "strategy": {"type": "string"},
                    "interesting_decisions": {"type": "array", "items": {"type": "string"}},
                    "patterns": {"type": "array", "items": {"type": "string"}},
                },
            },
        },
        "required": ["decision", "reasoning", "relevant_indices"],
    })
}

/// Execute one hypothesis for one task.
///
/// Individual source failures are recorded and contained; a failed
/// relevance call or a hypothesis with no resolvable sources fails the
/// hypothesis (its results are discarded). Hypothesis failure never fails
/// the task.
pub async fn execute_hypothesis(
    ctx: &EngineContext,
    task_id: u32,
    task_query: &str,
    hypothesis: &Hypothesis,
) -> Result<HypothesisOutcome, EngineError> {
    // 1. Resolve human-readable source names against the registry
    let mut source_ids: Vec<String> = Vec::new();
    for name in &hypothesis.strategy.sources {
        match ctx.source_names.get(&name.to_lowercase()) {
            Some(id) if !source_ids.contains(id) => source_ids.push(id.clone()),
            Some(_) => {}
            None => {
                warn!(source = %name, hypothesis_id = hypothesis.id, "unknown source name, dropped");
            }
        }
    }
    if source_ids.is_empty() {
        return Err(EngineError::NoResolvableSources {
            hypothesis_id: hypothesis.id,
        });
    }

    // 2. Per-source query generation; sources the LLM rules out are skipped
    let mut jobs: Vec<(String, serde_json::Map<String, serde_json::Value>)> = Vec::new();
    for source_id in &source_ids {
        let display_name = ctx
            .registry
            .meta(source_id)
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| source_id.clone());
        let vars = serde_json::json!({
            "question": ctx.run.question,
            "task_query": task_query,
            "hypothesis": hypothesis.statement,
            "signals": hypothesis.signals_line(),
            "expected_entities": hypothesis.expected_entities_line(),
            "source_id": source_id,
            "source_name": display_name,
        });
        let generated: QueryGenOutput = match ctx
            .gateway
            .call(
                "hypothesis_query_generation",
                &vars,
                query_generation_schema(),
                Some(task_id),
            )
            .await
        {
            Ok(generated) => generated,
            Err(e) => {
                // query generation failure skips this source only
                warn!(source_id = %source_id, error = %e, "query generation failed, source skipped");
                continue;
            }
        };

        ctx.audit.emit(
            Some(task_id),
            ActionType::HypothesisQueryGeneration,
            Some(serde_json::json!({
                "hypothesis_id": hypothesis.id,
                "source_id": source_id,
                "applicable": generated.applicable,
                "query": generated.query,
                "reasoning": generated.reasoning,
            })),
        );

        match (generated.applicable, generated.query) {
            (true, Some(query)) if !query.is_empty() => {
                let mut params = serde_json::Map::new();
                params.insert("query".to_string(), serde_json::json!(query));
                jobs.push((source_id.clone(), params));
            }
            _ => {
                debug!(source_id = %source_id, "source not applicable to hypothesis, skipped");
            }
        }
    }

    let mut outcome = HypothesisOutcome::default();

    // 3. Fan out the searches, bounded by the configured concurrency limit.
    // Results are collected in arrival order even when other sources fail.
    let limit = ctx.config.hypothesis.max_results_per_source;
    let search_outcomes: Vec<(String, Result<QueryOutcome, String>)> =
        futures::stream::iter(jobs.into_iter().map(|(source_id, params)| async move {
            let result = search_one_source(ctx, task_id, hypothesis.id, &source_id, params, limit).await;
            (source_id, result)
        }))
        .buffer_unordered(ctx.config.hypothesis.max_sources_fanout)
        .collect()
        .await;

    // 4. Merge into a single ordered list
    let mut merged: Vec<SearchResult> = Vec::new();
    for (source_id, searched) in search_outcomes {
        match searched {
            Ok(query_outcome) => {
                outcome.sources_searched += 1;
                for mut result in query_outcome.results {
                    if result.source.is_none() {
                        result.source = Some(source_id.clone());
                    }
                    merged.push(result);
                }
            }
            Err(reason) => {
                outcome.sources_failed += 1;
                ctx.audit.emit(
                    Some(task_id),
                    ActionType::IntegrationError,
                    Some(serde_json::json!({
                        "hypothesis_id": hypothesis.id,
                        "source_id": source_id,
                        "error": reason,
                    })),
                );
            }
        }
    }
    outcome.merged = merged.len() as u32;

    // 5. Relevance filtering over the frozen merged list. A filtering
    // failure fails the hypothesis; nothing is accumulated.
    let kept: Vec<SearchResult> = if merged.is_empty() {
        Vec::new()
    } else {
        let results_block = render_results_block(&merged);
        let vars = serde_json::json!({
            "question": ctx.run.question,
            "hypothesis": hypothesis.statement,
            "results_block": results_block,
        });
        let filtered: RelevanceOutput = ctx
            .gateway
            .call("relevance_evaluation", &vars, relevance_schema(), Some(task_id))
            .await?;

        ctx.audit.emit(
            Some(task_id),
            ActionType::RelevanceScoring,
            Some(serde_json::json!({
                "hypothesis_id": hypothesis.id,
                "decision": match filtered.decision {
                    RelevanceCall::Accept => "ACCEPT",
                    RelevanceCall::Reject => "REJECT",
                },
                "reasoning": filtered.reasoning,
                "relevant_indices": filtered.relevant_indices,
                "continue_searching": filtered.continue_searching,
                "continuation_reason": filtered.continuation_reason,
                "reasoning_breakdown": filtered.reasoning_breakdown.unwrap_or_default(),
            })),
        );

        match filtered.decision {
            RelevanceCall::Reject => Vec::new(),
            RelevanceCall::Accept => {
                let mut kept = Vec::new();
                for idx in filtered.relevant_indices {
                    match merged.get(idx) {
                        Some(result) => kept.push(result.clone()),
                        None => warn!(idx, "relevance index out of bounds, ignored"),
                    }
                }
                kept
            }
        }
    };
    outcome.kept = kept.len() as u32;

    // 6. Attribution and accumulation; the store handles dedup
    for result in kept {
        let key = result.key();
        match ctx.store.add(result, Some(hypothesis.id), task_id) {
            AddOutcome::New => outcome.accepted_new += 1,
            AddOutcome::Duplicate => {
                outcome.duplicates += 1;
                ctx.audit.emit(
                    Some(task_id),
                    ActionType::Dedup,
                    Some(serde_json::json!({
                        "hypothesis_id": hypothesis.id,
                        "key": key.to_string(),
                    })),
                );
            }
        }
    }

    // 7. Audit the execution
    ctx.audit.emit(
        Some(task_id),
        ActionType::HypothesisExecuted,
        Some(serde_json::json!({
            "hypothesis_id": hypothesis.id,
            "statement": hypothesis.statement,
            "sources_searched": outcome.sources_searched,
            "sources_failed": outcome.sources_failed,
            "merged": outcome.merged,
            "kept": outcome.kept,
            "accepted_new": outcome.accepted_new,
            "duplicates": outcome.duplicates,
        })),
    );

    Ok(outcome)
}

/// Run one adapter search under its configured deadline
async fn search_one_source(
    ctx: &EngineContext,
    task_id: u32,
    hypothesis_id: u32,
    source_id: &str,
    params: serde_json::Map<String, serde_json::Value>,
    limit: usize,
) -> Result<QueryOutcome, String> {
    let Some(adapter) = ctx.registry.get(source_id) else {
        return Err("integration unavailable".to_string());
    };
    let settings = ctx.registry.settings(source_id).cloned().unwrap_or_default();
    let api_key = settings.resolved_api_key();
    let deadline = Duration::from_secs(settings.timeout_seconds);

    let searched = tokio::time::timeout(
        deadline,
        adapter.execute_search(&params, api_key.as_deref(), limit),
    )
    .await;

    let query_outcome = match searched {
        Err(_) => return Err(format!("timed out after {deadline:?}")),
        Ok(Err(e)) => return Err(e.to_string()),
        Ok(Ok(query_outcome)) => query_outcome,
    };

    if !query_outcome.success {
        return Err(query_outcome
            .error
            .unwrap_or_else(|| "adapter reported failure".to_string()));
    }

    ctx.audit.emit(
        Some(task_id),
        ActionType::IntegrationCall,
        Some(serde_json::json!({
            "hypothesis_id": hypothesis_id,
            "source_id": source_id,
            "params": params,
            "total": query_outcome.total,
            "returned": query_outcome.results.len(),
            "response_time_ms": query_outcome.response_time_ms,
        })),
    );

    if ctx.config.run.keep_raw_responses {
        let path = ctx.run.raw_dir().join(format!(
            "task{task_id}_h{hypothesis_id}_{source_id}.json"
        ));
        if let Ok(raw) = serde_json::to_vec_pretty(&query_outcome) {
            if let Err(e) = std::fs::write(&path, raw) {
                warn!(?path, error = %e, "failed to persist raw response");
            }
        }
    }

    Ok(query_outcome)
}

/// Render the frozen result list for the relevance prompt; indices returned
/// by the filter refer to this list.
fn render_results_block(results: &[SearchResult]) -> String {
    const SNIPPET_MAX: usize = 240;
    results
        .iter()
        .enumerate()
        .map(|(idx, result)| {
            let snippet = result
                .description
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(SNIPPET_MAX)
                .collect::<String>();
            format!(
                "[{idx}] {} | source: {} | {}",
                result.title,
                result.source.as_deref().unwrap_or("unknown"),
                snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
