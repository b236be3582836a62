//! Synthesizer
//!
//! Builds the run's final artifacts: the LLM-written report, the results
//! collection, and the run metadata. Stateless; writes only inside the
//! run's output directory. A failed synthesis call produces a structured
//! error block instead of failing the run.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::manager::TerminationReason;
use super::EngineContext;
use crate::config::Config;
use crate::domain::{CoverageDecision, ResearchTask, TaskStatus};
use crate::error::EngineError;
use crate::llm::PurposeCost;

/// Cap on result snippets fed to the report prompt
const SNIPPET_SAMPLE_MAX: usize = 40;

#[derive(Debug, Deserialize)]
struct ReportOutput {
    report_markdown: String,
    #[serde(default)]
    headline: Option<String>,
}

fn report_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "report_markdown": {"type": "string"},
            "headline": {"type": "string"},
        },
        "required": ["report_markdown"],
    })
}

/// Run-level summary persisted as metadata.json
#[derive(Debug, Serialize)]
struct RunMetadata<'a> {
    run_id: &'a str,
    question: &'a str,
    started_at: chrono::DateTime<Utc>,
    completed_at: chrono::DateTime<Utc>,
    duration_seconds: u64,
    termination_reason: TerminationReason,
    tasks_created: u32,
    tasks_executed: u32,
    tasks_failed: u32,
    results_accumulated: u32,
    duplicates_suppressed: u64,
    dedup_rate_percent: u8,
    entity_count: u32,
    entities: Vec<String>,
    coverage_decisions_by_task: BTreeMap<u32, Vec<CoverageDecision>>,
    task_execution_order: &'a [u32],
    llm_costs: BTreeMap<String, PurposeCost>,
    config: &'a Config,
}

/// Write report.md, results.json, and metadata.json for the finished run
pub async fn synthesize(
    ctx: &EngineContext,
    tasks: &[ResearchTask],
    termination: TerminationReason,
    task_execution_order: &[u32],
) -> Result<(), EngineError> {
    let report = render_report(ctx, tasks, termination).await;
    std::fs::write(ctx.run.output_dir.join("report.md"), report)?;

    let results = ctx.store.export();
    std::fs::write(
        ctx.run.output_dir.join("results.json"),
        serde_json::to_vec_pretty(&results)?,
    )?;

    let completed_at = Utc::now();
    let accumulated = results.len() as u32;
    let duplicates = ctx.store.duplicates();
    let seen = accumulated as u64 + duplicates;
    let dedup_rate_percent = if seen == 0 {
        0
    } else {
        ((duplicates as f64) * 100.0 / (seen as f64)).round() as u8
    };
    let entities: Vec<String> = ctx.store.entities().into_iter().collect();

    let metadata = RunMetadata {
        run_id: &ctx.run.run_id,
        question: &ctx.run.question,
        started_at: ctx.run.started_at,
        completed_at,
        duration_seconds: ctx.run.clock.elapsed().as_secs(),
        termination_reason: termination,
        tasks_created: tasks.len() as u32,
        tasks_executed: tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count() as u32,
        tasks_failed: tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .count() as u32,
        results_accumulated: accumulated,
        duplicates_suppressed: duplicates,
        dedup_rate_percent,
        entity_count: entities.len() as u32,
        entities,
        coverage_decisions_by_task: tasks
            .iter()
            .filter(|t| !t.metadata.coverage_decisions.is_empty())
            .map(|t| (t.id, t.metadata.coverage_decisions.clone()))
            .collect(),
        task_execution_order,
        llm_costs: ctx.gateway.ledger().snapshot(),
        config: &ctx.config,
    };
    std::fs::write(
        ctx.run.output_dir.join("metadata.json"),
        serde_json::to_vec_pretty(&metadata)?,
    )?;

    info!(output_dir = %ctx.run.output_dir.display(), "run artifacts written");
    Ok(())
}

async fn render_report(
    ctx: &EngineContext,
    tasks: &[ResearchTask],
    termination: TerminationReason,
) -> String {
    let stats_block = format!(
        "termination: {termination} | tasks: {} | results: {} | duplicates suppressed: {} | entities: {}",
        tasks.len(),
        ctx.store.len(),
        ctx.store.duplicates(),
        ctx.store.entities().len(),
    );

    let task_summaries = tasks
        .iter()
        .map(|task| {
            let execution = task.metadata.execution.clone().unwrap_or_default();
            let last_assessment = task
                .metadata
                .coverage_decisions
                .last()
                .map(|d| d.assessment.clone())
                .unwrap_or_else(|| "no coverage assessment".to_string());
            format!(
                "task {} [{}]: {} | hypotheses executed: {} | new results: {} | {}",
                task.id,
                task.status,
                task.query,
                execution.hypotheses_executed,
                execution.new_results,
                last_assessment
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let entities_block = {
        let entities = ctx.store.entities();
        if entities.is_empty() {
            "none".to_string()
        } else {
            entities.into_iter().collect::<Vec<_>>().join(", ")
        }
    };

    let snippets_block = ctx
        .store
        .export()
        .iter()
        .take(SNIPPET_SAMPLE_MAX)
        .map(|stored| {
            format!(
                "- {} ({}) {}",
                stored.result.title,
                stored.result.source.as_deref().unwrap_or("unknown"),
                stored.result.url.as_deref().unwrap_or("")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let vars = serde_json::json!({
        "question": ctx.run.question,
        "stats_block": stats_block,
        "task_summaries": task_summaries,
        "entities_block": entities_block,
        "snippets_block": snippets_block,
    });

    match ctx
        .gateway
        .call::<ReportOutput, _>("report_synthesis", &vars, report_schema(), None)
        .await
    {
        Ok(output) => {
            let mut report = String::new();
            if let Some(headline) = output.headline {
                report.push_str(&format!("> {headline}\n\n"));
            }
            report.push_str(&output.report_markdown);
            report
        }
        Err(e) => {
            warn!(error = %e, "report synthesis failed; writing error block");
            format!(
                "# Research Report\n\n\
                 ## Synthesis error\n\n\
                 The final synthesis call failed; the run's data is intact in \
                 results.json and execution_log.jsonl.\n\n\
                 ```\n{e}\n```\n\n\
                 ## Run statistics\n\n{stats_block}\n"
            )
        }
    }
}
