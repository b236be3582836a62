//! End-to-end engine scenarios
//!
//! Each test drives a full run through the Manager with a scripted LLM and
//! in-memory stub sources, then inspects the run summary, the persisted
//! artifacts, and the audit log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use researchdaemon::config::{Config, HypothesisMode};
use researchdaemon::domain::SearchResult;
use researchdaemon::engine::{Manager, TerminationReason};
use researchdaemon::events::{ActionType, AuditEvent, read_run_events, replay};
use researchdaemon::integrations::IntegrationRegistry;
use researchdaemon::integrations::testing::StaticIntegration;
use researchdaemon::llm::testing::ScriptedLlm;
use tempfile::TempDir;

// =============================================================================
// Harness
// =============================================================================

/// A scripted client with sane defaults for every purpose a run touches
fn scripted_client() -> Arc<ScriptedLlm> {
    let client = ScriptedLlm::new();
    client.default_reply(
        "task_prioritization",
        serde_json::json!({"tasks": []}),
    );
    client.default_reply(
        "hypothesis_query_generation",
        serde_json::json!({"applicable": true, "query": "stub query", "reasoning": "r"}),
    );
    client.default_reply(
        "relevance_evaluation",
        serde_json::json!({
            "decision": "ACCEPT",
            "reasoning": "all relevant",
            "relevant_indices": (0..32).collect::<Vec<_>>(),
        }),
    );
    client.default_reply(
        "saturation_detection",
        serde_json::json!({
            "saturated": false,
            "confidence": 0,
            "reasoning": "plenty left",
            "recommendation": "continue",
        }),
    );
    client.default_reply("follow_up_generation", serde_json::json!({"follow_ups": []}));
    client.default_reply("entity_extraction", serde_json::json!({"entities": []}));
    client.default_reply(
        "report_synthesis",
        serde_json::json!({"report_markdown": "# Report", "headline": "stub"}),
    );
    Arc::new(client)
}

fn seed_decomposition(client: &ScriptedLlm, queries: &[&str]) {
    let tasks: Vec<serde_json::Value> = queries
        .iter()
        .map(|q| serde_json::json!({"query": q, "rationale": "seed"}))
        .collect();
    client.push("task_decomposition", serde_json::json!({"tasks": tasks}));
}

fn hypothesis_reply(statements_and_sources: &[(&str, &[&str])]) -> serde_json::Value {
    let hypotheses: Vec<serde_json::Value> = statements_and_sources
        .iter()
        .map(|(statement, sources)| {
            serde_json::json!({
                "statement": statement,
                "sources": sources,
                "expected_entities": ["organization"],
                "signals": ["cyber"],
                "confidence": 60,
                "rationale": "worth a look",
            })
        })
        .collect();
    serde_json::json!({"hypotheses": hypotheses})
}

fn results(prefix: &str, count: usize) -> Vec<SearchResult> {
    (0..count)
        .map(|i| {
            SearchResult::new(format!("{prefix} result {i}"))
                .with_url(format!("https://example.gov/{prefix}/{i}"))
                .with_description("a federal record")
        })
        .collect()
}

fn stub_registry(adapters: Vec<StaticIntegration>) -> IntegrationRegistry {
    let mut registry = IntegrationRegistry::new(HashMap::new());
    for adapter in adapters {
        registry.register_instance(Arc::new(adapter));
    }
    registry
}

fn events_of(events: &[AuditEvent], action: ActionType) -> Vec<&AuditEvent> {
    events.iter().filter(|e| e.action_type == action).collect()
}

fn read_metadata(run_dir: &std::path::Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(run_dir.join("metadata.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

// =============================================================================
// Scenario 1: single-task, single-hypothesis
// =============================================================================

#[tokio::test]
async fn test_single_hypothesis_run() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["GS-2210 series definition", "GS-2210 hiring"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("the 2210 series covers IT management", &["Stub Source"])]),
    );

    let mut config = Config::default();
    config.run.max_tasks = 3;
    config.hypothesis.max_hypotheses_per_task = 1;
    config.hypothesis.coverage_mode = true;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("stub", 3),
    )]);
    let manager = Manager::new(
        "What is the GS-2210 job series?",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    assert_eq!(summary.termination, TerminationReason::QueueEmpty);
    assert!(summary.tasks_executed >= 1 && summary.tasks_executed <= 3);
    assert_eq!(summary.results_accumulated, 3);

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    // exactly one hypothesis per task, so no post-first coverage assessment
    assert!(events_of(&events, ActionType::CoverageAssessment).is_empty());
    assert!(!events_of(&events, ActionType::TaskComplete).is_empty());
    assert!(!events_of(&events, ActionType::EntityExtraction).is_empty());
    assert!(summary.output_dir.join("report.md").exists());

    // P6: one task_start and one task_complete per completed task id,
    // start before complete
    for complete in events_of(&events, ActionType::TaskComplete) {
        let id = complete.task_id.unwrap();
        let starts: Vec<_> = events_of(&events, ActionType::TaskStart)
            .into_iter()
            .filter(|e| e.task_id == Some(id))
            .collect();
        assert_eq!(starts.len(), 1, "task {id} should have exactly one start");
        assert!(starts[0].timestamp <= complete.timestamp);
    }
}

// =============================================================================
// Scenario 2: coverage-driven early stop (P7)
// =============================================================================

#[tokio::test]
async fn test_coverage_stop_with_no_gaps_ends_task() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["federal cyber qualification paths"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[
            ("certifications gate entry", &["Stub Source"]),
            ("degree requirements vary", &["Stub Source"]),
            ("clearances matter most", &["Stub Source"]),
            ("contractors hire differently", &["Stub Source"]),
        ]),
    );
    // after hypothesis 2: stop with no gaps
    client.push(
        "coverage_assessment",
        serde_json::json!({"decision": "stop", "assessment": "covered", "gaps_identified": []}),
    );

    let mut config = Config::default();
    config.run.max_tasks = 1;
    config.hypothesis.max_hypotheses_per_task = 4;
    config.hypothesis.coverage_mode = true;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("cyber", 2),
    )]);
    let manager = Manager::new(
        "How do I qualify for federal cybersecurity jobs?",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    assert_eq!(events_of(&events, ActionType::HypothesisExecuted).len(), 2);
    assert_eq!(events_of(&events, ActionType::CoverageAssessment).len(), 1);

    let metadata = read_metadata(&summary.output_dir);
    let decisions = &metadata["coverage_decisions_by_task"]["1"];
    assert_eq!(decisions.as_array().unwrap().len(), 1);
    assert_eq!(decisions[0]["decision"], "stop");
}

// =============================================================================
// Scenario 3: ceiling respect under saturating gaps (P4)
// =============================================================================

#[tokio::test]
async fn test_hypothesis_ceiling_respected_when_coverage_always_continues() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["federal cyber qualification paths"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[
            ("h1", &["Stub Source"]),
            ("h2", &["Stub Source"]),
            ("h3", &["Stub Source"]),
            ("h4", &["Stub Source"]),
            ("h5", &["Stub Source"]),
        ]),
    );
    client.default_reply(
        "coverage_assessment",
        serde_json::json!({"decision": "continue", "assessment": "thin", "gaps_identified": ["X"]}),
    );

    let mut config = Config::default();
    config.run.max_tasks = 1;
    config.hypothesis.max_hypotheses_per_task = 3;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("cyber", 2),
    )]);
    let manager = Manager::new(
        "How do I qualify for federal cybersecurity jobs?",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    assert_eq!(events_of(&events, ActionType::HypothesisExecuted).len(), 3);
    assert_eq!(events_of(&events, ActionType::CoverageAssessment).len(), 2);
}

// =============================================================================
// Scenario 4: source failure isolation
// =============================================================================

#[tokio::test]
async fn test_source_failure_does_not_fail_hypothesis_or_task() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["drone vendors"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[(
            "vendors appear across sources",
            &["Source A", "Source B", "Source C"],
        )]),
    );

    let mut config = Config::default();
    config.run.max_tasks = 1;
    config.hypothesis.max_hypotheses_per_task = 1;

    let registry = stub_registry(vec![
        StaticIntegration::failing("a", "Source A", "connection refused"),
        StaticIntegration::new("b", "Source B", results("b", 2)),
        StaticIntegration::new("c", "Source C", results("c", 2)),
    ]);
    let manager = Manager::new(
        "Who supplies small drones?",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    assert_eq!(summary.tasks_executed, 1);
    assert_eq!(summary.tasks_failed, 0);
    assert_eq!(summary.results_accumulated, 4);

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    let errors = events_of(&events, ActionType::IntegrationError);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action_payload.as_ref().unwrap()["source_id"], "a");

    let executed = events_of(&events, ActionType::HypothesisExecuted);
    assert_eq!(executed.len(), 1);
    let payload = executed[0].action_payload.as_ref().unwrap();
    assert_eq!(payload["accepted_new"], 4);
    assert_eq!(payload["sources_failed"], 1);
    assert!(events_of(&events, ActionType::HypothesisFailed).is_empty());
}

// =============================================================================
// Scenario 5: deadline triggers orderly exit (P5)
// =============================================================================

#[tokio::test]
async fn test_task_deadline_stops_hypothesis_launches() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["slow question"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("never executed", &["Stub Source"])]),
    );
    // every LLM call takes longer than the 1-second task deadline
    client.set_delay(Duration::from_millis(1200));

    let mut config = Config::default();
    config.run.max_tasks = 1;
    config.task.timeout_seconds = 1;
    config.manager.enabled = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("slow", 2),
    )]);
    let manager = Manager::new(
        "A question the model is slow about",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    // hypotheses were generated but none launched; the task still reached a
    // terminal state and the run synthesized
    assert_eq!(summary.tasks_executed, 1);
    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    assert!(events_of(&events, ActionType::HypothesisExecuted).is_empty());
    let completes = events_of(&events, ActionType::TaskComplete);
    let payload = completes[0].action_payload.as_ref().unwrap();
    assert_eq!(payload["hypotheses_executed"], 0);
    assert_eq!(payload["deadline_hit"], true);
    assert!(summary.output_dir.join("report.md").exists());
}

// =============================================================================
// Scenario 6: saturation stop
// =============================================================================

#[tokio::test]
async fn test_saturation_halts_scheduling() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["t1", "t2", "t3", "t4", "t5"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("one look", &["Stub Source"])]),
    );
    client.push(
        "saturation_detection",
        serde_json::json!({
            "saturated": false, "confidence": 20,
            "reasoning": "early", "recommendation": "continue",
        }),
    );
    client.push(
        "saturation_detection",
        serde_json::json!({
            "saturated": true, "confidence": 80,
            "reasoning": "nothing new is arriving", "recommendation": "stop",
        }),
    );

    let mut config = Config::default();
    config.run.max_tasks = 10;
    config.hypothesis.max_hypotheses_per_task = 1;
    config.manager.saturation_detection = true;
    config.manager.saturation_check_interval = 2;
    config.manager.saturation_confidence_threshold = 70;
    config.manager.allow_saturation_stop = true;
    config.manager.reprioritize_after_task = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("sat", 2),
    )]);
    let manager = Manager::new(
        "A question that saturates",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    assert_eq!(summary.termination, TerminationReason::Saturated);
    assert_eq!(summary.tasks_executed, 2);

    let metadata = read_metadata(&summary.output_dir);
    assert_eq!(metadata["tasks_executed"], 2);
    assert_eq!(metadata["termination_reason"], "saturated");

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    let verdicts = events_of(&events, ActionType::SaturationAssessment);
    assert!(
        verdicts
            .iter()
            .any(|e| e.action_payload.as_ref().unwrap()["recommendation"] != "continue")
    );
}

// =============================================================================
// Follow-up budget (P8)
// =============================================================================

#[tokio::test]
async fn test_follow_up_ceiling_per_parent() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["parent task"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("h1", &["Stub Source"]), ("h2", &["Stub Source"])]),
    );
    client.default_reply(
        "coverage_assessment",
        serde_json::json!({
            "decision": "continue",
            "assessment": "gaps remain",
            "gaps_identified": ["missing vendor names"],
        }),
    );
    // the model proposes three follow-ups; only one fits the ceiling
    client.push(
        "follow_up_generation",
        serde_json::json!({"follow_ups": [
            {"query": "f1", "rationale": "r", "gap_type": "missing_entity"},
            {"query": "f2", "rationale": "r", "gap_type": "missing_entity"},
            {"query": "f3", "rationale": "r", "gap_type": "missing_entity"},
        ]}),
    );

    let mut config = Config::default();
    config.run.max_tasks = 10;
    config.hypothesis.max_hypotheses_per_task = 2;
    config.follow_up.max_follow_ups_per_task = Some(1);
    config.manager.saturation_detection = false;
    config.manager.reprioritize_after_task = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("parent", 2),
    )]);
    let manager = Manager::new(
        "A question with one follow-up",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    let created = events_of(&events, ActionType::FollowUpCreated);
    assert_eq!(created.len(), 1);
    assert_eq!(
        created[0].action_payload.as_ref().unwrap()["query"],
        "f1"
    );
    // parent task 1 plus exactly one follow-up
    assert_eq!(summary.tasks_created, 2);
}

// =============================================================================
// R1: replaying the log reproduces the metadata counts
// =============================================================================

#[tokio::test]
async fn test_replay_reproduces_metadata_counts() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["alpha", "beta"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("h1", &["Stub Source"]), ("h2", &["Stub Source"])]),
    );
    client.default_reply(
        "coverage_assessment",
        serde_json::json!({"decision": "continue", "assessment": "x", "gaps_identified": ["g"]}),
    );

    let mut config = Config::default();
    config.run.max_tasks = 2;
    config.hypothesis.max_hypotheses_per_task = 2;
    config.manager.saturation_detection = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("r1", 3),
    )]);
    let manager = Manager::new(
        "Replayable question",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    let counts = replay(&events);
    let metadata = read_metadata(&summary.output_dir);

    assert_eq!(u64::from(counts.tasks_executed), metadata["tasks_executed"].as_u64().unwrap());
    assert_eq!(
        u64::from(counts.results_accumulated),
        metadata["results_accumulated"].as_u64().unwrap()
    );
    assert_eq!(
        u64::from(counts.duplicates_suppressed),
        metadata["duplicates_suppressed"].as_u64().unwrap()
    );
    assert_eq!(
        counts.coverage_decisions as usize,
        metadata["coverage_decisions_by_task"]
            .as_object()
            .unwrap()
            .values()
            .map(|v| v.as_array().unwrap().len())
            .sum::<usize>()
    );
}

// =============================================================================
// R2: hypothesis mode off
// =============================================================================

#[tokio::test]
async fn test_mode_off_runs_only_decomposition_seeds() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["only task"]);

    let mut config = Config::default();
    config.run.max_tasks = 5;
    config.hypothesis.mode = HypothesisMode::Off;
    config.manager.saturation_detection = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("off", 2),
    )]);
    let manager = Manager::new(
        "A hypothesis-free question",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    // exactly the decomposition-seeded tasks, no follow-ups
    assert_eq!(summary.tasks_created, 1);
    assert_eq!(summary.tasks_executed, 1);
    assert_eq!(summary.results_accumulated, 2);

    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    assert!(events_of(&events, ActionType::HypothesesGenerated).is_empty());
    assert!(events_of(&events, ActionType::HypothesisExecuted).is_empty());
    assert!(events_of(&events, ActionType::HypothesisQueryGeneration).is_empty());
    assert!(events_of(&events, ActionType::RelevanceScoring).is_empty());
    assert_eq!(client.call_count("hypothesis_generation"), 0);
    assert_eq!(client.call_count("relevance_evaluation"), 0);
}

// =============================================================================
// Relevance REJECT discards the hypothesis's results (P9)
// =============================================================================

#[tokio::test]
async fn test_relevance_reject_discards_batch() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["noisy task"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("noisy", &["Stub Source"])]),
    );
    client.push(
        "relevance_evaluation",
        serde_json::json!({
            "decision": "REJECT",
            "reasoning": "all landing pages",
            "relevant_indices": [],
        }),
    );

    let mut config = Config::default();
    config.run.max_tasks = 1;
    config.hypothesis.max_hypotheses_per_task = 1;
    config.run.max_retries_per_task = 0;
    config.manager.saturation_detection = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("noise", 5),
    )]);
    let manager = Manager::new(
        "A question with junk results",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    assert_eq!(summary.results_accumulated, 0);
    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    let executed = events_of(&events, ActionType::HypothesisExecuted);
    assert_eq!(executed.len(), 1);
    let payload = executed[0].action_payload.as_ref().unwrap();
    assert_eq!(payload["merged"], 5);
    assert_eq!(payload["kept"], 0);
}

// =============================================================================
// Partial relevance keeps only the indexed subset (P9)
// =============================================================================

#[tokio::test]
async fn test_relevance_indices_select_subset() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["subset task"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("subset", &["Stub Source"])]),
    );
    client.push(
        "relevance_evaluation",
        serde_json::json!({
            "decision": "ACCEPT",
            "reasoning": "two good hits",
            "relevant_indices": [0, 3],
        }),
    );

    let mut config = Config::default();
    config.run.max_tasks = 1;
    config.hypothesis.max_hypotheses_per_task = 1;
    config.manager.saturation_detection = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("sub", 5),
    )]);
    let manager = Manager::new(
        "A question with a good subset",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    assert_eq!(summary.results_accumulated, 2);
    let raw = std::fs::read_to_string(summary.output_dir.join("results.json")).unwrap();
    let results: serde_json::Value = serde_json::from_str(&raw).unwrap();
    let titles: Vec<&str> = results
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["sub result 0", "sub result 3"]);
}

// =============================================================================
// Unresolvable sources fail the hypothesis, not the task
// =============================================================================

#[tokio::test]
async fn test_no_resolvable_sources_fails_hypothesis_only() {
    let temp = TempDir::new().unwrap();
    let client = scripted_client();
    seed_decomposition(&client, &["misdirected task"]);
    client.default_reply(
        "hypothesis_generation",
        hypothesis_reply(&[("looks in the wrong place", &["No Such Source"])]),
    );

    let mut config = Config::default();
    config.run.max_tasks = 1;
    config.hypothesis.max_hypotheses_per_task = 1;
    config.run.max_retries_per_task = 0;
    config.manager.saturation_detection = false;

    let registry = stub_registry(vec![StaticIntegration::new(
        "stub",
        "Stub Source",
        results("x", 1),
    )]);
    let manager = Manager::new(
        "A question with a bad source plan",
        config,
        temp.path(),
        client.clone(),
        registry,
    )
    .unwrap();
    let summary = manager.run().await.unwrap();

    assert_eq!(summary.tasks_executed, 1);
    assert_eq!(summary.tasks_failed, 0);
    let events = read_run_events(&summary.output_dir.join("execution_log.jsonl")).unwrap();
    let failed = events_of(&events, ActionType::HypothesisFailed);
    assert_eq!(failed.len(), 1);
    assert!(
        failed[0].action_payload.as_ref().unwrap()["error"]
            .as_str()
            .unwrap()
            .contains("no resolvable sources")
    );
}
