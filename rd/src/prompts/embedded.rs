//! Embedded prompts
//!
//! Compiled into the binary from the repo's .pmt files so the engine works
//! without a prompts directory on disk.

pub const TASK_DECOMPOSITION: &str = include_str!("../../prompts/task_decomposition.pmt");
pub const TASK_PRIORITIZATION: &str = include_str!("../../prompts/task_prioritization.pmt");
pub const HYPOTHESIS_GENERATION: &str = include_str!("../../prompts/hypothesis_generation.pmt");
pub const HYPOTHESIS_QUERY_GENERATION: &str =
    include_str!("../../prompts/hypothesis_query_generation.pmt");
pub const RELEVANCE_EVALUATION: &str = include_str!("../../prompts/relevance_evaluation.pmt");
pub const COVERAGE_ASSESSMENT: &str = include_str!("../../prompts/coverage_assessment.pmt");
pub const SATURATION_DETECTION: &str = include_str!("../../prompts/saturation_detection.pmt");
pub const FOLLOW_UP_GENERATION: &str = include_str!("../../prompts/follow_up_generation.pmt");
pub const ENTITY_EXTRACTION: &str = include_str!("../../prompts/entity_extraction.pmt");
pub const REPORT_SYNTHESIS: &str = include_str!("../../prompts/report_synthesis.pmt");

/// Get an embedded prompt by its stable template name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    match name {
        "task_decomposition" => Some(TASK_DECOMPOSITION),
        "task_prioritization" => Some(TASK_PRIORITIZATION),
        "hypothesis_generation" => Some(HYPOTHESIS_GENERATION),
        "hypothesis_query_generation" => Some(HYPOTHESIS_QUERY_GENERATION),
        "relevance_evaluation" => Some(RELEVANCE_EVALUATION),
        "coverage_assessment" => Some(COVERAGE_ASSESSMENT),
        "saturation_detection" => Some(SATURATION_DETECTION),
        "follow_up_generation" => Some(FOLLOW_UP_GENERATION),
        "entity_extraction" => Some(ENTITY_EXTRACTION),
        "report_synthesis" => Some(REPORT_SYNTHESIS),
        _ => None,
    }
}
