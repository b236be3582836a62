//! Domain types for a research run
//!
//! The run owns a flat task list; tasks reference other tasks by integer id;
//! results reference tasks and hypotheses by id. No pointer cycles.

mod coverage;
mod hypothesis;
mod result;
mod run;
mod task;

pub use coverage::{
    CoverageCall, CoverageDecision, CoverageFacts, SaturationRecommendation, SaturationVerdict,
};
pub use hypothesis::{Hypothesis, SearchStrategy};
pub use result::{ResultKey, SearchResult, StoredResult, normalize_title};
pub use run::{RunClock, RunContext, slugify};
pub use task::{ResearchTask, TaskExecutionSummary, TaskMetadata, TaskStatus};
