//! Run identity, output layout, and the wall-clock budget

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::error::EngineError;

/// Maximum length of the slugified question in the run id
const SLUG_MAX_LEN: usize = 48;

static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Reduce a research question to a filesystem-safe slug
pub fn slugify(question: &str) -> String {
    let lowered = question.to_lowercase();
    let slug = NON_SLUG.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    let mut slug = slug.to_string();
    if slug.len() > SLUG_MAX_LEN {
        slug.truncate(SLUG_MAX_LEN);
        let trimmed = slug.trim_end_matches('-').len();
        slug.truncate(trimmed);
    }
    if slug.is_empty() {
        slug.push_str("question");
    }
    slug
}

/// Monotonic clock with the run and task budgets
///
/// Deadlines are advisory: they cause orderly abandonment of further work in
/// the affected scope, never forced interruption of in-flight calls (those
/// carry their own timeouts).
#[derive(Debug, Clone)]
pub struct RunClock {
    started: Instant,
    max_run: Duration,
    task_timeout: Duration,
}

impl RunClock {
    pub fn new(max_run_minutes: u64, task_timeout_seconds: u64) -> Self {
        Self {
            started: Instant::now(),
            max_run: Duration::from_secs(max_run_minutes * 60),
            task_timeout: Duration::from_secs(task_timeout_seconds),
        }
    }

    /// Elapsed wall clock since run start
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Has the per-run hard deadline passed?
    pub fn run_expired(&self) -> bool {
        self.elapsed() >= self.max_run
    }

    /// Has the per-task soft deadline passed for a task started at `task_started`?
    pub fn task_expired(&self, task_started: Instant) -> bool {
        task_started.elapsed() >= self.task_timeout
    }
}

/// Identity and on-disk layout of one research run
///
/// Created once per invocation; never mutated after the run closes.
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub question: String,
    pub started_at: DateTime<Utc>,
    pub output_dir: PathBuf,
    pub clock: RunClock,
}

impl RunContext {
    /// Create the run identity and its timestamped output directory under
    /// `output_root`, named `YYYY-MM-DD_HH-MM-SS_<slug>`.
    pub fn create(question: &str, config: &Config, output_root: &Path) -> Result<Self, EngineError> {
        let started_at = Utc::now();
        let slug = slugify(question);
        let run_id = format!("{}_{}", started_at.format("%Y-%m-%d_%H-%M-%S"), slug);
        let output_dir = output_root.join(&run_id);
        std::fs::create_dir_all(&output_dir)?;
        if config.run.keep_raw_responses {
            std::fs::create_dir_all(output_dir.join("raw"))?;
        }
        debug!(%run_id, ?output_dir, "RunContext::create");

        Ok(Self {
            run_id,
            question: question.to_string(),
            started_at,
            output_dir,
            clock: RunClock::new(config.run.max_time_minutes, config.task.timeout_seconds),
        })
    }

    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join("execution_log.jsonl")
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.output_dir.join("raw")
    }
}
