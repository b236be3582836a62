//! Run configuration types and loading
//!
//! YAML with kebab-case keys. Unknown keys are rejected at startup; an
//! out-of-range value is `ConfigInvalid` and aborts before any research
//! work begins.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub llm: LlmConfig,
    pub task: TaskConfig,
    pub hypothesis: HypothesisConfig,
    pub manager: ManagerConfig,
    #[serde(rename = "follow-up")]
    pub follow_up: FollowUpConfig,
    /// Per-source settings keyed by source id
    pub integrations: HashMap<String, IntegrationSettings>,
}

impl Config {
    /// Load configuration with fallback chain:
    /// explicit path, `.researchdaemon.yml`, then
    /// `~/.config/researchdaemon/researchdaemon.yml`, then defaults.
    ///
    /// Any file that is found must parse and validate; a malformed config is
    /// fatal rather than silently skipped.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self, EngineError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local = PathBuf::from(".researchdaemon.yml");
        if local.exists() {
            return Self::load_from_file(&local);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("researchdaemon").join("researchdaemon.yml");
            if user.exists() {
                return Self::load_from_file(&user);
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            EngineError::ConfigInvalid(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Range checks beyond what serde enforces
    pub fn validate(&self) -> Result<(), EngineError> {
        fn require(cond: bool, message: &str) -> Result<(), EngineError> {
            if cond {
                Ok(())
            } else {
                Err(EngineError::ConfigInvalid(message.to_string()))
            }
        }

        require(self.run.max_tasks >= 1, "run.max-tasks must be at least 1")?;
        require(
            self.run.max_time_minutes >= 1,
            "run.max-time-minutes must be at least 1",
        )?;
        require(!self.llm.model.is_empty(), "llm.model must not be empty")?;
        require(
            self.llm.request_timeout_seconds >= 1,
            "llm.request-timeout-seconds must be at least 1",
        )?;
        require(
            self.task.timeout_seconds >= 1,
            "task.timeout-seconds must be at least 1",
        )?;
        require(
            self.hypothesis.max_hypotheses_per_task >= 1,
            "hypothesis.max-hypotheses-per-task must be at least 1",
        )?;
        require(
            self.hypothesis.max_sources_fanout >= 1,
            "hypothesis.max-sources-fanout must be at least 1",
        )?;
        require(
            self.hypothesis.max_results_per_source >= 1,
            "hypothesis.max-results-per-source must be at least 1",
        )?;
        require(
            self.manager.saturation_check_interval >= 1,
            "manager.saturation-check-interval must be at least 1",
        )?;
        require(
            self.manager.saturation_confidence_threshold <= 100,
            "manager.saturation-confidence-threshold must be 0-100",
        )?;
        Ok(())
    }

    /// Budget regime: tight ceilings, saturation may halt scheduling
    pub fn budget_mode() -> Self {
        let mut config = Self::default();
        config.run.max_tasks = 10;
        config.run.max_time_minutes = 60;
        config.manager.allow_saturation_stop = true;
        config
    }

    /// Expert regime: wide ceilings, saturation is advisory only
    pub fn expert_mode() -> Self {
        let mut config = Self::default();
        config.run.max_tasks = 40;
        config.run.max_time_minutes = 360;
        config.manager.allow_saturation_stop = false;
        config
    }
}

/// Run-level ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Hard ceiling on total tasks, follow-ups included
    #[serde(rename = "max-tasks")]
    pub max_tasks: u32,

    /// Hard wall-clock ceiling
    #[serde(rename = "max-time-minutes")]
    pub max_time_minutes: u64,

    /// Below this many new results a task counts as empty-handed and may retry
    #[serde(rename = "min-results-per-task")]
    pub min_results_per_task: u32,

    #[serde(rename = "max-retries-per-task")]
    pub max_retries_per_task: u32,

    /// Persist raw adapter responses under raw/
    #[serde(rename = "keep-raw-responses")]
    pub keep_raw_responses: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_tasks: 15,
            max_time_minutes: 360,
            min_results_per_task: 1,
            max_retries_per_task: 1,
            keep_raw_responses: false,
        }
    }
}

/// LLM provider and gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    pub model: String,

    /// Tried in order on transient failure
    #[serde(rename = "fallback-models")]
    pub fallback_models: Vec<String>,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    #[serde(rename = "base-url")]
    pub base_url: String,

    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Hard per-call deadline
    #[serde(rename = "request-timeout-seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            fallback_models: Vec::new(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
            request_timeout_seconds: 180,
        }
    }
}

/// Per-task settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    /// Per-task soft deadline
    #[serde(rename = "timeout-seconds")]
    pub timeout_seconds: u64,

    /// Run the legacy pre-hypothesis search phase
    #[serde(rename = "initial-search")]
    pub initial_search: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 1800,
            initial_search: false,
        }
    }
}

/// Whether hypotheses are generated and executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HypothesisMode {
    /// No hypotheses; tasks run the initial search only
    Off,
    /// Generate and record hypotheses without executing them
    Planning,
    /// Generate and execute
    #[default]
    Execution,
}

/// Hypothesis loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HypothesisConfig {
    pub mode: HypothesisMode,

    /// Sequential coverage-assessed execution; false runs hypotheses in
    /// parallel without coverage assessment
    #[serde(rename = "coverage-mode")]
    pub coverage_mode: bool,

    #[serde(rename = "max-hypotheses-per-task")]
    pub max_hypotheses_per_task: u32,

    /// Per-hypothesis search concurrency
    #[serde(rename = "max-sources-fanout")]
    pub max_sources_fanout: usize,

    /// Result limit passed to each adapter search
    #[serde(rename = "max-results-per-source")]
    pub max_results_per_source: usize,
}

impl Default for HypothesisConfig {
    fn default() -> Self {
        Self {
            mode: HypothesisMode::Execution,
            coverage_mode: true,
            max_hypotheses_per_task: 5,
            max_sources_fanout: 5,
            max_results_per_source: 20,
        }
    }
}

/// Scheduler behaviors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Enable LLM-based prioritization and saturation detection
    pub enabled: bool,

    #[serde(rename = "reprioritize-after-task")]
    pub reprioritize_after_task: bool,

    #[serde(rename = "saturation-detection")]
    pub saturation_detection: bool,

    /// Check every N completed tasks
    #[serde(rename = "saturation-check-interval")]
    pub saturation_check_interval: u32,

    /// Minimum confidence (0-100) before a saturation verdict may act
    #[serde(rename = "saturation-confidence-threshold")]
    pub saturation_confidence_threshold: u8,

    /// Whether saturation may halt scheduling
    #[serde(rename = "allow-saturation-stop")]
    pub allow_saturation_stop: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reprioritize_after_task: true,
            saturation_detection: true,
            saturation_check_interval: 3,
            saturation_confidence_threshold: 70,
            allow_saturation_stop: false,
        }
    }
}

/// Follow-up generation ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FollowUpConfig {
    /// Per-parent ceiling; null disables the ceiling
    #[serde(rename = "max-follow-ups-per-task")]
    pub max_follow_ups_per_task: Option<u32>,
}

impl Default for FollowUpConfig {
    fn default() -> Self {
        Self {
            max_follow_ups_per_task: Some(2),
        }
    }
}

/// Per-source feature flag and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegrationSettings {
    pub enabled: bool,

    /// Credential, if the adapter needs one. Never serialized back out, so
    /// config snapshots in metadata.json stay free of secrets.
    #[serde(rename = "api-key", skip_serializing)]
    pub api_key: Option<String>,

    /// Environment variable to resolve the credential from when `api-key`
    /// is not set directly
    #[serde(rename = "api-key-env")]
    pub api_key_env: Option<String>,

    /// Per-adapter search deadline
    #[serde(rename = "timeout-seconds")]
    pub timeout_seconds: u64,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_key_env: None,
            timeout_seconds: 30,
        }
    }
}

impl IntegrationSettings {
    /// The credential to pass to `execute_search`, env-resolved
    pub fn resolved_api_key(&self) -> Option<String> {
        if self.api_key.is_some() {
            return self.api_key.clone();
        }
        self.api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
    }
}
