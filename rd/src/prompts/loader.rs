//! Prompt loader
//!
//! Resolves a stable template name to text and renders it with handlebars
//! in strict mode, so a missing variable is a distinct failure rather than
//! silently empty prompt text.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use handlebars::Handlebars;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::embedded;

/// Simple `{{variable}}` references; block helpers and paths are left to
/// handlebars itself
static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// The stable template names the engine addresses
pub const TEMPLATE_NAMES: [&str; 10] = [
    "task_decomposition",
    "task_prioritization",
    "hypothesis_generation",
    "hypothesis_query_generation",
    "relevance_evaluation",
    "coverage_assessment",
    "saturation_detection",
    "follow_up_generation",
    "entity_extraction",
    "report_synthesis",
];

/// Prompt resolution and rendering failures
///
/// Either kind fails the enclosing LLM call.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt template not found: {0}")]
    TemplateNotFound(String),

    #[error("template '{template}' references missing variable '{variable}'")]
    MissingVariable { template: String, variable: String },

    #[error("template '{template}' failed to render: {detail}")]
    Render { template: String, detail: String },

    #[error("failed to read template '{template}': {detail}")]
    Read { template: String, detail: String },
}

/// Loads and renders prompt templates
///
/// Template loading chain:
/// 1. `.researchdaemon/prompts/{name}.pmt` (user override)
/// 2. `prompts/{name}.pmt` (repo default)
/// 3. Embedded fallback compiled into the binary
pub struct PromptLoader {
    hbs: Handlebars<'static>,
    user_dir: Option<PathBuf>,
    repo_dir: Option<PathBuf>,
}

impl PromptLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref();
        let user_dir = base_dir.join(".researchdaemon/prompts");
        let repo_dir = base_dir.join("prompts");
        debug!(?user_dir, ?repo_dir, "PromptLoader::new");

        Self {
            hbs: strict_handlebars(),
            user_dir: user_dir.exists().then_some(user_dir),
            repo_dir: repo_dir.exists().then_some(repo_dir),
        }
    }

    /// A loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        Self {
            hbs: strict_handlebars(),
            user_dir: None,
            repo_dir: None,
        }
    }

    fn load_template(&self, name: &str) -> Result<String, PromptError> {
        for dir in [&self.user_dir, &self.repo_dir].into_iter().flatten() {
            let path = dir.join(format!("{name}.pmt"));
            if path.exists() {
                debug!(?path, "template resolved from disk");
                return std::fs::read_to_string(&path).map_err(|e| PromptError::Read {
                    template: name.to_string(),
                    detail: e.to_string(),
                });
            }
        }

        if let Some(content) = embedded::get_embedded(name) {
            return Ok(content.to_string());
        }
        Err(PromptError::TemplateNotFound(name.to_string()))
    }

    /// Render a template with the given variables.
    ///
    /// Every `{{variable}}` the template references must be present in
    /// `vars`; the check runs before rendering so the error names the
    /// variable.
    pub fn render<T: Serialize>(&self, name: &str, vars: &T) -> Result<String, PromptError> {
        let template = self.load_template(name)?;

        let value = serde_json::to_value(vars).map_err(|e| PromptError::Render {
            template: name.to_string(),
            detail: e.to_string(),
        })?;
        for captures in VARIABLE.captures_iter(&template) {
            let variable = &captures[1];
            if value.get(variable).is_none() {
                return Err(PromptError::MissingVariable {
                    template: name.to_string(),
                    variable: variable.to_string(),
                });
            }
        }

        self.hbs
            .render_template(&template, &value)
            .map_err(|e| PromptError::Render {
                template: name.to_string(),
                detail: e.to_string(),
            })
    }
}

fn strict_handlebars() -> Handlebars<'static> {
    let mut hbs = Handlebars::new();
    hbs.set_strict_mode(true);
    hbs
}
