//! Search results and their identity for deduplication

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Normalize a title for identity comparison: lowercase, punctuation
/// stripped, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    WHITESPACE.replace_all(lowered.trim(), " ").into_owned()
}

/// Identity key for a result
///
/// Two results are the same iff their urls match, else iff their normalized
/// (title, source) pair matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResultKey {
    Url(String),
    TitleSource(String, String),
}

impl std::fmt::Display for ResultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => write!(f, "url:{url}"),
            Self::TitleSource(title, source) => write!(f, "title:{title}|source:{source}"),
        }
    }
}

/// One result returned by a source adapter
///
/// `title` is the only required core field; adapter-specific data rides in
/// `extras` and is opaque to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl SearchResult {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            date: None,
            source: None,
            description: None,
            extras: serde_json::Map::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The dedup identity of this result
    pub fn key(&self) -> ResultKey {
        match &self.url {
            Some(url) if !url.is_empty() => ResultKey::Url(url.clone()),
            _ => ResultKey::TitleSource(
                normalize_title(&self.title),
                self.source.clone().unwrap_or_default(),
            ),
        }
    }
}

/// A stored result with its attribution sets
///
/// Attribution sets are BTreeSets so they serialize sorted, keeping the
/// audit log and results.json deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResult {
    #[serde(flatten)]
    pub result: SearchResult,
    /// Hypotheses that surfaced this result
    pub hypothesis_ids: BTreeSet<u32>,
    /// Tasks that surfaced this result
    pub task_ids: BTreeSet<u32>,
}
