//! Workspace configuration and metadata.

use serde::{Deserialize, Serialize};

/// Capacity for the workspace event channel.
/// Subscribers that fall further behind than this lose the oldest events.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Identity of the evaluation context a workspace feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationContextId(uuid::Uuid);

impl EvaluationContextId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for EvaluationContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EvaluationContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Language and runtime options a workspace is opened with.
///
/// Fixed for the lifetime of the workspace; the backend receives it with
/// every compile request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfiguration {
    /// Language of the cells (e.g., "csharp", "rust")
    pub language: String,

    /// Language version the backend should target, if not its default
    pub language_version: Option<String>,

    /// Imports implicitly in scope for every cell
    pub default_imports: Vec<String>,

    /// Capacity of the event channel returned by `subscribe`
    pub event_capacity: usize,
}

impl Default for WorkspaceConfiguration {
    fn default() -> Self {
        Self {
            language: "plaintext".to_string(),
            language_version: None,
            default_imports: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl WorkspaceConfiguration {
    /// Create a configuration for the given language.
    pub fn for_language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Default::default()
        }
    }

    pub fn with_language_version(mut self, version: impl Into<String>) -> Self {
        self.language_version = Some(version.into());
        self
    }

    pub fn with_default_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_imports = imports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}
