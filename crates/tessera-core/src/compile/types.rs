//! Common types for the compilation pipeline.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cells::CellId;

/// A location in one cell's buffer.
///
/// Zero-based; `column` counts characters, not bytes. Positions never span
/// cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Convert to an absolute character offset into `text`.
    ///
    /// Returns `None` if the position lies beyond the text. The column may
    /// point one past the last character of a line (the cursor at line end).
    /// Line terminators (`\n` or `\r\n`) count toward the offset but are
    /// never addressable by a column.
    pub fn to_offset(&self, text: &str) -> Option<usize> {
        let mut offset = 0;
        for (index, line) in text.split('\n').enumerate() {
            if index == self.line as usize {
                let column = self.column as usize;
                return (column <= line_width(line)).then_some(offset + column);
            }
            offset += line.chars().count() + 1;
        }
        None
    }

    /// Convert an absolute character offset back to a position.
    ///
    /// Inverse of [`to_offset`](Self::to_offset); offsets that land inside a
    /// line terminator have no position.
    pub fn from_offset(text: &str, offset: usize) -> Option<Self> {
        let mut remaining = offset;
        for (index, line) in text.split('\n').enumerate() {
            let total = line.chars().count();
            if remaining <= total {
                return (remaining <= line_width(line))
                    .then(|| Self::new(index as u32, remaining as u32));
            }
            remaining -= total + 1;
        }
        None
    }
}

/// Characters on a line, excluding a trailing carriage return.
fn line_width(line: &str) -> usize {
    line.strip_suffix('\r').unwrap_or(line).chars().count()
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span within one cell's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Hidden,
}

/// A position-anchored message produced by the compiler backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Span the message applies to
    pub range: Range,

    /// Severity level
    pub severity: DiagnosticSeverity,

    /// Human-readable message
    pub message: String,

    /// Backend-specific code (e.g., "E0308")
    pub id: Option<String>,
}

impl Diagnostic {
    pub fn new(range: Range, severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            range,
            severity,
            message: message.into(),
            id: None,
        }
    }

    pub fn error(range: Range, message: impl Into<String>) -> Self {
        Self::new(range, DiagnosticSeverity::Error, message)
    }

    pub fn warning(range: Range, message: impl Into<String>) -> Self {
        Self::new(range, DiagnosticSeverity::Warning, message)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// A package reference reported by the backend for one cell.
///
/// The evaluation host materializes these before running cells. Two
/// references are the same dependency only if name, version requirement and
/// feature set all match; the workspace deduplicates on that full value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalDependency {
    pub name: String,

    /// Version requirement as written in the cell, if any
    pub version: Option<String>,

    /// Optional package features requested alongside the reference
    pub features: Vec<String>,
}

impl ExternalDependency {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            features: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features = features.into_iter().map(Into::into).collect();
        self
    }
}

/// Description of the runtime a cell's compiled code will execute against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationEnvironment {
    /// Working directory of the evaluation host
    pub working_directory: Option<PathBuf>,

    /// Runtime or target name (e.g., "host", "wasm32")
    pub target: Option<String>,

    /// Additional host-defined properties
    pub properties: BTreeMap<String, String>,
}

impl EvaluationEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Hash identifying this environment in compilation cache keys.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Output of the compiler backend for one cell at one version.
///
/// Shared out of the cache behind an `Arc`; a superseded compilation lives on
/// only as long as some caller still holds it.
pub struct Compilation<A> {
    /// Cell this compilation belongs to
    pub cell_id: CellId,

    /// Buffer version that was compiled
    pub version: u64,

    /// Unique, increasing number assigned when the compilation was produced
    pub generation: u64,

    /// Fingerprint of the evaluation environment used
    pub environment_fingerprint: u64,

    /// Hash of the predecessor compilations used as context
    pub context_stamp: u64,

    /// Buffer text that was compiled
    pub buffer: Arc<str>,

    /// Backend-specific compiled artifact
    pub artifact: A,

    /// Diagnostics reported by the backend
    pub diagnostics: Vec<Diagnostic>,

    /// Package references discovered in this cell
    pub dependencies: Vec<ExternalDependency>,
}

impl<A> Compilation<A> {
    /// Returns true if no error-level diagnostics were reported.
    pub fn is_success(&self) -> bool {
        !self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

impl<A> std::fmt::Debug for Compilation<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compilation")
            .field("cell_id", &self.cell_id)
            .field("version", &self.version)
            .field("generation", &self.generation)
            .field("environment_fingerprint", &self.environment_fingerprint)
            .field("diagnostics", &self.diagnostics.len())
            .field("dependencies", &self.dependencies.len())
            .finish_non_exhaustive()
    }
}

/// Hash of a sequence of compilations, identifying a compile context.
pub(crate) fn context_stamp<A>(context: &[Arc<Compilation<A>>]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for compilation in context {
        compilation.generation.hash(&mut hasher);
    }
    hasher.finish()
}
