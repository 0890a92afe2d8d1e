//! A scripted compiler backend for integration tests.
//!
//! Buffers are line-oriented:
//! - `let NAME = ...` declares `NAME`
//! - `use NAME@VERSION` references a package
//! - a line starting with `error` produces an error diagnostic
//! - `fail!` anywhere makes the backend itself fail
//! - `hover_fail` anywhere makes hover requests fail
//!
//! The recorder records every compile, can hold compiles at a gate until the
//! test releases them, and keeps the cancellation token of each compile.
//! Hover and completion requests have a gate and token log of their own.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tessera_core::{
    BackendFailure, BackendOutput, BackendResult, CancellationToken, CellId, CompileRequest,
    Compilation, CompilerBackend, CompletionItem, CompletionItemKind, Diagnostic,
    ExternalDependency, Hover, ParameterInformation, Position, Range, SignatureHelp,
    SignatureInformation, WorkspaceConfiguration, WorkspaceService,
};
use tokio::sync::Semaphore;

/// Symbols visible after compiling a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptArtifact {
    pub declared: Vec<String>,
    pub visible: Vec<String>,
}

pub struct Recorder {
    compiles: AtomicUsize,
    compiled: Mutex<Vec<(CellId, String)>>,
    tokens: Mutex<Vec<CancellationToken>>,
    gated: AtomicBool,
    gate: Semaphore,
    queries: AtomicUsize,
    query_tokens: Mutex<Vec<CancellationToken>>,
    queries_gated: AtomicBool,
    query_gate: Semaphore,
}

impl Recorder {
    fn new() -> Self {
        Self {
            compiles: AtomicUsize::new(0),
            compiled: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            queries: AtomicUsize::new(0),
            query_tokens: Mutex::new(Vec::new()),
            queries_gated: AtomicBool::new(false),
            query_gate: Semaphore::new(0),
        }
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// Buffers compiled so far, in call order.
    pub fn compiled(&self) -> Vec<(CellId, String)> {
        self.compiled.lock().unwrap().clone()
    }

    /// Hold every subsequent compile until released.
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let `n` held compiles proceed.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn last_token(&self) -> CancellationToken {
        self.tokens
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no compile has started")
    }

    /// Hover and completion requests that reached the backend.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Hold every subsequent hover and completion request until released.
    pub fn close_query_gate(&self) {
        self.queries_gated.store(true, Ordering::SeqCst);
    }

    pub fn release_queries(&self, n: usize) {
        self.query_gate.add_permits(n);
    }

    pub fn last_query_token(&self) -> CancellationToken {
        self.query_tokens
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no query has started")
    }

    /// Record a query and wait at the query gate if it is closed.
    async fn enter_query(&self, cancel: &CancellationToken) -> BackendResult<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.query_tokens.lock().unwrap().push(cancel.clone());

        if self.queries_gated.load(Ordering::SeqCst) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendFailure::new("cancelled")),
                permit = self.query_gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct ScriptedBackend {
    recorder: Arc<Recorder>,
}

impl ScriptedBackend {
    pub fn new() -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::new());
        (
            Self {
                recorder: Arc::clone(&recorder),
            },
            recorder,
        )
    }
}

fn declared_names(buffer: &str) -> Vec<String> {
    buffer
        .lines()
        .filter_map(|line| line.trim().strip_prefix("let "))
        .filter_map(|rest| rest.split('=').next())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn word_at(buffer: &str, position: Position) -> Option<String> {
    let line = buffer.lines().nth(position.line as usize)?;
    let chars: Vec<char> = line.chars().collect();
    let is_word = |c: &char| c.is_alphanumeric() || *c == '_';
    let column = (position.column as usize).min(chars.len());

    let start = chars[..column]
        .iter()
        .rposition(|c| !is_word(c))
        .map_or(0, |i| i + 1);
    let end = chars[column..]
        .iter()
        .position(|c| !is_word(c))
        .map_or(chars.len(), |i| column + i);

    (start < end).then(|| chars[start..end].iter().collect())
}

#[async_trait]
impl CompilerBackend for ScriptedBackend {
    type Artifact = ScriptArtifact;

    fn is_complete(&self, buffer: &str) -> bool {
        let opened = buffer.matches(['(', '{']).count();
        let closed = buffer.matches([')', '}']).count();
        opened == closed && !buffer.trim_end().ends_with('=')
    }

    async fn compile(
        &self,
        request: CompileRequest<'_, ScriptArtifact>,
        cancel: CancellationToken,
    ) -> BackendResult<BackendOutput<ScriptArtifact>> {
        self.recorder.compiles.fetch_add(1, Ordering::SeqCst);
        self.recorder
            .compiled
            .lock()
            .unwrap()
            .push((request.cell_id, request.buffer.to_string()));
        self.recorder.tokens.lock().unwrap().push(cancel.clone());

        if self.recorder.gated.load(Ordering::SeqCst) {
            tokio::select! {
                _ = cancel.cancelled() => return Err(BackendFailure::new("cancelled")),
                permit = self.recorder.gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
            }
        }

        if request.buffer.contains("fail!") {
            return Err(BackendFailure::new("backend crashed"));
        }

        let declared = declared_names(request.buffer);
        let mut visible: Vec<String> = request
            .context
            .iter()
            .flat_map(|c| c.artifact.declared.iter().cloned())
            .collect();
        visible.extend(declared.iter().cloned());

        let mut diagnostics = Vec::new();
        let mut dependencies = Vec::new();
        for (line, text) in request.buffer.lines().enumerate() {
            let line = line as u32;
            if text.starts_with("error") {
                let range = Range::new(
                    Position::new(line, 0),
                    Position::new(line, text.chars().count() as u32),
                );
                diagnostics.push(Diagnostic::error(range, text).with_id("E0001"));
            }
            if let Some(package) = text.trim().strip_prefix("use ") {
                if let Some((name, version)) = package.split_once('@') {
                    dependencies.push(ExternalDependency::new(name).with_version(version));
                }
            }
        }

        Ok(BackendOutput::new(ScriptArtifact { declared, visible })
            .with_diagnostics(diagnostics)
            .with_dependencies(dependencies))
    }

    async fn hover(
        &self,
        compilation: &Compilation<ScriptArtifact>,
        position: Position,
        cancel: CancellationToken,
    ) -> BackendResult<Option<Hover>> {
        self.recorder.enter_query(&cancel).await?;
        if compilation.buffer.contains("hover_fail") {
            return Err(BackendFailure::new("hover crashed"));
        }
        Ok(word_at(&compilation.buffer, position)
            .filter(|word| compilation.artifact.visible.contains(word))
            .map(|word| Hover::new(format!("let {word}"))))
    }

    async fn completions(
        &self,
        compilation: &Compilation<ScriptArtifact>,
        _position: Position,
        cancel: CancellationToken,
    ) -> BackendResult<Vec<CompletionItem>> {
        self.recorder.enter_query(&cancel).await?;
        Ok(compilation
            .artifact
            .visible
            .iter()
            .map(|name| CompletionItem::new(name, CompletionItemKind::Variable))
            .collect())
    }

    async fn signature_help(
        &self,
        compilation: &Compilation<ScriptArtifact>,
        _position: Position,
        _cancel: CancellationToken,
    ) -> BackendResult<Option<SignatureHelp>> {
        if !compilation.buffer.contains('(') {
            return Ok(None);
        }
        Ok(Some(SignatureHelp {
            signatures: vec![SignatureInformation {
                label: "call(value)".to_string(),
                documentation: None,
                parameters: vec![ParameterInformation {
                    label: "value".to_string(),
                    documentation: None,
                }],
            }],
            active_signature: 0,
            active_parameter: 0,
        }))
    }
}

/// A fresh workspace over a scripted backend.
pub fn workspace() -> (WorkspaceService<ScriptedBackend>, Arc<Recorder>) {
    init_tracing();
    let (backend, recorder) = ScriptedBackend::new();
    let workspace =
        WorkspaceService::new(backend, WorkspaceConfiguration::for_language("script"));
    (workspace, recorder)
}

/// Wait until `condition` holds, failing the test after a few seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
