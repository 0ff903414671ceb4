//! Per-run state shared between the driver and the stages.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kiln_common::current_millis;
use kiln_diagnostics::{CompilerMessage, MessageCategory, MessageSink};
use kiln_project::{Module, Project, SourceRoot};

use crate::progress::ProgressIndicator;
use crate::scope::{CompileScope, CompositeScope};

/// Flags describing the kind of run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    /// Everything is wiped and compiled from scratch.
    pub is_rebuild: bool,
    /// Every file in scope is compiled regardless of timestamps.
    pub force_compile: bool,
    /// Dependents of changed files are queued up front.
    pub track_dependencies: bool,
    /// Nothing is modified; the run only looks for pending work.
    pub check_only: bool,
}

/// State of one driver run.
///
/// Stages receive a shared reference. They report problems through
/// [`add_message`](Self::add_message) and may ask for a full rebuild through
/// [`request_rebuild`](Self::request_rebuild).
#[derive(Debug)]
pub struct CompileContext {
    project: Arc<Project>,
    scope: CompositeScope,
    mode: RunMode,
    messages: MessageSink,
    rebuild_reason: Mutex<Option<String>>,
    progress: ProgressIndicator,
    start_stamp: i64,
    assigned_roots: Mutex<Vec<(String, SourceRoot)>>,
    roots_memo: Mutex<HashMap<String, Vec<SourceRoot>>>,
    generated: Mutex<BTreeSet<PathBuf>>,
}

impl CompileContext {
    /// Creates the context for a run over `scope`.
    pub fn new(
        project: Arc<Project>,
        scope: Box<dyn CompileScope>,
        mode: RunMode,
        progress: ProgressIndicator,
    ) -> Self {
        let mut composite = CompositeScope::new();
        composite.push(scope);
        Self {
            project,
            scope: composite,
            mode,
            messages: MessageSink::new(),
            rebuild_reason: Mutex::new(None),
            progress,
            start_stamp: current_millis(),
            assigned_roots: Mutex::new(Vec::new()),
            roots_memo: Mutex::new(HashMap::new()),
            generated: Mutex::new(BTreeSet::new()),
        }
    }

    /// The project being compiled.
    pub fn project(&self) -> &Project {
        &self.project
    }

    /// The run's scope, including roots added during the run.
    pub fn scope(&self) -> &dyn CompileScope {
        &self.scope
    }

    /// Widens the run's scope.
    pub fn add_scope(&mut self, scope: Box<dyn CompileScope>) {
        self.scope.push(scope);
    }

    /// Kind of run.
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Returns `true` on a full rebuild.
    pub fn is_rebuild(&self) -> bool {
        self.mode.is_rebuild
    }

    /// Returns `true` if every file in scope is compiled.
    pub fn is_force_compile(&self) -> bool {
        self.mode.force_compile || self.mode.is_rebuild
    }

    /// Milliseconds since the epoch when the run started.
    pub fn start_stamp(&self) -> i64 {
        self.start_stamp
    }

    /// Progress and cancellation of the run.
    pub fn progress(&self) -> &ProgressIndicator {
        &self.progress
    }

    /// Returns `true` once the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.progress.is_cancelled()
    }

    /// Records a diagnostic.
    pub fn add_message(&self, message: CompilerMessage) {
        self.messages.emit(message);
    }

    /// The run's diagnostics.
    pub fn messages(&self) -> &MessageSink {
        &self.messages
    }

    /// Number of messages of a category.
    pub fn message_count(&self, category: MessageCategory) -> usize {
        self.messages.count(category)
    }

    /// Returns `true` if an error was reported.
    pub fn has_errors(&self) -> bool {
        self.messages.has_errors()
    }

    /// Asks for the run to be repeated as a full rebuild.
    ///
    /// The first reason sticks; later requests are ignored.
    pub fn request_rebuild(&self, reason: impl Into<String>) {
        let mut slot = self.rebuild_reason.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            let reason = reason.into();
            tracing::info!(%reason, "rebuild requested");
            *slot = Some(reason);
        }
    }

    /// The reason a rebuild was requested, if one was.
    pub fn rebuild_reason(&self) -> Option<String> {
        self.rebuild_reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Attributes every file under `root` to `module`.
    ///
    /// Used for roots that are not part of the project model, such as
    /// generated-source directories.
    pub fn assign_root(&self, root: impl Into<PathBuf>, module: &str, is_test: bool) {
        let root = SourceRoot {
            path: root.into(),
            is_test,
        };
        self.assigned_roots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((module.to_string(), root));
        self.roots_memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(module);
    }

    /// Source roots of a module, including assigned roots.
    pub fn source_roots(&self, module: &str) -> Vec<SourceRoot> {
        let mut memo = self.roots_memo.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(roots) = memo.get(module) {
            return roots.clone();
        }
        let mut roots: Vec<SourceRoot> = self
            .project
            .module(module)
            .map(|m| m.source_roots.clone())
            .unwrap_or_default();
        roots.extend(
            self.assigned_roots
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .filter(|(m, _)| m == module)
                .map(|(_, r)| r.clone()),
        );
        memo.insert(module.to_string(), roots.clone());
        roots
    }

    /// Finds the module owning `path` and whether it is a test source.
    ///
    /// Assigned roots are consulted when no project source root matches.
    pub fn module_for_file(&self, path: &Path) -> Option<(&Module, bool)> {
        if let Some(found) = self.project.module_for_file(path) {
            return Some(found);
        }
        let assigned = self.assigned_roots.lock().unwrap_or_else(|e| e.into_inner());
        let (name, root) = assigned
            .iter()
            .filter(|(_, r)| path.starts_with(&r.path))
            .max_by_key(|(_, r)| r.path.components().count())?;
        let is_test = root.is_test;
        let name = name.clone();
        drop(assigned);
        self.project.module(&name).map(|m| (m, is_test))
    }

    /// Output root for a source file, from its owning module.
    pub fn output_dir_for(&self, path: &Path) -> Option<PathBuf> {
        let (module, is_test) = self.module_for_file(path)?;
        module.output_dir(is_test).map(Path::to_path_buf)
    }

    /// Relative path of `path` inside the source root that owns it.
    pub fn relative_source_path(&self, path: &Path) -> Option<PathBuf> {
        let (module, _) = self.module_for_file(path)?;
        self.source_roots(&module.name)
            .iter()
            .filter(|r| path.starts_with(&r.path))
            .max_by_key(|r| r.path.components().count())
            .and_then(|r| path.strip_prefix(&r.path).ok())
            .map(Path::to_path_buf)
    }

    /// Directory a generating stage writes a module's sources into.
    pub fn generation_output_dir(&self, stage_id: &str, module: &str, is_test: bool) -> PathBuf {
        generation_output_dir(&self.project, stage_id, module, is_test)
    }

    /// Records files written by a generating stage in this run.
    pub fn mark_generated(&self, files: impl IntoIterator<Item = PathBuf>) {
        self.generated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(files);
    }

    /// Returns `true` if `path` was generated in this run.
    pub fn is_generated(&self, path: &Path) -> bool {
        self.generated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }
}

pub(crate) fn generation_output_dir(
    project: &Project,
    stage_id: &str,
    module: &str,
    is_test: bool,
) -> PathBuf {
    let kind = if is_test { "test" } else { "production" };
    project.generated_dir().join(stage_id).join(module).join(kind)
}
