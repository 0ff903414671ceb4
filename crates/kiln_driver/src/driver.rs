//! The compile driver: run protocol, pipeline and rebuild handling.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kiln_cache::{read_status, write_status, CacheManager, CompileStatus, CACHE_FORMAT_VERSION};
use kiln_diagnostics::{CompilerMessage, MessageCategory};
use kiln_project::Project;
use tracing::{debug, info, warn};

use crate::context::{generation_output_dir, CompileContext, RunMode};
use crate::error::{DriverError, StageError};
use crate::fs;
use crate::progress::{CancelToken, ProgressIndicator};
use crate::refresh::{LogRefreshSink, RefreshSink};
use crate::scope::{CompileScope, FileSetScope, ProjectScope, TrackDependenciesScope};
use crate::stage::{Stage, StageCategory};
use crate::status::{status_message, ExitStatus};

/// Behaviour knobs of a driver.
#[derive(Debug, Clone)]
pub struct DriverOptions {
    /// On a rebuild, empty output directories wholesale instead of deleting
    /// only the outputs recorded in the caches.
    pub clear_output_directory: bool,
    /// How often a run may restart itself as a rebuild.
    pub max_rebuild_restarts: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            clear_output_directory: true,
            max_rebuild_restarts: 1,
        }
    }
}

/// A task run before or after the pipeline. Returning `false` cancels the run.
pub trait CompileTask: Send + Sync {
    /// Runs the task.
    fn execute(&self, ctx: &CompileContext) -> bool;
}

impl<F> CompileTask for F
where
    F: Fn(&CompileContext) -> bool + Send + Sync,
{
    fn execute(&self, ctx: &CompileContext) -> bool {
        self(ctx)
    }
}

/// Asked whether a rebuild may proceed when output roots overlap source
/// roots. Accepting keeps the output directories and deletes only recorded
/// outputs.
pub type OverlapConfirmation = Box<dyn Fn(&[PathBuf]) -> bool + Send + Sync>;

/// Delivered exactly once per public run.
#[derive(Debug, Clone, Default)]
pub struct CompileNotification {
    /// The run stopped before completing the pipeline.
    pub aborted: bool,
    /// Number of error messages.
    pub errors: usize,
    /// Number of warning messages.
    pub warnings: usize,
    /// Final status, if the run got far enough to compute one.
    pub status: Option<ExitStatus>,
    /// Every message of the run, in emission order.
    pub messages: Vec<CompilerMessage>,
}

/// Why the pipeline stopped early.
#[derive(Debug)]
pub(crate) enum Interrupt {
    /// The run ends with this status.
    Exit(ExitStatus),
    /// A dry run found pending work.
    HasWork,
    /// A stage or the driver failed.
    Fault(DriverError),
}

impl Interrupt {
    pub(crate) fn fault(stage: &str, source: StageError) -> Self {
        Interrupt::Fault(DriverError::StageFault {
            stage: stage.to_string(),
            source,
        })
    }
}

pub(crate) type Step<T> = Result<T, Interrupt>;

/// Stops the pipeline once cancellation was requested.
pub(crate) fn checkpoint(ctx: &CompileContext) -> Step<()> {
    if ctx.is_cancelled() {
        return Err(Interrupt::Exit(ExitStatus::Cancelled));
    }
    Ok(())
}

/// How one attempt of a run ended.
enum RunEnd {
    Finished(ExitStatus),
    /// Validation failed; nothing was touched.
    Aborted,
    /// The caches cannot be trusted; start over as a rebuild.
    Rebuild(String),
    /// A rebuild was requested during the run.
    Restart(String),
}

/// Drives compilation of a project through the stage pipeline.
pub struct CompileDriver {
    project: Arc<Project>,
    stages: Vec<Stage>,
    options: DriverOptions,
    before_tasks: Vec<Box<dyn CompileTask>>,
    after_tasks: Vec<Box<dyn CompileTask>>,
    refresh: Box<dyn RefreshSink>,
    overlap_confirmation: OverlapConfirmation,
    cancel: CancelToken,
    run_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl CompileDriver {
    /// Creates a driver for `project` with the given stages.
    pub fn new(project: Arc<Project>, stages: Vec<Stage>, options: DriverOptions) -> Self {
        Self {
            project,
            stages,
            options,
            before_tasks: Vec::new(),
            after_tasks: Vec::new(),
            refresh: Box::new(LogRefreshSink),
            overlap_confirmation: Box::new(|_: &[PathBuf]| true),
            cancel: CancelToken::new(),
            run_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        }
    }

    /// Adds a task run before the pipeline.
    pub fn with_before_task(mut self, task: impl CompileTask + 'static) -> Self {
        self.before_tasks.push(Box::new(task));
        self
    }

    /// Adds a task run after the pipeline.
    pub fn with_after_task(mut self, task: impl CompileTask + 'static) -> Self {
        self.after_tasks.push(Box::new(task));
        self
    }

    /// Replaces the sink notified about changed files.
    pub fn with_refresh_sink(mut self, sink: impl RefreshSink + 'static) -> Self {
        self.refresh = Box::new(sink);
        self
    }

    /// Replaces the overlap confirmation. The default accepts.
    pub fn with_overlap_confirmation(
        mut self,
        confirm: impl Fn(&[PathBuf]) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.overlap_confirmation = Box::new(confirm);
        self
    }

    /// The project being compiled.
    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    /// The registered stages.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// The driver's options.
    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// A handle that cancels the current run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn refresh_sink(&self) -> &dyn RefreshSink {
        self.refresh.as_ref()
    }

    pub(crate) fn confirm_overlap(&self, dirs: &[PathBuf]) -> bool {
        (self.overlap_confirmation)(dirs)
    }

    /// Runs `f` while holding the output write lock.
    pub(crate) fn write_section<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }

    /// Wipes every output and cache and compiles the whole project.
    pub fn rebuild(
        &self,
        notify: impl FnOnce(CompileNotification),
    ) -> Result<ExitStatus, DriverError> {
        let mode = RunMode {
            is_rebuild: true,
            ..RunMode::default()
        };
        self.run(Box::new(ProjectScope), mode, notify)
    }

    /// Compiles what changed in `scope` since the last run.
    pub fn make(
        &self,
        scope: Box<dyn CompileScope>,
        notify: impl FnOnce(CompileNotification),
    ) -> Result<ExitStatus, DriverError> {
        self.run(scope, RunMode::default(), notify)
    }

    /// Compiles every file in `scope`.
    ///
    /// With `track_dependencies`, files depending on the compiled ones are
    /// compiled as well, even outside the scope's modules.
    pub fn compile(
        &self,
        scope: Box<dyn CompileScope>,
        notify: impl FnOnce(CompileNotification),
        track_dependencies: bool,
    ) -> Result<ExitStatus, DriverError> {
        let scope: Box<dyn CompileScope> = if track_dependencies {
            Box::new(TrackDependenciesScope::new(scope))
        } else {
            scope
        };
        let mode = RunMode {
            force_compile: true,
            track_dependencies,
            ..RunMode::default()
        };
        self.run(scope, mode, notify)
    }

    /// Returns `true` if no stage has work for `scope`.
    ///
    /// Nothing on disk is modified.
    pub fn is_up_to_date(&self, scope: Box<dyn CompileScope>) -> bool {
        let _run = self.run_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cancel.reset();
        let mode = RunMode {
            check_only: true,
            ..RunMode::default()
        };
        let mut ctx = self.create_context(scope, mode);
        if let Some(reason) = check_caches_version(self.project.cache_dir()) {
            debug!(%reason, "caches need a rebuild");
            return false;
        }
        let mut caches = CacheManager::new(self.project.cache_dir());
        match self.run_categories(&mut ctx, &mut caches) {
            Ok(_) => !ctx.has_errors(),
            Err(Interrupt::HasWork) => false,
            Err(Interrupt::Exit(_)) => false,
            Err(Interrupt::Fault(e)) => {
                warn!(error = %e, "up-to-date check failed");
                false
            }
        }
    }

    /// Runs a single task under the run lock.
    pub fn execute_task(&self, task: &dyn CompileTask, scope: Box<dyn CompileScope>) -> bool {
        let _run = self.run_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cancel.reset();
        let ctx = self.create_context(scope, RunMode::default());
        task.execute(&ctx)
    }

    fn create_context(&self, scope: Box<dyn CompileScope>, mode: RunMode) -> CompileContext {
        let project = &self.project;
        let mut ctx = CompileContext::new(
            Arc::clone(project),
            scope,
            mode,
            ProgressIndicator::new(self.cancel.clone()),
        );
        let affected = ctx.scope().affected_modules(project);
        for stage in self.stages.iter().filter_map(|s| s.as_generating()) {
            for module in &affected {
                let production = generation_output_dir(project, stage.id(), module, false);
                let tests = generation_output_dir(project, stage.id(), module, true);
                ctx.assign_root(production.clone(), module, false);
                ctx.assign_root(tests.clone(), module, true);
                ctx.add_scope(Box::new(FileSetScope::new(
                    vec![production, tests],
                    [module.clone()],
                )));
            }
        }
        ctx
    }

    fn run(
        &self,
        scope: Box<dyn CompileScope>,
        mode: RunMode,
        notify: impl FnOnce(CompileNotification),
    ) -> Result<ExitStatus, DriverError> {
        let _run = self.run_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.cancel.reset();

        let mut scope = scope;
        let mut mode = mode;
        let mut reason: Option<String> = None;
        let mut restarts = 0usize;
        loop {
            let mut ctx = self.create_context(scope, mode);
            if let Some(reason) = reason.take() {
                ctx.add_message(CompilerMessage::info(reason));
            }
            let end = match self.run_once(&mut ctx) {
                Ok(end) => end,
                Err(fault) => {
                    warn!(error = %fault, "compilation aborted by a fault");
                    ctx.add_message(CompilerMessage::error(format!("Internal error: {fault}")));
                    notify(self.finish(&ctx, ExitStatus::Errors, true));
                    return Err(fault);
                }
            };
            let next = match end {
                RunEnd::Finished(status) => {
                    let aborted = status == ExitStatus::Cancelled;
                    notify(self.finish(&ctx, status, aborted));
                    return Ok(status);
                }
                RunEnd::Aborted => {
                    notify(self.finish(&ctx, ExitStatus::Errors, true));
                    return Ok(ExitStatus::Errors);
                }
                RunEnd::Rebuild(next) => next,
                RunEnd::Restart(next) => {
                    if restarts >= self.options.max_rebuild_restarts {
                        ctx.add_message(CompilerMessage::error(format!(
                            "Rebuild requested after {restarts} automatic rebuild(s): {next}"
                        )));
                        notify(self.finish(&ctx, ExitStatus::Errors, false));
                        return Ok(ExitStatus::Errors);
                    }
                    restarts += 1;
                    next
                }
            };
            info!(reason = %next, "restarting as a full rebuild");
            reason = Some(next);
            scope = Box::new(ProjectScope);
            mode = RunMode {
                is_rebuild: true,
                ..RunMode::default()
            };
        }
    }

    fn run_once(&self, ctx: &mut CompileContext) -> Result<RunEnd, DriverError> {
        let Some(clear_output) = self.validate_configuration(ctx) else {
            return Ok(RunEnd::Aborted);
        };

        let cache_dir = self.project.cache_dir();
        if !ctx.is_rebuild() {
            if let Some(reason) = check_caches_version(cache_dir) {
                return Ok(RunEnd::Rebuild(reason));
            }
        }
        if let Err(e) = write_status(cache_dir, &CompileStatus::current(true)) {
            ctx.add_message(CompilerMessage::error(format!(
                "Failed to write compilation status: {e}"
            )));
            return Ok(RunEnd::Finished(ExitStatus::Errors));
        }

        let mut caches = CacheManager::new(cache_dir);
        let (status, fault) = match self.run_pipeline(ctx, &mut caches, clear_output) {
            Ok(status) | Err(Interrupt::Exit(status)) => (status, None),
            Err(Interrupt::HasWork) => (ExitStatus::Success, None),
            Err(Interrupt::Fault(e)) => (ExitStatus::Errors, Some(e)),
        };

        let saved = caches.save_all();
        if let Err(e) = &saved {
            ctx.add_message(CompilerMessage::error(format!("Failed to save caches: {e}")));
        }
        let in_progress = fault.is_some() || saved.is_err();
        if let Err(e) = write_status(cache_dir, &CompileStatus::current(in_progress)) {
            ctx.add_message(CompilerMessage::error(format!(
                "Failed to write compilation status: {e}"
            )));
        }
        if let Some(fault) = fault {
            return Err(fault);
        }

        if let Some(reason) = ctx.rebuild_reason() {
            return Ok(RunEnd::Restart(reason));
        }
        let status = match status {
            ExitStatus::Cancelled => ExitStatus::Cancelled,
            _ if ctx.has_errors() => ExitStatus::Errors,
            other => other,
        };
        Ok(RunEnd::Finished(status))
    }

    fn run_pipeline(
        &self,
        ctx: &mut CompileContext,
        caches: &mut CacheManager,
        clear_output: bool,
    ) -> Step<ExitStatus> {
        if ctx.is_rebuild() {
            self.delete_all(ctx, caches, clear_output)?;
        }
        stop_on_errors(ctx)?;

        for task in &self.before_tasks {
            checkpoint(ctx)?;
            if !task.execute(ctx) {
                return Ok(ExitStatus::Cancelled);
            }
        }
        stop_on_errors(ctx)?;

        let did_something = self.run_categories(ctx, caches)?;

        for task in &self.after_tasks {
            if !task.execute(ctx) {
                return Ok(ExitStatus::Cancelled);
            }
        }
        if ctx.is_cancelled() {
            return Ok(ExitStatus::Cancelled);
        }
        if ctx.has_errors() {
            return Ok(ExitStatus::Errors);
        }
        Ok(if did_something {
            ExitStatus::Success
        } else {
            ExitStatus::UpToDate
        })
    }

    pub(crate) fn run_categories(
        &self,
        ctx: &mut CompileContext,
        caches: &mut CacheManager,
    ) -> Step<bool> {
        let force_compile = ctx.is_force_compile();
        let is_rebuild = ctx.is_rebuild();
        let mut did_something = false;
        for category in StageCategory::PIPELINE {
            checkpoint(ctx)?;
            ctx.progress().set_text(format!("Running {category}"));
            did_something |= match category {
                StageCategory::SourceGenerating => self.generate_sources(ctx, caches)?,
                StageCategory::Translating => self.translate(ctx, caches)?,
                StageCategory::SourceInstrumenting | StageCategory::Validating => {
                    self.process_category(ctx, caches, category, force_compile, true)?
                }
                StageCategory::ClassInstrumenting | StageCategory::ClassPostProcessing => {
                    self.process_category(ctx, caches, category, is_rebuild, false)?
                }
                StageCategory::Packaging => {
                    self.process_category(ctx, caches, category, is_rebuild, true)?
                }
            };
            stop_on_errors(ctx)?;
        }
        Ok(did_something)
    }

    /// Removes every output and wipes the caches before a rebuild.
    fn delete_all(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        clear_output: bool,
    ) -> Step<()> {
        ctx.progress().set_text("Clearing output directories");
        let mut output_roots = self.project.output_directories();
        let generated = self.project.generated_dir();
        self.write_section(|| {
            if clear_output {
                for dir in &output_roots {
                    if let Err(e) = fs::clear_dir(dir) {
                        ctx.add_message(CompilerMessage::error(format!(
                            "Failed to clear output directory {}: {e}",
                            dir.display()
                        )));
                    }
                }
            } else {
                let mut recorded = Vec::new();
                for stage in &self.stages {
                    match stage {
                        Stage::Translating(s) => recorded.extend(
                            caches
                                .translating(s.id())
                                .output_entries()
                                .into_iter()
                                .map(|(output, _)| output),
                        ),
                        Stage::SourceGenerating(s) => {
                            recorded.extend(caches.generating(s.id()).urls())
                        }
                        _ => {}
                    }
                }
                for url in &recorded {
                    fs::delete_file(&url.to_path());
                }
                debug!(count = recorded.len(), "deleted recorded outputs");
                let roots: BTreeSet<PathBuf> = output_roots.iter().cloned().collect();
                fs::prune_empty_dirs(&roots);
            }
            if let Err(e) = fs::clear_dir(&generated) {
                warn!(dir = %generated.display(), error = %e, "could not clear generated sources");
            }
        });
        if let Err(e) = caches.clear_caches() {
            ctx.request_rebuild(format!("Compiler caches could not be cleared: {e}"));
            ctx.add_message(CompilerMessage::error(format!(
                "Failed to clear compiler caches: {e}"
            )));
            return Err(Interrupt::Exit(ExitStatus::Errors));
        }
        output_roots.push(generated);
        self.refresh.refresh(&output_roots);
        Ok(())
    }

    fn finish(&self, ctx: &CompileContext, status: ExitStatus, aborted: bool) -> CompileNotification {
        let errors = ctx.message_count(MessageCategory::Error);
        let warnings = ctx.message_count(MessageCategory::Warning);
        if status != ExitStatus::UpToDate && ctx.messages().total() > 0 {
            ctx.add_message(CompilerMessage::info(status_message(status, warnings, errors)));
        }
        info!(%status, errors, warnings, "compilation finished");
        CompileNotification {
            aborted,
            errors,
            warnings,
            status: Some(status),
            messages: ctx.messages().all(),
        }
    }
}

fn stop_on_errors(ctx: &CompileContext) -> Step<()> {
    checkpoint(ctx)?;
    if ctx.has_errors() {
        return Err(Interrupt::Exit(ExitStatus::Errors));
    }
    Ok(())
}

/// Returns the reason the caches cannot be trusted, if any.
fn check_caches_version(cache_dir: &Path) -> Option<String> {
    let Some(status) = read_status(cache_dir) else {
        return Some("Compiler caches are missing or corrupted, rebuilding the project".to_string());
    };
    if status.version != CACHE_FORMAT_VERSION {
        return Some(format!(
            "Compiler caches have format version {} instead of {CACHE_FORMAT_VERSION}, rebuilding the project",
            status.version
        ));
    }
    if status.in_progress {
        return Some("The previous compilation did not finish, rebuilding the project".to_string());
    }
    None
}

impl std::fmt::Debug for CompileDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileDriver")
            .field("root", &self.project.root())
            .field("stages", &self.stages)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_status_requests_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let reason = check_caches_version(dir.path()).unwrap();
        assert!(reason.contains("missing or corrupted"));
    }

    #[test]
    fn status_checks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_status(dir.path(), &CompileStatus::current(false)).unwrap();
        assert!(check_caches_version(dir.path()).is_none());

        write_status(dir.path(), &CompileStatus::current(true)).unwrap();
        assert!(check_caches_version(dir.path()).unwrap().contains("did not finish"));

        let old = CompileStatus {
            version: CACHE_FORMAT_VERSION + 1,
            in_progress: true,
        };
        write_status(dir.path(), &old).unwrap();
        assert!(check_caches_version(dir.path()).unwrap().contains("format version"));
    }

    #[test]
    fn closures_are_tasks() {
        let task = |ctx: &CompileContext| !ctx.has_errors();
        let project = Arc::new(Project::new("/p", "/p/.kiln"));
        let ctx = CompileContext::new(
            project,
            Box::new(ProjectScope),
            RunMode::default(),
            ProgressIndicator::default(),
        );
        assert!(task.execute(&ctx));
    }

    #[test]
    fn default_options() {
        let options = DriverOptions::default();
        assert!(options.clear_output_directory);
        assert_eq!(options.max_rebuild_restarts, 1);
    }
}
