//! The translating category: out-of-date detection, output synchronization
//! and dependency propagation.
//!
//! Chunks are visited in dependency order and every translating stage runs
//! over the files of each chunk. For one stage and chunk the steps are:
//!
//! 1. collect the out-of-date files (timestamp changed, marked, or forced),
//!    plus their dependents when dependencies are tracked;
//! 2. reconcile the cached outputs with the output directories, deleting
//!    outputs of queued or removed sources;
//! 3. compile and record what the stage produced;
//! 4. compile the files affected by deleted outputs in follow-up passes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use kiln_cache::CacheManager;
use kiln_common::{file_timestamp, FileUrl};
use kiln_project::Chunk;

use crate::context::CompileContext;
use crate::driver::{checkpoint, CompileDriver, Interrupt, Step};
use crate::fs;
use crate::stage::{TranslateOutcome, TranslatingStage};

/// Files present in the output roots, listed once per run.
#[derive(Debug, Default)]
pub(crate) struct OutputSnapshot {
    files: BTreeSet<PathBuf>,
}

impl OutputSnapshot {
    pub(crate) fn take(roots: &[PathBuf]) -> Self {
        let mut files = BTreeSet::new();
        for root in roots {
            match fs::walk_files(root) {
                Ok(found) => files.extend(found),
                Err(e) => tracing::warn!(root = %root.display(), error = %e, "could not list output root"),
            }
        }
        Self { files }
    }

    fn contains(&self, path: &Path) -> bool {
        self.files.contains(path)
    }
}

/// An output scheduled for deletion.
struct Deletion {
    output: PathBuf,
    symbol: Option<String>,
    source_present: bool,
}

/// What reconciling the cache with the output directories asks for.
#[derive(Default)]
struct Reconciled {
    deletions: Vec<Deletion>,
    /// Sources whose outputs vanished or moved.
    force_recompile: Vec<PathBuf>,
    /// Sources deleted together with all of their outputs.
    vanished: Vec<FileUrl>,
}

/// Drops every record of sources deleted together with their outputs.
///
/// The symbols they defined become traverse roots so that files referencing
/// them are compiled again. Returns the number of sources dropped.
fn forget_vanished_sources(caches: &mut CacheManager, stage_id: &str, vanished: &[FileUrl]) -> usize {
    for source in vanished {
        let deps = caches.dependencies();
        for id in deps.definitions_of(source) {
            deps.add_traverse_root(id);
        }
        deps.forget_source(source);
        caches.translating(stage_id).remove_source(source);
    }
    if !vanished.is_empty() {
        tracing::debug!(stage = %stage_id, count = vanished.len(), "forgot deleted sources");
    }
    vanished.len()
}

/// Everything one stage does for one chunk.
struct ChunkPass<'a> {
    stage: &'a dyn TranslatingStage,
    stage_id: String,
    /// Compilable files of the chunk.
    chunk_files: BTreeSet<PathBuf>,
    /// Modules of the chunk.
    modules: &'a BTreeSet<String>,
    /// Modules of chunks already visited.
    finished: &'a BTreeSet<String>,
    /// Files queued for chunks not visited yet, by module.
    pending: &'a mut BTreeMap<String, BTreeSet<PathBuf>>,
    /// Sources compiled by this stage so far in the run.
    compiled: &'a mut BTreeSet<FileUrl>,
    outputs: &'a mut OutputSnapshot,
}

impl CompileDriver {
    /// Runs every translating stage over every chunk in dependency order.
    pub(crate) fn translate(&self, ctx: &CompileContext, caches: &mut CacheManager) -> Step<bool> {
        let stages: Vec<&dyn TranslatingStage> =
            self.stages().iter().filter_map(|s| s.as_translating()).collect();
        if stages.is_empty() {
            return Ok(false);
        }
        let project = ctx.project();
        let snapshot = ctx.scope().files(project, None, true);
        let mut files_by_module: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
        for file in snapshot {
            if let Some((module, _)) = ctx.module_for_file(&file) {
                files_by_module.entry(module.name.clone()).or_default().insert(file);
            }
        }

        let mut outputs = OutputSnapshot::take(&project.output_directories());
        let mut compiled: BTreeMap<String, BTreeSet<FileUrl>> = BTreeMap::new();
        let mut finished: BTreeSet<String> = BTreeSet::new();
        let mut did_something = false;
        for chunk in project.chunks() {
            let modules: BTreeSet<String> = chunk.modules.iter().cloned().collect();
            for stage in &stages {
                checkpoint(ctx)?;
                let chunk_files = chunk
                    .modules
                    .iter()
                    .filter_map(|m| files_by_module.get(m))
                    .flatten()
                    .filter(|f| stage.is_compilable_file(f, ctx) && !project.is_excluded(f))
                    .cloned()
                    .collect();
                let pass = ChunkPass {
                    stage: *stage,
                    stage_id: stage.id().to_string(),
                    chunk_files,
                    modules: &modules,
                    finished: &finished,
                    pending: &mut files_by_module,
                    compiled: compiled.entry(stage.id().to_string()).or_default(),
                    outputs: &mut outputs,
                };
                did_something |= self.compile_sources(ctx, caches, &chunk, pass)?;
                if ctx.has_errors() {
                    return Ok(did_something);
                }
            }
            finished.extend(modules);
        }
        Ok(did_something)
    }

    fn compile_sources(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        chunk: &Chunk,
        mut pass: ChunkPass<'_>,
    ) -> Step<bool> {
        ctx.progress()
            .set_text(format!("Compiling {} ({})", chunk.modules.join(", "), pass.stage_id));
        let mut to_compile = self.collect_out_of_date(ctx, caches, &pass);
        if ctx.mode().track_dependencies && !to_compile.is_empty() {
            self.add_dependents(ctx, caches, &mut pass, &mut to_compile)?;
        }

        let Reconciled {
            deletions,
            force_recompile,
            vanished,
        } = if ctx.is_rebuild() {
            Reconciled::default()
        } else {
            self.reconcile_outputs(ctx, caches, &pass, &to_compile)
        };

        if ctx.mode().check_only {
            if !to_compile.is_empty()
                || !deletions.is_empty()
                || !force_recompile.is_empty()
                || !vanished.is_empty()
            {
                return Err(Interrupt::HasWork);
            }
            return Ok(false);
        }

        let deleted = self.sync_output_dir(ctx, caches, &mut pass, deletions)?;
        let forgotten = forget_vanished_sources(caches, &pass.stage_id, &vanished);
        let cache = caches.translating(&pass.stage_id);
        for source in force_recompile {
            if pass.chunk_files.contains(&source) {
                to_compile.insert(source);
            } else {
                cache.mark_for_recompilation(&FileUrl::from_path(&source));
            }
        }

        let mut did_something = deleted > 0 || forgotten > 0 || !to_compile.is_empty();
        if !to_compile.is_empty() && !ctx.has_errors() {
            self.compile_batch(ctx, caches, &mut pass, to_compile)?;
        }
        while !ctx.has_errors() && caches.dependencies().has_traverse_roots() {
            checkpoint(ctx)?;
            let follow_up = self.affected_files(ctx, caches, &pass);
            if follow_up.is_empty() {
                continue;
            }
            tracing::debug!(stage = %pass.stage_id, count = follow_up.len(), "compiling affected files");
            let doomed = self.outputs_of(caches, &pass, &follow_up);
            self.sync_output_dir(ctx, caches, &mut pass, doomed)?;
            self.compile_batch(ctx, caches, &mut pass, follow_up)?;
            did_something = true;
        }
        Ok(did_something)
    }

    fn collect_out_of_date(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        pass: &ChunkPass<'_>,
    ) -> BTreeSet<PathBuf> {
        let force = ctx.is_force_compile();
        let cache = caches.translating(&pass.stage_id);
        pass.chunk_files
            .iter()
            .filter(|file| {
                let url = FileUrl::from_path(file);
                force || cache.timestamp(&url) != file_timestamp(file) || cache.is_marked(&url)
            })
            .cloned()
            .collect()
    }

    /// Queues every compilable dependent of the queued files, transitively.
    ///
    /// Dependents in a later chunk are handed to that chunk; dependents in a
    /// chunk already compiled are marked for the next run.
    fn add_dependents(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        pass: &mut ChunkPass<'_>,
        to_compile: &mut BTreeSet<PathBuf>,
    ) -> Step<()> {
        let project = ctx.project();
        let mut visited: BTreeSet<FileUrl> = to_compile.iter().map(|f| FileUrl::from_path(f)).collect();
        let mut queue: VecDeque<FileUrl> = visited.iter().cloned().collect();
        let mut added = 0usize;
        while let Some(url) = queue.pop_front() {
            checkpoint(ctx)?;
            for dependent in caches.dependencies().dependents_of(&url) {
                if !visited.insert(dependent.clone()) {
                    continue;
                }
                let path = dependent.to_path();
                let eligible = path.exists()
                    && !pass.compiled.contains(&dependent)
                    && ctx.scope().belongs(project, &dependent)
                    && !project.is_excluded(&path)
                    && pass.stage.is_compilable_file(&path, ctx);
                if eligible {
                    match ctx.module_for_file(&path).map(|(m, _)| m.name.clone()) {
                        Some(module) if pass.modules.contains(&module) => {
                            if to_compile.insert(path) {
                                added += 1;
                            }
                        }
                        Some(module) if !pass.finished.contains(&module) => {
                            pass.pending.entry(module).or_default().insert(path);
                        }
                        _ => caches
                            .translating(&pass.stage_id)
                            .mark_for_recompilation(&dependent),
                    }
                }
                queue.push_back(dependent);
            }
        }
        if added > 0 {
            tracing::debug!(stage = %pass.stage_id, count = added, "queued dependent files");
        }
        Ok(())
    }

    /// Decides the fate of every cached output of this stage, and finds the
    /// sources of the chunk that left no trace on disk.
    fn reconcile_outputs(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        pass: &ChunkPass<'_>,
        to_compile: &BTreeSet<PathBuf>,
    ) -> Reconciled {
        let project = ctx.project();
        let scope_roots: Vec<PathBuf> = ctx
            .scope()
            .affected_modules(project)
            .iter()
            .filter_map(|m| project.module(m))
            .flat_map(|m| m.output_dirs().map(Path::to_path_buf))
            .collect();
        let output_roots = project.output_directories();
        let cache = caches.translating(&pass.stage_id);
        let mut deletions = Vec::new();
        let mut force_recompile = Vec::new();
        let mut stale = Vec::new();
        for (output, source) in cache.output_entries() {
            let source_path = source.to_path();
            let source_present = source_path.exists();
            if source_present
                && (!pass.stage.is_compilable_file(&source_path, ctx)
                    || !ctx.scope().belongs(project, &source))
            {
                continue;
            }
            let output_path = output.to_path();
            let symbol = cache.symbol_for(&output).filter(|s| !s.is_empty());
            // Outputs left behind in a former output root are not in the snapshot.
            let on_disk = if output_roots.iter().any(|root| output_path.starts_with(root)) {
                pass.outputs.contains(&output_path)
            } else {
                output_path.is_file()
            };
            match (source_present, on_disk) {
                (false, true) => {
                    if scope_roots.iter().any(|root| output_path.starts_with(root)) {
                        deletions.push(Deletion {
                            output: output_path,
                            symbol,
                            source_present: false,
                        });
                    }
                }
                (false, false) => stale.push(output),
                (true, false) => {
                    stale.push(output);
                    force_recompile.push(source_path);
                }
                (true, true) if to_compile.contains(&source_path) => {
                    deletions.push(Deletion {
                        output: output_path,
                        symbol,
                        source_present: true,
                    });
                }
                (true, true) => {
                    let moved = ctx
                        .output_dir_for(&source_path)
                        .is_some_and(|root| !output_path.starts_with(root));
                    if moved {
                        deletions.push(Deletion {
                            output: output_path,
                            symbol,
                            source_present: true,
                        });
                        force_recompile.push(source_path);
                    }
                }
            }
        }
        if !ctx.mode().check_only {
            for output in &stale {
                cache.remove_output(output);
            }
        }

        let mut vanished = Vec::new();
        for source in cache.source_urls() {
            let path = source.to_path();
            let in_chunk = ctx
                .module_for_file(&path)
                .is_some_and(|(m, _)| pass.modules.contains(&m.name));
            if path.exists() || !in_chunk || !ctx.scope().belongs(project, &source) {
                continue;
            }
            // Outputs still on disk are deleted by the sync, which drops the source.
            let on_disk = cache
                .outputs_for(&source)
                .iter()
                .any(|o| pass.outputs.contains(&o.to_path()));
            if !on_disk {
                vanished.push(source);
            }
        }

        Reconciled {
            deletions,
            force_recompile,
            vanished,
        }
    }

    /// Deletes outputs, updates the caches and notifies the refresh sink once.
    /// Returns the number of deleted files.
    fn sync_output_dir(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        pass: &mut ChunkPass<'_>,
        deletions: Vec<Deletion>,
    ) -> Step<usize> {
        if deletions.is_empty() {
            return Ok(0);
        }
        ctx.progress().set_text("Synchronizing output directories");
        let mut deleted: Vec<PathBuf> = Vec::new();
        let mut removed_sources: BTreeSet<FileUrl> = BTreeSet::new();
        let result = self.write_section(|| -> Step<()> {
            for deletion in deletions {
                checkpoint(ctx)?;
                if !fs::delete_file(&deletion.output) {
                    continue;
                }
                let url = FileUrl::from_path(&deletion.output);
                pass.outputs.files.remove(&deletion.output);
                let source = caches.translating(&pass.stage_id).remove_output(&url);
                if let Some(symbol) = &deletion.symbol {
                    let deps = caches.dependencies();
                    let id = deps.symbol_id(symbol);
                    deps.add_traverse_root(id);
                    if !deletion.source_present {
                        deps.mark_source_removed(id);
                    }
                }
                if let (Some(source), false) = (source, deletion.source_present) {
                    removed_sources.insert(source);
                }
                deleted.push(deletion.output);
            }
            Ok(())
        });

        // Sources gone for good lose their timestamps and dependency data.
        for source in removed_sources {
            let cache = caches.translating(&pass.stage_id);
            if cache.outputs_for(&source).is_empty() {
                cache.remove_source(&source);
                caches.dependencies().forget_source(&source);
            }
        }
        if !deleted.is_empty() {
            tracing::debug!(stage = %pass.stage_id, count = deleted.len(), "deleted outputs");
            self.refresh_sink().refresh(&deleted);
        }
        result.map(|()| deleted.len())
    }

    /// Cached outputs of `sources` that are present on disk.
    fn outputs_of(
        &self,
        caches: &mut CacheManager,
        pass: &ChunkPass<'_>,
        sources: &BTreeSet<PathBuf>,
    ) -> Vec<Deletion> {
        let cache = caches.translating(&pass.stage_id);
        let mut doomed = Vec::new();
        for source in sources {
            for output in cache.outputs_for(&FileUrl::from_path(source)) {
                let path = output.to_path();
                if pass.outputs.contains(&path) {
                    doomed.push(Deletion {
                        symbol: cache.symbol_for(&output).filter(|s| !s.is_empty()),
                        output: path,
                        source_present: true,
                    });
                }
            }
        }
        doomed
    }

    /// Files referencing changed symbols that this pass may still compile.
    ///
    /// Affected files outside the chunk, or outside the scope, are marked so a
    /// later chunk or a later run picks them up.
    fn affected_files(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        pass: &ChunkPass<'_>,
    ) -> BTreeSet<PathBuf> {
        let affected = caches.dependencies().take_affected_files();
        let cache = caches.translating(&pass.stage_id);
        let mut follow_up = BTreeSet::new();
        for url in affected {
            if pass.compiled.contains(&url) {
                continue;
            }
            let path = url.to_path();
            if !path.exists() || !pass.stage.is_compilable_file(&path, ctx) {
                continue;
            }
            if pass.chunk_files.contains(&path) {
                follow_up.insert(path);
            } else {
                cache.mark_for_recompilation(&url);
            }
        }
        follow_up
    }

    fn compile_batch(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        pass: &mut ChunkPass<'_>,
        files: BTreeSet<PathBuf>,
    ) -> Step<()> {
        checkpoint(ctx)?;
        let files: Vec<PathBuf> = files.into_iter().collect();
        tracing::debug!(stage = %pass.stage_id, count = files.len(), "compiling");
        let outcome = self
            .write_section(|| pass.stage.compile(ctx, &files))
            .map_err(|e| Interrupt::fault(&pass.stage_id, e))?;
        for file in &files {
            pass.compiled.insert(FileUrl::from_path(file));
        }
        self.record_outcome(ctx, caches, pass, outcome);
        Ok(())
    }

    fn record_outcome(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        pass: &mut ChunkPass<'_>,
        outcome: TranslateOutcome,
    ) {
        let mut by_source: BTreeMap<PathBuf, Vec<(PathBuf, String)>> = BTreeMap::new();
        for item in outcome.successfully_compiled {
            let outputs = by_source.entry(item.source).or_default();
            if let Some(output) = item.output {
                outputs.push((output, item.symbol.unwrap_or_default()));
            }
        }

        let cache = caches.translating(&pass.stage_id);
        let mut produced: Vec<PathBuf> = Vec::new();
        for (source, outputs) in by_source {
            let url = FileUrl::from_path(&source);
            let mut missing_output = false;
            let mut recorded = Vec::with_capacity(outputs.len());
            for (output, symbol) in outputs {
                if output.is_file() {
                    pass.outputs.files.insert(output.clone());
                    recorded.push((FileUrl::from_path(&output), symbol));
                    produced.push(output);
                } else {
                    tracing::warn!(output = %output.display(), "reported output was not written");
                    missing_output = true;
                }
            }
            let timestamp = file_timestamp(&source).unwrap_or(-1);
            cache.record(&url, timestamp, recorded);
            let modified_during_run = timestamp > ctx.start_stamp() && !ctx.is_generated(&source);
            if modified_during_run || missing_output {
                cache.mark_for_recompilation(&url);
            }
        }
        for file in &outcome.files_to_recompile {
            cache.mark_for_recompilation(&FileUrl::from_path(file));
        }

        let deps = caches.dependencies();
        for info in &outcome.dependencies {
            let url = FileUrl::from_path(&info.source);
            deps.record_definitions(&url, info.defines.as_slice());
            deps.record_references(&url, info.references.as_slice());
        }
        if !produced.is_empty() {
            self.refresh_sink().refresh(&produced);
        }
    }
}
