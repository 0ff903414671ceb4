//! The source-generating category.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use kiln_cache::CacheManager;
use kiln_common::FileUrl;
use kiln_diagnostics::CompilerMessage;

use crate::context::CompileContext;
use crate::driver::{checkpoint, CompileDriver, Interrupt, Step};
use crate::fs;
use crate::scope::FileSetScope;
use crate::stage::{GeneratingStage, GenerationItem};

impl CompileDriver {
    /// Runs every generating stage. Returns `true` if any file was written or
    /// removed.
    pub(crate) fn generate_sources(
        &self,
        ctx: &mut CompileContext,
        caches: &mut CacheManager,
    ) -> Step<bool> {
        let mut did_something = false;
        for stage in self.stages().iter().filter_map(|s| s.as_generating()) {
            checkpoint(ctx)?;
            ctx.progress().set_text(format!("Generating sources ({})", stage.id()));
            did_something |= self.generate_output(ctx, caches, stage)?;
            if ctx.has_errors() {
                break;
            }
        }
        Ok(did_something)
    }

    fn generate_output(
        &self,
        ctx: &mut CompileContext,
        caches: &mut CacheManager,
        stage: &dyn GeneratingStage,
    ) -> Step<bool> {
        let stage_id = stage.id().to_string();
        let force = ctx.is_force_compile();
        let items = stage
            .generation_items(ctx)
            .map_err(|e| Interrupt::fault(&stage_id, e))?;

        let cache = caches.generating(&stage_id);
        let mut paths_to_remove: BTreeSet<FileUrl> = cache.urls().into_iter().collect();
        let mut to_generate: Vec<GenerationItem> = Vec::new();
        for item in items {
            let output = ctx
                .generation_output_dir(&stage_id, &item.module, item.is_test)
                .join(&item.path);
            let url = FileUrl::from_path(&output);
            paths_to_remove.remove(&url);
            let up_to_date = !force && cache.get(&url).as_ref() == Some(&item.validity);
            if !up_to_date && ctx.scope().belongs(ctx.project(), &url) {
                to_generate.push(item);
            }
        }

        if ctx.mode().check_only {
            if !to_generate.is_empty() || !paths_to_remove.is_empty() {
                return Err(Interrupt::HasWork);
            }
            return Ok(false);
        }

        let mut refreshed: Vec<PathBuf> = Vec::new();
        self.write_section(|| {
            for url in &paths_to_remove {
                let path = url.to_path();
                if fs::delete_file(&path) {
                    cache.remove(url);
                    refreshed.push(path);
                }
            }
        });
        if !paths_to_remove.is_empty() {
            tracing::debug!(stage = %stage_id, count = paths_to_remove.len(), "removed stale generated files");
        }

        let mut by_module: BTreeMap<String, Vec<GenerationItem>> = BTreeMap::new();
        for item in &to_generate {
            by_module.entry(item.module.clone()).or_default().push(item.clone());
        }
        let order = ctx
            .project()
            .sorted_modules(by_module.keys().map(String::as_str));

        let mut generated: Vec<PathBuf> = Vec::new();
        let mut modules: BTreeSet<String> = BTreeSet::new();
        for module in order {
            checkpoint(ctx)?;
            let Some(items) = by_module.remove(&module) else {
                continue;
            };
            let (tests, production): (Vec<_>, Vec<_>) = items.into_iter().partition(|i| i.is_test);
            for (is_test, batch) in [(false, production), (true, tests)] {
                if batch.is_empty() {
                    continue;
                }
                let output_dir = ctx.generation_output_dir(&stage_id, &module, is_test);
                if let Err(e) = std::fs::create_dir_all(&output_dir) {
                    ctx.add_message(CompilerMessage::error(format!(
                        "Failed to create output directory {}: {e}",
                        output_dir.display()
                    )));
                    return Ok(true);
                }
                let done = self
                    .write_section(|| stage.generate(ctx, &batch, &output_dir))
                    .map_err(|e| Interrupt::fault(&stage_id, e))?;
                let cache = caches.generating(&stage_id);
                for item in done {
                    let path = output_dir.join(&item.path);
                    cache.update(&FileUrl::from_path(&path), Some(item.validity));
                    generated.push(path);
                }
                modules.insert(module.clone());
            }
        }

        tracing::debug!(stage = %stage_id, count = generated.len(), "generated sources");
        refreshed.extend(generated.iter().cloned());
        if !refreshed.is_empty() {
            self.refresh_sink().refresh(&refreshed);
        }
        if !generated.is_empty() {
            ctx.mark_generated(generated.iter().cloned());
            if force {
                ctx.add_scope(Box::new(FileSetScope::new(generated, modules)));
            }
        }
        Ok(!to_generate.is_empty() || !paths_to_remove.is_empty())
    }
}
