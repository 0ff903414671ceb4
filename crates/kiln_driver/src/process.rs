//! The four file-processing categories.

use std::collections::BTreeSet;
use std::path::PathBuf;

use kiln_cache::{CacheManager, ValidityState};
use kiln_common::{file_timestamp, FileUrl};

use crate::context::CompileContext;
use crate::driver::{checkpoint, CompileDriver, Interrupt, Step};
use crate::stage::{FileProcessingStage, ProcessingItem, StageCategory};

/// Cache updates held back until the category finishes.
#[derive(Debug, Default)]
struct DeferredUpdates {
    items: Vec<(String, ProcessingItem)>,
}

impl DeferredUpdates {
    fn apply(self, caches: &mut CacheManager, kind: &str) {
        for (stage_id, item) in self.items {
            let timestamp = file_timestamp(&item.file).unwrap_or(-1);
            caches
                .processing(kind, &stage_id)
                .update(&FileUrl::from_path(&item.file), timestamp, item.validity);
        }
    }
}

impl CompileDriver {
    /// Runs the stages of one processing category.
    ///
    /// Cache updates for processed items are applied when the category ends,
    /// whether or not a later stage failed.
    pub(crate) fn process_category(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        category: StageCategory,
        force: bool,
        check_scope: bool,
    ) -> Step<bool> {
        let stages: Vec<&dyn FileProcessingStage> = self
            .stages()
            .iter()
            .filter(|s| s.category() == category)
            .filter_map(|s| s.as_processing())
            .collect();
        if stages.is_empty() {
            return Ok(false);
        }
        let mut deferred = DeferredUpdates::default();
        let mut run = || -> Step<bool> {
            let mut did_something = false;
            for stage in &stages {
                checkpoint(ctx)?;
                ctx.progress().set_text(format!("Running {category} ({})", stage.id()));
                did_something |=
                    self.process_files(ctx, caches, category, *stage, force, check_scope, &mut deferred)?;
                if ctx.has_errors() {
                    break;
                }
            }
            Ok(did_something)
        };
        let result = run();
        deferred.apply(caches, category.cache_kind());
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn process_files(
        &self,
        ctx: &CompileContext,
        caches: &mut CacheManager,
        category: StageCategory,
        stage: &dyn FileProcessingStage,
        force: bool,
        check_scope: bool,
        deferred: &mut DeferredUpdates,
    ) -> Step<bool> {
        let stage_id = stage.id().to_string();
        let items = stage
            .processing_items(ctx)
            .map_err(|e| Interrupt::fault(&stage_id, e))?;

        let cache = caches.processing(category.cache_kind(), &stage_id);
        let mut current: BTreeSet<FileUrl> = BTreeSet::new();
        let mut to_process: Vec<ProcessingItem> = Vec::new();
        for item in items {
            let url = FileUrl::from_path(&item.file);
            current.insert(url.clone());
            let timestamp = file_timestamp(&item.file).unwrap_or(-1);
            if force || !cache.is_up_to_date(&url, timestamp, item.validity.as_ref()) {
                to_process.push(item);
            }
        }
        let outdated: Vec<FileUrl> = cache
            .urls()
            .into_iter()
            .filter(|url| !current.contains(url))
            .filter(|url| !check_scope || ctx.scope().belongs(ctx.project(), url))
            .collect();

        if ctx.mode().check_only {
            if !to_process.is_empty() || !outdated.is_empty() {
                return Err(Interrupt::HasWork);
            }
            return Ok(false);
        }

        for url in &outdated {
            checkpoint(ctx)?;
            let state: Option<ValidityState> = cache.get(url).and_then(|r| r.validity);
            stage
                .process_outdated_item(ctx, url, state.as_ref())
                .map_err(|e| Interrupt::fault(&stage_id, e))?;
            cache.remove(url);
        }
        if to_process.is_empty() {
            return Ok(false);
        }

        tracing::debug!(stage = %stage_id, count = to_process.len(), "processing files");
        let processed = self
            .write_section(|| stage.process(ctx, &to_process))
            .map_err(|e| Interrupt::fault(&stage_id, e))?;
        let touched: Vec<PathBuf> = processed.iter().map(|i| i.file.clone()).collect();
        if !touched.is_empty() {
            self.refresh_sink().refresh(&touched);
        }
        deferred
            .items
            .extend(processed.into_iter().map(|item| (stage_id.clone(), item)));
        Ok(true)
    }
}
