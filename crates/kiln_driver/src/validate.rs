//! Configuration checks run before any state is touched.

use std::collections::BTreeSet;
use std::path::PathBuf;

use kiln_diagnostics::{CompilerMessage, MessageCategory};

use crate::context::CompileContext;
use crate::driver::CompileDriver;

impl CompileDriver {
    /// Checks the project configuration for the run's scope.
    ///
    /// Returns `None` if the run must not start. Otherwise returns whether
    /// output directories are cleared wholesale on a rebuild.
    pub(crate) fn validate_configuration(&self, ctx: &CompileContext) -> Option<bool> {
        let project = ctx.project();
        let affected = ctx.scope().affected_modules(project);
        let modules: Vec<_> = affected.iter().filter_map(|name| project.module(name)).collect();

        for module in &modules {
            let has_sources = module.has_sources(false) || module.has_sources(true);
            if has_sources && module.toolchain.is_none() {
                ctx.add_message(CompilerMessage::error(format!(
                    "Cannot compile module '{}': no toolchain is configured",
                    module.name
                )));
            }
            if module.has_sources(false) && module.output.is_none() {
                ctx.add_message(CompilerMessage::error(format!(
                    "Output path is not specified for module '{}'",
                    module.name
                )));
            }
            if module.has_sources(true) && module.test_output.is_none() {
                ctx.add_message(CompilerMessage::error(format!(
                    "Test output path is not specified for module '{}'",
                    module.name
                )));
            }
        }
        if ctx.has_errors() {
            return None;
        }

        if !ctx.mode().check_only {
            for dir in modules.iter().flat_map(|m| m.output_dirs()) {
                if dir.exists() {
                    continue;
                }
                if let Err(e) = std::fs::create_dir_all(dir) {
                    ctx.add_message(CompilerMessage::error(format!(
                        "Failed to create output directory {}: {e}",
                        dir.display()
                    )));
                }
            }
            if ctx.has_errors() {
                return None;
            }
        }

        let mut clear_output = self.options().clear_output_directory;
        if ctx.is_rebuild() && clear_output {
            let overlapping = self.overlapping_outputs(ctx);
            if !overlapping.is_empty() {
                for dir in &overlapping {
                    ctx.add_message(CompilerMessage::warning(format!(
                        "Output path {} intersects with a source root. Only files that were created by build will be cleaned.",
                        dir.display()
                    )));
                }
                if !self.confirm_overlap(&overlapping) {
                    tracing::info!(count = overlapping.len(), "overlapping output roots not confirmed");
                    return None;
                }
                clear_output = false;
            }
        }

        for chunk in project.chunks_of(affected.iter().map(String::as_str)) {
            if !chunk.is_cyclic() {
                continue;
            }
            let toolchains: BTreeSet<Option<&str>> = chunk
                .modules
                .iter()
                .filter_map(|name| project.module(name))
                .map(|m| m.toolchain.as_deref())
                .collect();
            if toolchains.len() > 1 {
                ctx.add_message(CompilerMessage::error(format!(
                    "Modules {} must use the same toolchain because they form a dependency cycle",
                    chunk.modules.join(", ")
                )));
            }
        }
        if ctx.has_errors() {
            return None;
        }

        for stage in self.stages() {
            let errors_before = ctx.message_count(MessageCategory::Error);
            if !stage.validate_configuration(ctx) {
                tracing::debug!(stage = %stage.id(), "stage rejected the configuration");
                if ctx.message_count(MessageCategory::Error) == errors_before {
                    ctx.add_message(CompilerMessage::error(format!(
                        "Stage '{}' rejected the project configuration",
                        stage.id()
                    )));
                }
                return None;
            }
        }
        (!ctx.has_errors()).then_some(clear_output)
    }

    /// Output roots that are, contain, or lie inside a source root.
    fn overlapping_outputs(&self, ctx: &CompileContext) -> Vec<PathBuf> {
        let project = ctx.project();
        let source_roots: Vec<&PathBuf> = project
            .modules()
            .flat_map(|m| m.source_roots.iter().map(|r| &r.path))
            .collect();
        project
            .output_directories()
            .into_iter()
            .filter(|out| {
                source_roots
                    .iter()
                    .any(|src| out.starts_with(src) || src.starts_with(out))
            })
            .collect()
    }
}
