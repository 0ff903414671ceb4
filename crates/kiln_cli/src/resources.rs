//! A translating stage that copies resource files into output directories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_common::FileUrl;
use kiln_diagnostics::CompilerMessage;
use kiln_driver::{CompileContext, OutputItem, StageError, TranslateOutcome, TranslatingStage};

/// Copies files with configured extensions, keeping their path relative to
/// the source root.
#[derive(Debug, Clone)]
pub struct ResourceStage {
    extensions: BTreeSet<String>,
}

impl ResourceStage {
    /// Creates a stage copying files with any of `extensions` (without the dot).
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    fn copy(&self, ctx: &CompileContext, file: &Path) -> Option<OutputItem> {
        let (Some(root), Some(relative)) = (ctx.output_dir_for(file), ctx.relative_source_path(file))
        else {
            ctx.add_message(
                CompilerMessage::error("No output directory for resource file")
                    .with_file(FileUrl::from_path(file)),
            );
            return None;
        };
        let target = root.join(&relative);
        let copied = target
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|()| std::fs::copy(file, &target));
        if let Err(e) = copied {
            ctx.add_message(
                CompilerMessage::error(format!("Failed to copy resource to {}: {e}", target.display()))
                    .with_file(FileUrl::from_path(file)),
            );
            return None;
        }
        Some(OutputItem::new(file, target, symbol_for(&relative)))
    }
}

impl TranslatingStage for ResourceStage {
    fn id(&self) -> &str {
        "resources"
    }

    fn is_compilable_file(&self, path: &Path, _ctx: &CompileContext) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_ascii_lowercase()))
    }

    fn compile(&self, ctx: &CompileContext, files: &[PathBuf]) -> Result<TranslateOutcome, StageError> {
        let mut outcome = TranslateOutcome::default();
        for file in files {
            if ctx.is_cancelled() {
                break;
            }
            if let Some(item) = self.copy(ctx, file) {
                outcome.successfully_compiled.push(item);
            }
        }
        tracing::debug!(copied = outcome.successfully_compiled.len(), "copied resources");
        Ok(outcome)
    }
}

/// The relative path with `/` separators.
fn symbol_for(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
