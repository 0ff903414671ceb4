//! Compiler stage capabilities and the items they exchange with the driver.
//!
//! Stages are pluggable collaborators. The driver decides which items are out
//! of date, hands them to the stage, and records what the stage reports back.
//! A stage never touches the driver's caches itself.

use std::fmt;
use std::path::{Path, PathBuf};

use kiln_cache::ValidityState;
use kiln_common::FileUrl;

use crate::context::CompileContext;
use crate::error::StageError;

/// The pipeline categories, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StageCategory {
    /// Produces sources into the generated-source directory.
    SourceGenerating,
    /// Rewrites sources before translation.
    SourceInstrumenting,
    /// Turns sources into outputs.
    Translating,
    /// Rewrites translated outputs.
    ClassInstrumenting,
    /// Runs after instrumentation, before packaging.
    ClassPostProcessing,
    /// Bundles outputs.
    Packaging,
    /// Checks the finished outputs.
    Validating,
}

impl StageCategory {
    /// Every category in pipeline order.
    pub const PIPELINE: [StageCategory; 7] = [
        StageCategory::SourceGenerating,
        StageCategory::SourceInstrumenting,
        StageCategory::Translating,
        StageCategory::ClassInstrumenting,
        StageCategory::ClassPostProcessing,
        StageCategory::Packaging,
        StageCategory::Validating,
    ];

    /// Prefix of the cache files kept for stages of this category.
    pub fn cache_kind(self) -> &'static str {
        match self {
            StageCategory::SourceGenerating => "generating",
            StageCategory::SourceInstrumenting => "source_instrumenting",
            StageCategory::Translating => "translating",
            StageCategory::ClassInstrumenting => "class_instrumenting",
            StageCategory::ClassPostProcessing => "class_post_processing",
            StageCategory::Packaging => "packaging",
            StageCategory::Validating => "validating",
        }
    }
}

impl fmt::Display for StageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageCategory::SourceGenerating => "source generation",
            StageCategory::SourceInstrumenting => "source instrumentation",
            StageCategory::Translating => "translation",
            StageCategory::ClassInstrumenting => "output instrumentation",
            StageCategory::ClassPostProcessing => "post-processing",
            StageCategory::Packaging => "packaging",
            StageCategory::Validating => "validation",
        };
        f.write_str(name)
    }
}

/// A file a generating stage can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationItem {
    /// Module the generated file is attributed to.
    pub module: String,
    /// Path relative to the module's generated-source directory.
    pub path: PathBuf,
    /// Whether the file is a test source.
    pub is_test: bool,
    /// Fingerprint of the inputs; a change triggers regeneration.
    pub validity: ValidityState,
}

impl GenerationItem {
    /// Creates a production item.
    pub fn new(module: impl Into<String>, path: impl Into<PathBuf>, validity: ValidityState) -> Self {
        Self {
            module: module.into(),
            path: path.into(),
            is_test: false,
            validity,
        }
    }

    /// Marks the item as a test source.
    pub fn for_tests(mut self) -> Self {
        self.is_test = true;
        self
    }
}

/// One output produced by a translating stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputItem {
    /// The compiled source.
    pub source: PathBuf,
    /// The file written, or `None` when the source compiled to nothing.
    pub output: Option<PathBuf>,
    /// Symbol defined by the output, used for dependency propagation.
    pub symbol: Option<String>,
}

impl OutputItem {
    /// An output defining `symbol`.
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>, symbol: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            output: Some(output.into()),
            symbol: Some(symbol.into()),
        }
    }

    /// A source that compiled successfully without producing a file.
    pub fn without_output(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: None,
            symbol: None,
        }
    }
}

/// Symbols a source defines and references.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceDependencies {
    /// The source file.
    pub source: PathBuf,
    /// Symbols the source defines.
    pub defines: Vec<String>,
    /// Symbols the source uses.
    pub references: Vec<String>,
}

/// What a translating stage reports after compiling a batch.
#[derive(Debug, Clone, Default)]
pub struct TranslateOutcome {
    /// Outputs of the sources that compiled.
    pub successfully_compiled: Vec<OutputItem>,
    /// Sources the stage wants compiled again on the next run.
    pub files_to_recompile: Vec<PathBuf>,
    /// Dependency information for compiled sources.
    pub dependencies: Vec<SourceDependencies>,
}

/// A file handled by a file-processing stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingItem {
    /// The processed file.
    pub file: PathBuf,
    /// Optional fingerprint compared in addition to the timestamp.
    pub validity: Option<ValidityState>,
}

impl ProcessingItem {
    /// An item judged by timestamp only.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            validity: None,
        }
    }

    /// Attaches a fingerprint.
    pub fn with_validity(mut self, validity: ValidityState) -> Self {
        self.validity = Some(validity);
        self
    }
}

/// A stage that writes sources into the generated-source directory.
pub trait GeneratingStage: Send + Sync {
    /// Stable identifier, used for cache file and directory names.
    fn id(&self) -> &str;

    /// Everything the stage could generate for the current run.
    fn generation_items(&self, ctx: &CompileContext) -> Result<Vec<GenerationItem>, StageError>;

    /// Generates `items` below `output_dir`. Returns the items that succeeded.
    fn generate(
        &self,
        ctx: &CompileContext,
        items: &[GenerationItem],
        output_dir: &Path,
    ) -> Result<Vec<GenerationItem>, StageError>;

    /// Checks the stage's own settings. Problems are reported as messages.
    fn validate_configuration(&self, _ctx: &CompileContext) -> bool {
        true
    }
}

/// A stage that compiles sources into outputs.
pub trait TranslatingStage: Send + Sync {
    /// Stable identifier, used for cache file names.
    fn id(&self) -> &str;

    /// Returns `true` if this stage compiles `path`.
    fn is_compilable_file(&self, path: &Path, ctx: &CompileContext) -> bool;

    /// Compiles `files`. Compilation problems are reported as messages on
    /// `ctx`; an `Err` aborts the whole run.
    fn compile(&self, ctx: &CompileContext, files: &[PathBuf]) -> Result<TranslateOutcome, StageError>;

    /// Checks the stage's own settings. Problems are reported as messages.
    fn validate_configuration(&self, _ctx: &CompileContext) -> bool {
        true
    }
}

/// A stage that rewrites, bundles or checks existing files.
pub trait FileProcessingStage: Send + Sync {
    /// Stable identifier, used for cache file names.
    fn id(&self) -> &str;

    /// Everything the stage handles in the current run.
    fn processing_items(&self, ctx: &CompileContext) -> Result<Vec<ProcessingItem>, StageError>;

    /// Processes `items`. Returns the items that succeeded.
    fn process(
        &self,
        ctx: &CompileContext,
        items: &[ProcessingItem],
    ) -> Result<Vec<ProcessingItem>, StageError>;

    /// Called for a file processed before that is no longer an item.
    fn process_outdated_item(
        &self,
        _ctx: &CompileContext,
        _url: &FileUrl,
        _state: Option<&ValidityState>,
    ) -> Result<(), StageError> {
        Ok(())
    }

    /// Checks the stage's own settings. Problems are reported as messages.
    fn validate_configuration(&self, _ctx: &CompileContext) -> bool {
        true
    }
}

/// A registered stage, tagged with its pipeline category.
pub enum Stage {
    /// See [`StageCategory::SourceGenerating`].
    SourceGenerating(Box<dyn GeneratingStage>),
    /// See [`StageCategory::SourceInstrumenting`].
    SourceInstrumenting(Box<dyn FileProcessingStage>),
    /// See [`StageCategory::Translating`].
    Translating(Box<dyn TranslatingStage>),
    /// See [`StageCategory::ClassInstrumenting`].
    ClassInstrumenting(Box<dyn FileProcessingStage>),
    /// See [`StageCategory::ClassPostProcessing`].
    ClassPostProcessing(Box<dyn FileProcessingStage>),
    /// See [`StageCategory::Packaging`].
    Packaging(Box<dyn FileProcessingStage>),
    /// See [`StageCategory::Validating`].
    Validating(Box<dyn FileProcessingStage>),
}

impl Stage {
    /// The stage's identifier.
    pub fn id(&self) -> &str {
        match self {
            Stage::SourceGenerating(s) => s.id(),
            Stage::Translating(s) => s.id(),
            Stage::SourceInstrumenting(s)
            | Stage::ClassInstrumenting(s)
            | Stage::ClassPostProcessing(s)
            | Stage::Packaging(s)
            | Stage::Validating(s) => s.id(),
        }
    }

    /// The category this stage runs in.
    pub fn category(&self) -> StageCategory {
        match self {
            Stage::SourceGenerating(_) => StageCategory::SourceGenerating,
            Stage::SourceInstrumenting(_) => StageCategory::SourceInstrumenting,
            Stage::Translating(_) => StageCategory::Translating,
            Stage::ClassInstrumenting(_) => StageCategory::ClassInstrumenting,
            Stage::ClassPostProcessing(_) => StageCategory::ClassPostProcessing,
            Stage::Packaging(_) => StageCategory::Packaging,
            Stage::Validating(_) => StageCategory::Validating,
        }
    }

    /// Runs the stage's own configuration check.
    pub fn validate_configuration(&self, ctx: &CompileContext) -> bool {
        match self {
            Stage::SourceGenerating(s) => s.validate_configuration(ctx),
            Stage::Translating(s) => s.validate_configuration(ctx),
            Stage::SourceInstrumenting(s)
            | Stage::ClassInstrumenting(s)
            | Stage::ClassPostProcessing(s)
            | Stage::Packaging(s)
            | Stage::Validating(s) => s.validate_configuration(ctx),
        }
    }

    /// The generating capability, if this is a generating stage.
    pub fn as_generating(&self) -> Option<&dyn GeneratingStage> {
        match self {
            Stage::SourceGenerating(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// The translating capability, if this is a translating stage.
    pub fn as_translating(&self) -> Option<&dyn TranslatingStage> {
        match self {
            Stage::Translating(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    /// The file-processing capability, for the four processing categories.
    pub fn as_processing(&self) -> Option<&dyn FileProcessingStage> {
        match self {
            Stage::SourceInstrumenting(s)
            | Stage::ClassInstrumenting(s)
            | Stage::ClassPostProcessing(s)
            | Stage::Packaging(s)
            | Stage::Validating(s) => Some(s.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("category", &self.category())
            .field("id", &self.id())
            .finish()
    }
}
