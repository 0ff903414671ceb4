//! The incremental compilation driver.
//!
//! A [`CompileDriver`] takes a [`Project`](kiln_project::Project) and a list of
//! [`Stage`]s and decides, for every run, which files must be (re)compiled.
//! It keeps a persisted record of what was produced from what in the
//! `kiln_cache` crate, deletes outputs whose sources changed or disappeared,
//! propagates changes to dependent files, and restarts itself as a full
//! rebuild when that record cannot be trusted.
//!
//! Runs are synchronous. [`BackgroundCompiler`] moves them onto a worker
//! thread and reports each completion over a channel.

#![warn(missing_docs)]

mod fs;
mod generate;
mod process;
mod translate;
mod validate;

pub mod context;
pub mod driver;
pub mod error;
pub mod progress;
pub mod refresh;
pub mod scope;
pub mod stage;
pub mod status;
pub mod worker;

pub use context::{CompileContext, RunMode};
pub use driver::{CompileDriver, CompileNotification, CompileTask, DriverOptions, OverlapConfirmation};
pub use error::{DriverError, StageError};
pub use progress::{CancelToken, ProgressIndicator};
pub use refresh::{LogRefreshSink, RefreshSink};
pub use scope::{
    CompileScope, CompositeScope, FileFilter, FileSetScope, ModuleScope, ProjectScope,
    TrackDependenciesScope,
};
pub use stage::{
    FileProcessingStage, GeneratingStage, GenerationItem, OutputItem, ProcessingItem,
    SourceDependencies, Stage, StageCategory, TranslateOutcome, TranslatingStage,
};
pub use status::{status_message, ExitStatus};
pub use worker::{BackgroundCompiler, CompileRequest, CompileResult};
