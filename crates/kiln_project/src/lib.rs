//! The project model consumed by the build driver.
//!
//! A [`Project`] is a set of named [`Module`]s, each with source roots, output
//! roots, a toolchain and dependencies on other modules. The driver only
//! queries this model: which module owns a file, where its output goes, and
//! in which order modules (or cyclic groups of modules, [`Chunk`]s) must be
//! compiled.

#![warn(missing_docs)]

pub mod chunk;
pub mod error;
pub mod module;
pub mod project;

pub use chunk::Chunk;
pub use error::ProjectError;
pub use module::{Module, SourceRoot};
pub use project::Project;
