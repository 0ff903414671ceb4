//! Error types for building a project model.

/// Errors that can occur while assembling a [`Project`](crate::Project).
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// Two modules were registered under the same name.
    #[error("duplicate module '{0}'")]
    DuplicateModule(String),

    /// A module depends on a module that is not part of the project.
    #[error("module '{module}' depends on unknown module '{dependency}'")]
    UnknownDependency {
        /// The module declaring the dependency.
        module: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// A module name is empty.
    #[error("module name must not be empty")]
    EmptyModuleName,
}
