//! Modules and their source roots.

use std::path::{Path, PathBuf};

/// A directory of source files belonging to a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoot {
    /// Absolute path of the root directory.
    pub path: PathBuf,
    /// Whether the root holds test sources (compiled to the test output root).
    pub is_test: bool,
}

/// A named unit of compilation.
///
/// Production sources compile into `output`, test sources into
/// `test_output`. Either may be missing; configuration validation reports a
/// module that has sources of a kind but no output for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Unique module name.
    pub name: String,
    /// Names of the modules this module depends on.
    pub dependencies: Vec<String>,
    /// Source roots, production and test.
    pub source_roots: Vec<SourceRoot>,
    /// Output root for production sources.
    pub output: Option<PathBuf>,
    /// Output root for test sources.
    pub test_output: Option<PathBuf>,
    /// Toolchain the module is compiled with.
    pub toolchain: Option<String>,
}

impl Module {
    /// Creates a module with no roots, no outputs and no dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            source_roots: Vec::new(),
            output: None,
            test_output: None,
            toolchain: None,
        }
    }

    /// Adds a production source root.
    pub fn with_sources(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_roots.push(SourceRoot {
            path: path.into(),
            is_test: false,
        });
        self
    }

    /// Adds a test source root.
    pub fn with_tests(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_roots.push(SourceRoot {
            path: path.into(),
            is_test: true,
        });
        self
    }

    /// Sets the production output root.
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Sets the test output root.
    pub fn with_test_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.test_output = Some(path.into());
        self
    }

    /// Sets the toolchain name.
    pub fn with_toolchain(mut self, toolchain: impl Into<String>) -> Self {
        self.toolchain = Some(toolchain.into());
        self
    }

    /// Adds a dependency on another module.
    pub fn depends_on(mut self, module: impl Into<String>) -> Self {
        self.dependencies.push(module.into());
        self
    }

    /// Returns `true` if the module has at least one root of the given kind.
    pub fn has_sources(&self, is_test: bool) -> bool {
        self.source_roots.iter().any(|r| r.is_test == is_test)
    }

    /// Returns the output root for production or test sources.
    pub fn output_dir(&self, is_test: bool) -> Option<&Path> {
        if is_test {
            self.test_output.as_deref()
        } else {
            self.output.as_deref()
        }
    }

    /// Returns every output root this module has.
    pub fn output_dirs(&self) -> impl Iterator<Item = &Path> {
        self.output.iter().chain(self.test_output.iter()).map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_roots() {
        let m = Module::new("core")
            .with_sources("/p/core/src")
            .with_tests("/p/core/tests")
            .with_output("/p/out/core")
            .with_toolchain("jdk")
            .depends_on("util");
        assert!(m.has_sources(false));
        assert!(m.has_sources(true));
        assert_eq!(m.output_dir(false), Some(Path::new("/p/out/core")));
        assert_eq!(m.output_dir(true), None);
        assert_eq!(m.dependencies, vec!["util"]);
        assert_eq!(m.output_dirs().count(), 1);
    }

    #[test]
    fn module_without_roots_has_no_sources() {
        let m = Module::new("empty");
        assert!(!m.has_sources(false));
        assert!(!m.has_sources(true));
    }
}
