//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;

/// The top-level project configuration parsed from `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    /// Core project metadata.
    pub project: ProjectMeta,
    /// Build settings shared by every module.
    #[serde(default)]
    pub build: BuildConfig,
    /// Module definitions keyed by module name.
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleConfig>,
}

/// Core project metadata required in every `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// Directory for caches and status files, relative to the project root.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

fn default_cache_dir() -> String {
    ".kiln".to_string()
}

/// Build settings.
#[derive(Debug, Deserialize)]
pub struct BuildConfig {
    /// Whether a rebuild clears output directories completely.
    ///
    /// When disabled, a rebuild deletes only the outputs recorded in the caches.
    #[serde(default = "default_true")]
    pub clear_output_directory: bool,
    /// Paths excluded from compilation, relative to the project root.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// File extensions the resource stage copies into output directories.
    #[serde(default = "default_resource_extensions")]
    pub resource_extensions: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            clear_output_directory: true,
            exclude: Vec::new(),
            resource_extensions: default_resource_extensions(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_resource_extensions() -> Vec<String> {
    ["txt", "properties", "xml", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A single module definition.
///
/// All paths are relative to the project root unless absolute.
#[derive(Debug, Default, Deserialize)]
pub struct ModuleConfig {
    /// Production source roots.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Test source roots.
    #[serde(default)]
    pub tests: Vec<String>,
    /// Output root for production sources.
    #[serde(default)]
    pub output: Option<String>,
    /// Output root for test sources.
    #[serde(default)]
    pub test_output: Option<String>,
    /// Toolchain the module compiles with.
    #[serde(default)]
    pub toolchain: Option<String>,
    /// Names of modules this module depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}
