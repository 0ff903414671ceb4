//! Resolution of a parsed configuration into a project model.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use kiln_project::{Module, Project};
use std::path::{Path, PathBuf};

impl ProjectConfig {
    /// Builds the project model, resolving relative paths against `root`.
    pub fn to_project(&self, root: &Path) -> Result<Project, ConfigError> {
        let mut project = Project::new(root, resolve_path(root, &self.project.cache_dir));
        for path in &self.build.exclude {
            project.exclude(resolve_path(root, path));
        }
        for (name, cfg) in &self.modules {
            let mut module = Module::new(name.clone());
            for src in &cfg.sources {
                module = module.with_sources(resolve_path(root, src));
            }
            for test in &cfg.tests {
                module = module.with_tests(resolve_path(root, test));
            }
            if let Some(out) = &cfg.output {
                module = module.with_output(resolve_path(root, out));
            }
            if let Some(out) = &cfg.test_output {
                module = module.with_test_output(resolve_path(root, out));
            }
            if let Some(toolchain) = &cfg.toolchain {
                module = module.with_toolchain(toolchain.clone());
            }
            for dep in &cfg.dependencies {
                module = module.depends_on(dep.clone());
            }
            project
                .add_module(module)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }
        project
            .check_dependencies()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        Ok(project)
    }
}

fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

#[cfg(test)]
mod tests {
    use crate::load_config_from_str;
    use std::path::{Path, PathBuf};

    const TOML: &str = r#"
[project]
name = "demo"

[build]
exclude = ["core/src/legacy"]

[modules.util]
sources = ["util/src"]
output = "/abs/out/util"
toolchain = "copy"

[modules.core]
sources = ["core/src"]
tests = ["core/tests"]
output = "out/core"
test_output = "out/core-test"
toolchain = "copy"
dependencies = ["util"]
"#;

    #[test]
    fn resolves_relative_paths_against_root() {
        let config = load_config_from_str(TOML).unwrap();
        let project = config.to_project(Path::new("/work")).unwrap();
        assert_eq!(project.cache_dir(), Path::new("/work/.kiln"));

        let core = project.module("core").unwrap();
        assert_eq!(core.output.as_deref(), Some(Path::new("/work/out/core")));
        assert_eq!(core.source_roots.len(), 2);
        assert!(core.source_roots.iter().any(|r| r.is_test));
        assert_eq!(core.toolchain.as_deref(), Some("copy"));

        let util = project.module("util").unwrap();
        assert_eq!(util.output.as_deref(), Some(Path::new("/abs/out/util")));
    }

    #[test]
    fn exclusions_and_ordering_survive_resolution() {
        let config = load_config_from_str(TOML).unwrap();
        let project = config.to_project(Path::new("/work")).unwrap();
        assert!(project.is_excluded(Path::new("/work/core/src/legacy/Old.txt")));
        assert_eq!(project.sorted_modules(["core", "util"]), vec!["util", "core"]);
        assert_eq!(
            project.output_directories(),
            vec![
                PathBuf::from("/abs/out/util"),
                PathBuf::from("/work/out/core"),
                PathBuf::from("/work/out/core-test"),
            ]
        );
    }
}
