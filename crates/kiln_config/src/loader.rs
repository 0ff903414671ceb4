//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::path::Path;

/// Name of the configuration file inside a project directory.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a project directory.
///
/// Reads `<project_dir>/kiln.toml`, parses it, and validates required fields.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates required fields and references between modules.
fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }
    if config.project.cache_dir.is_empty() {
        return Err(ConfigError::ValidationError(
            "project.cache_dir must not be empty".to_string(),
        ));
    }
    for (name, module) in &config.modules {
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "module names must not be empty".to_string(),
            ));
        }
        for dep in &module.dependencies {
            if !config.modules.contains_key(dep) {
                return Err(ConfigError::UnknownDependency {
                    module: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    for ext in &config.build.resource_extensions {
        if ext.is_empty() || ext.starts_with('.') {
            return Err(ConfigError::ValidationError(format!(
                "resource extension '{ext}' must be given without a leading dot"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[project]
name = "demo"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.project.name, "demo");
        assert_eq!(config.project.cache_dir, ".kiln");
        assert!(config.build.clear_output_directory);
        assert!(config.modules.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[project]
name = "demo"
cache_dir = "build/.state"

[build]
clear_output_directory = false
exclude = ["core/src/legacy"]
resource_extensions = ["txt", "cfg"]

[modules.util]
sources = ["util/src"]
output = "out/util"
toolchain = "copy"

[modules.core]
sources = ["core/src"]
tests = ["core/tests"]
output = "out/core"
test_output = "out/core-test"
toolchain = "copy"
dependencies = ["util"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.project.cache_dir, "build/.state");
        assert!(!config.build.clear_output_directory);
        assert_eq!(config.build.exclude, vec!["core/src/legacy"]);
        assert_eq!(config.build.resource_extensions, vec!["txt", "cfg"]);
        let core = &config.modules["core"];
        assert_eq!(core.tests, vec!["core/tests"]);
        assert_eq!(core.test_output.as_deref(), Some("out/core-test"));
        assert_eq!(core.dependencies, vec!["util"]);
    }

    #[test]
    fn missing_name_errors() {
        let toml = r#"
[project]
name = ""
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn missing_project_table_is_a_parse_error() {
        let err = load_config_from_str("[build]\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn unknown_dependency_errors() {
        let toml = r#"
[project]
name = "demo"

[modules.app]
dependencies = ["ghost"]
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnknownDependency { ref dependency, .. } if dependency == "ghost"
        ));
    }

    #[test]
    fn dotted_resource_extension_errors() {
        let toml = r#"
[project]
name = "demo"

[build]
resource_extensions = [".txt"]
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[project]\nname = \"disk\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.project.name, "disk");
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
