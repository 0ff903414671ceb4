//! Locating and loading the project, and turning CLI selections into scopes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_config::{ProjectConfig, CONFIG_FILE_NAME};
use kiln_driver::{CompileScope, CompositeScope, FileSetScope, ModuleScope, ProjectScope};
use kiln_project::Project;

use crate::{GlobalArgs, ScopeArgs};

/// Walks up from `start` looking for the nearest directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE_NAME).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE_NAME} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match &global.config {
        Some(config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_file() {
                Ok(p.parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")))
            } else {
                Ok(p)
            }
        }
        None => find_project_root(&std::env::current_dir()?),
    }
}

/// Loads `kiln.toml` and resolves it into a project model.
pub fn load_project(global: &GlobalArgs) -> Result<(ProjectConfig, Project), Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let root = root.canonicalize().unwrap_or(root);
    let config = kiln_config::load_config(&root)?;
    let project = config.to_project(&root)?;
    Ok((config, project))
}

/// Builds the scope selected by `--module` and `--file`. No selection means
/// the whole project.
pub fn build_scope(
    project: &Project,
    args: &ScopeArgs,
) -> Result<Box<dyn CompileScope>, Box<dyn std::error::Error>> {
    if args.module.is_empty() && args.file.is_empty() {
        return Ok(Box::new(ProjectScope));
    }
    let mut scope = CompositeScope::new();

    if !args.module.is_empty() {
        for name in &args.module {
            if project.module(name).is_none() {
                return Err(format!("unknown module '{name}'").into());
            }
        }
        scope.push(Box::new(ModuleScope::new(args.module.iter().cloned())));
    }

    if !args.file.is_empty() {
        let cwd = std::env::current_dir()?;
        let mut files = Vec::new();
        let mut modules = BTreeSet::new();
        for file in &args.file {
            let path = absolute(&cwd, file);
            let Some((module, _)) = project.module_for_file(&path) else {
                return Err(format!("{} is not under any module source root", path.display()).into());
            };
            modules.insert(module.name.clone());
            files.push(path);
        }
        scope.push(Box::new(FileSetScope::new(files, modules)));
    }

    Ok(Box::new(scope))
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined.canonicalize().unwrap_or(joined)
}
