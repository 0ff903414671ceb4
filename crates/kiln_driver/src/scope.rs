//! Compile scopes: which files and modules a run covers.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use kiln_common::FileUrl;
use kiln_project::Project;

use crate::fs::walk_files;

/// Optional predicate narrowing the files a scope enumerates.
pub type FileFilter<'a> = Option<&'a dyn Fn(&Path) -> bool>;

/// The set of files and modules a run covers.
///
/// Every file returned by [`files`](CompileScope::files) satisfies
/// [`belongs`](CompileScope::belongs).
pub trait CompileScope: Send + Sync + Debug {
    /// Enumerates the files of the scope, sorted.
    ///
    /// With `source_only`, only files under a module source root or the
    /// generated-source directory are returned.
    fn files(&self, project: &Project, filter: FileFilter<'_>, source_only: bool) -> Vec<PathBuf>;

    /// Returns `true` if `url` is part of the scope.
    fn belongs(&self, project: &Project, url: &FileUrl) -> bool;

    /// Modules whose files the scope may contain.
    fn affected_modules(&self, project: &Project) -> BTreeSet<String>;
}

fn is_source_file(project: &Project, path: &Path) -> bool {
    path.starts_with(project.generated_dir()) || project.module_for_file(path).is_some()
}

fn collect(
    project: &Project,
    roots: impl IntoIterator<Item = PathBuf>,
    filter: FileFilter<'_>,
    source_only: bool,
    files: &mut BTreeSet<PathBuf>,
) {
    for root in roots {
        let found = match walk_files(&root) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "could not list files");
                continue;
            }
        };
        files.extend(found.into_iter().filter(|f| {
            !project.is_excluded(f)
                && (!source_only || is_source_file(project, f))
                && filter.map_or(true, |accept| accept(f))
        }));
    }
}

/// Every module of the project.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectScope;

impl CompileScope for ProjectScope {
    fn files(&self, project: &Project, filter: FileFilter<'_>, source_only: bool) -> Vec<PathBuf> {
        let mut files = BTreeSet::new();
        let roots = project
            .modules()
            .flat_map(|m| m.source_roots.iter().map(|r| r.path.clone()));
        collect(project, roots, filter, source_only, &mut files);
        files.into_iter().collect()
    }

    fn belongs(&self, project: &Project, url: &FileUrl) -> bool {
        let path = url.to_path();
        !project.is_excluded(&path)
            && (path.starts_with(project.root()) || is_source_file(project, &path))
    }

    fn affected_modules(&self, project: &Project) -> BTreeSet<String> {
        project.modules().map(|m| m.name.clone()).collect()
    }
}

/// One or more named modules, optionally with everything they depend on.
#[derive(Debug, Clone)]
pub struct ModuleScope {
    modules: BTreeSet<String>,
    include_dependencies: bool,
}

impl ModuleScope {
    /// Covers exactly the named modules.
    pub fn new<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
            include_dependencies: false,
        }
    }

    /// Also covers the transitive dependencies of the named modules.
    pub fn with_dependencies(mut self) -> Self {
        self.include_dependencies = true;
        self
    }

    fn effective(&self, project: &Project) -> BTreeSet<String> {
        if self.include_dependencies {
            project.dependency_closure(self.modules.iter().map(String::as_str))
        } else {
            self.modules
                .iter()
                .filter(|m| project.module(m).is_some())
                .cloned()
                .collect()
        }
    }
}

impl CompileScope for ModuleScope {
    fn files(&self, project: &Project, filter: FileFilter<'_>, source_only: bool) -> Vec<PathBuf> {
        let mut files = BTreeSet::new();
        for name in self.effective(project) {
            let Some(module) = project.module(&name) else {
                continue;
            };
            let roots = module.source_roots.iter().map(|r| r.path.clone());
            collect(project, roots, filter, source_only, &mut files);
        }
        // A nested root of another module owns its files.
        let effective = self.effective(project);
        files
            .into_iter()
            .filter(|f| {
                project
                    .module_for_file(f)
                    .is_some_and(|(m, _)| effective.contains(&m.name))
            })
            .collect()
    }

    fn belongs(&self, project: &Project, url: &FileUrl) -> bool {
        let path = url.to_path();
        if project.is_excluded(&path) {
            return false;
        }
        project
            .module_for_file(&path)
            .is_some_and(|(m, _)| self.effective(project).contains(&m.name))
    }

    fn affected_modules(&self, project: &Project) -> BTreeSet<String> {
        self.effective(project)
    }
}

/// Explicit files and directories, owned by explicitly named modules.
#[derive(Debug, Clone)]
pub struct FileSetScope {
    roots: Vec<PathBuf>,
    modules: BTreeSet<String>,
}

impl FileSetScope {
    /// Covers `roots` (files or directories), attributed to `modules`.
    pub fn new<I, S>(roots: impl IntoIterator<Item = PathBuf>, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: roots.into_iter().collect(),
            modules: modules.into_iter().map(Into::into).collect(),
        }
    }

    /// The files and directories of the set.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl CompileScope for FileSetScope {
    fn files(&self, project: &Project, filter: FileFilter<'_>, source_only: bool) -> Vec<PathBuf> {
        let mut files = BTreeSet::new();
        collect(project, self.roots.iter().cloned(), filter, source_only, &mut files);
        files.into_iter().collect()
    }

    fn belongs(&self, project: &Project, url: &FileUrl) -> bool {
        let path = url.to_path();
        !project.is_excluded(&path) && self.roots.iter().any(|root| path.starts_with(root))
    }

    fn affected_modules(&self, _project: &Project) -> BTreeSet<String> {
        self.modules.clone()
    }
}

/// The union of several scopes.
#[derive(Debug, Default)]
pub struct CompositeScope {
    scopes: Vec<Box<dyn CompileScope>>,
}

impl CompositeScope {
    /// Creates an empty union.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scope to the union.
    pub fn push(&mut self, scope: Box<dyn CompileScope>) {
        self.scopes.push(scope);
    }

    /// Number of scopes in the union.
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Returns `true` if the union has no members.
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl CompileScope for CompositeScope {
    fn files(&self, project: &Project, filter: FileFilter<'_>, source_only: bool) -> Vec<PathBuf> {
        let files: BTreeSet<PathBuf> = self
            .scopes
            .iter()
            .flat_map(|s| s.files(project, filter, source_only))
            .collect();
        files.into_iter().collect()
    }

    fn belongs(&self, project: &Project, url: &FileUrl) -> bool {
        self.scopes.iter().any(|s| s.belongs(project, url))
    }

    fn affected_modules(&self, project: &Project) -> BTreeSet<String> {
        self.scopes
            .iter()
            .flat_map(|s| s.affected_modules(project))
            .collect()
    }
}

/// Wraps a scope and widens it to every module that transitively depends on
/// the wrapped scope's modules.
///
/// Enumeration still yields only the wrapped scope's files; dependents are
/// added by the driver through the dependency cache.
#[derive(Debug)]
pub struct TrackDependenciesScope {
    delegate: Box<dyn CompileScope>,
}

impl TrackDependenciesScope {
    /// Wraps `delegate`.
    pub fn new(delegate: Box<dyn CompileScope>) -> Self {
        Self { delegate }
    }
}

impl CompileScope for TrackDependenciesScope {
    fn files(&self, project: &Project, filter: FileFilter<'_>, source_only: bool) -> Vec<PathBuf> {
        self.delegate.files(project, filter, source_only)
    }

    fn belongs(&self, project: &Project, url: &FileUrl) -> bool {
        if self.delegate.belongs(project, url) {
            return true;
        }
        let path = url.to_path();
        if project.is_excluded(&path) {
            return false;
        }
        let widened = self.affected_modules(project);
        project
            .module_for_file(&path)
            .is_some_and(|(m, _)| widened.contains(&m.name))
    }

    fn affected_modules(&self, project: &Project) -> BTreeSet<String> {
        let modules = self.delegate.affected_modules(project);
        project.dependents_closure(modules.iter().map(String::as_str))
    }
}
