//! The [`Project`] model and its queries.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::chunk::{sorted_chunks, Chunk};
use crate::error::ProjectError;
use crate::module::{Module, SourceRoot};

/// A set of modules rooted at a project directory.
///
/// Modules are kept in name order so every query is deterministic.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    cache_dir: PathBuf,
    modules: BTreeMap<String, Module>,
    excluded: Vec<PathBuf>,
}

impl Project {
    /// Creates an empty project. `cache_dir` holds the driver's persisted state.
    pub fn new(root: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_dir: cache_dir.into(),
            modules: BTreeMap::new(),
            excluded: Vec::new(),
        }
    }

    /// Registers a module. Names must be unique and non-empty.
    pub fn add_module(&mut self, module: Module) -> Result<(), ProjectError> {
        if module.name.is_empty() {
            return Err(ProjectError::EmptyModuleName);
        }
        if self.modules.contains_key(&module.name) {
            return Err(ProjectError::DuplicateModule(module.name));
        }
        self.modules.insert(module.name.clone(), module);
        Ok(())
    }

    /// Builder form of [`add_module`](Self::add_module).
    pub fn with_module(mut self, module: Module) -> Result<Self, ProjectError> {
        self.add_module(module)?;
        Ok(self)
    }

    /// Excludes every file under `path` from compilation.
    pub fn exclude(&mut self, path: impl Into<PathBuf>) {
        self.excluded.push(path.into());
    }

    /// Checks that every declared dependency names a registered module.
    pub fn check_dependencies(&self) -> Result<(), ProjectError> {
        for module in self.modules.values() {
            if let Some(dep) = module
                .dependencies
                .iter()
                .find(|d| !self.modules.contains_key(d.as_str()))
            {
                return Err(ProjectError::UnknownDependency {
                    module: module.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }

    /// The project directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory holding the driver's caches and status files.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// All modules in name order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    /// Looks up a module by name.
    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Returns `true` if the path lies under an excluded prefix or the cache
    /// directory.
    pub fn is_excluded(&self, path: &Path) -> bool {
        (path.starts_with(&self.cache_dir) && !self.is_generated_path(path))
            || self.excluded.iter().any(|prefix| path.starts_with(prefix))
    }

    fn is_generated_path(&self, path: &Path) -> bool {
        path.starts_with(self.generated_dir())
    }

    /// Root directory of generated sources inside the cache directory.
    pub fn generated_dir(&self) -> PathBuf {
        self.cache_dir.join("generated")
    }

    /// Finds the module whose source root contains `path`.
    ///
    /// When source roots nest, the innermost root wins. Returns the module and
    /// whether the root is a test root.
    pub fn module_for_file(&self, path: &Path) -> Option<(&Module, bool)> {
        let mut best: Option<(&Module, &SourceRoot)> = None;
        for module in self.modules.values() {
            for root in &module.source_roots {
                if !path.starts_with(&root.path) {
                    continue;
                }
                let deeper = best.map_or(true, |(_, b)| {
                    root.path.components().count() > b.path.components().count()
                });
                if deeper {
                    best = Some((module, root));
                }
            }
        }
        best.map(|(m, r)| (m, r.is_test))
    }

    /// The given modules plus everything they transitively depend on.
    pub fn dependency_closure<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        self.walk(names, |module| {
            self.modules
                .get(module)
                .map(|m| m.dependencies.clone())
                .unwrap_or_default()
        })
    }

    /// The given modules plus every module that transitively depends on them.
    pub fn dependents_closure<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        self.walk(names, |module| {
            self.modules
                .values()
                .filter(|m| m.dependencies.iter().any(|d| d == module))
                .map(|m| m.name.clone())
                .collect()
        })
    }

    fn walk<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        next: impl Fn(&str) -> Vec<String>,
    ) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<String> = names
            .into_iter()
            .filter(|n| self.modules.contains_key(*n))
            .map(str::to_string)
            .collect();
        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            for neighbour in next(&name) {
                if self.modules.contains_key(&neighbour) && !visited.contains(&neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }
        visited
    }

    /// Every chunk of the project, dependencies before dependents.
    pub fn chunks(&self) -> Vec<Chunk> {
        sorted_chunks(self.modules.values())
    }

    /// Chunks restricted to the named modules, dependencies first.
    pub fn chunks_of<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<Chunk> {
        let wanted: BTreeSet<&str> = names.into_iter().collect();
        sorted_chunks(
            self.modules
                .values()
                .filter(|m| wanted.contains(m.name.as_str())),
        )
    }

    /// The named modules in dependency order.
    pub fn sorted_modules<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        self.chunks_of(names)
            .into_iter()
            .flat_map(|c| c.modules)
            .collect()
    }

    /// Every output root of every module, deduplicated and sorted.
    pub fn output_directories(&self) -> Vec<PathBuf> {
        let dirs: BTreeSet<PathBuf> = self
            .modules
            .values()
            .flat_map(|m| m.output_dirs().map(Path::to_path_buf))
            .collect();
        dirs.into_iter().collect()
    }
}
