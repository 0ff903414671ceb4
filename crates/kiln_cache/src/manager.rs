//! Ownership of every stage cache and the dependency graph.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dependency::DependencyCache;
use crate::error::CacheError;
use crate::processing::FileProcessingCache;
use crate::state_cache::{GenerationCache, StateCache};
use crate::translating::TranslatingCache;

const CACHES_DIR: &str = "caches";

/// All persisted per-stage state of one project.
///
/// Caches are created on first request and keyed by stage kind and stage id.
/// Their files are named `<kind>_<id>` inside `<cache_dir>/caches/`.
#[derive(Debug)]
pub struct CacheManager {
    cache_dir: PathBuf,
    caches_dir: PathBuf,
    translating: BTreeMap<String, TranslatingCache>,
    generating: BTreeMap<String, GenerationCache>,
    processing: BTreeMap<(String, String), FileProcessingCache>,
    dependencies: DependencyCache,
}

impl CacheManager {
    /// Creates a manager rooted at `cache_dir`.
    pub fn new(cache_dir: &Path) -> Self {
        let caches_dir = cache_dir.join(CACHES_DIR);
        Self {
            dependencies: DependencyCache::new(&caches_dir),
            cache_dir: cache_dir.to_path_buf(),
            caches_dir,
            translating: BTreeMap::new(),
            generating: BTreeMap::new(),
            processing: BTreeMap::new(),
        }
    }

    /// The driver's cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The directory holding the `.dat` files.
    pub fn caches_dir(&self) -> &Path {
        &self.caches_dir
    }

    /// Mapping cache of a translating stage.
    pub fn translating(&mut self, stage_id: &str) -> &mut TranslatingCache {
        let dir = &self.caches_dir;
        self.translating
            .entry(stage_id.to_string())
            .or_insert_with(|| TranslatingCache::new(dir, &file_stem("translating", stage_id)))
    }

    /// Validity cache of a source-generating stage.
    pub fn generating(&mut self, stage_id: &str) -> &mut GenerationCache {
        let dir = &self.caches_dir;
        self.generating
            .entry(stage_id.to_string())
            .or_insert_with(|| {
                StateCache::new(dir.join(format!("{}.dat", file_stem("generating", stage_id))))
            })
    }

    /// Processing cache of a file-processing stage of the given kind.
    pub fn processing(&mut self, kind: &str, stage_id: &str) -> &mut FileProcessingCache {
        let dir = &self.caches_dir;
        self.processing
            .entry((kind.to_string(), stage_id.to_string()))
            .or_insert_with(|| {
                FileProcessingCache::new(dir.join(format!("{}.dat", file_stem(kind, stage_id))))
            })
    }

    /// The project-wide symbol graph.
    pub fn dependencies(&mut self) -> &mut DependencyCache {
        &mut self.dependencies
    }

    /// Returns `true` if any open cache has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dependencies.is_dirty()
            || self.translating.values().any(TranslatingCache::is_dirty)
            || self.generating.values().any(StateCache::is_dirty)
            || self.processing.values().any(FileProcessingCache::is_dirty)
    }

    /// Saves every dirty cache. Stops at the first failure.
    pub fn save_all(&mut self) -> Result<(), CacheError> {
        for cache in self.translating.values_mut() {
            cache.save()?;
        }
        for cache in self.generating.values_mut() {
            cache.save()?;
        }
        for cache in self.processing.values_mut() {
            cache.save()?;
        }
        self.dependencies.save()
    }

    /// Empties every cache, including ones not opened in this run.
    pub fn clear_caches(&mut self) -> Result<(), CacheError> {
        for cache in self.translating.values_mut() {
            cache.wipe()?;
        }
        for cache in self.generating.values_mut() {
            cache.wipe()?;
        }
        for cache in self.processing.values_mut() {
            cache.wipe()?;
        }
        self.dependencies.wipe()?;
        match std::fs::remove_dir_all(&self.caches_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&self.caches_dir, e)),
        }
        debug!(dir = %self.caches_dir.display(), "cleared caches");
        Ok(())
    }
}

/// `<kind>_<id>` with every character outside `[A-Za-z0-9_-]` replaced by `_`.
fn file_stem(kind: &str, id: &str) -> String {
    let id: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{kind}_{id}")
}
