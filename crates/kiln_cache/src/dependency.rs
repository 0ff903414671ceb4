//! The project-wide symbol reference graph.
//!
//! Translating stages report which symbols each source defines and which it
//! references. When the outputs of a source change, its symbols become
//! traverse roots and every source referencing them is affected.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use kiln_common::FileUrl;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::persist;

/// File name of the dependency cache inside the caches directory.
pub const DEPENDENCY_FILE: &str = "dependency-info.dat";

#[derive(Debug, Default, Serialize, Deserialize)]
struct DependencyData {
    /// Symbol names indexed by id.
    names: Vec<String>,
    definitions: BTreeMap<u32, FileUrl>,
    references: BTreeMap<FileUrl, BTreeSet<u32>>,
    traverse_roots: BTreeSet<u32>,
    removed_sources: BTreeSet<u32>,
}

impl DependencyData {
    /// Drops names no longer used and renumbers the rest densely.
    ///
    /// Returns `false` if every name is still in use.
    fn compact(&mut self) -> bool {
        let mut used: BTreeSet<u32> = self.definitions.keys().copied().collect();
        used.extend(self.references.values().flatten().copied());
        used.extend(self.traverse_roots.iter().copied());
        used.extend(self.removed_sources.iter().copied());
        if used.len() == self.names.len() {
            return false;
        }

        let remap: HashMap<u32, u32> = used
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new as u32))
            .collect();
        let names = std::mem::take(&mut self.names);
        self.names = used
            .iter()
            .filter_map(|&old| names.get(old as usize).cloned())
            .collect();
        let renumber = |ids: &BTreeSet<u32>| -> BTreeSet<u32> {
            ids.iter().filter_map(|id| remap.get(id).copied()).collect()
        };
        self.definitions = std::mem::take(&mut self.definitions)
            .into_iter()
            .filter_map(|(id, url)| remap.get(&id).map(|&new| (new, url)))
            .collect();
        for refs in self.references.values_mut() {
            *refs = renumber(refs);
        }
        self.traverse_roots = renumber(&self.traverse_roots);
        self.removed_sources = renumber(&self.removed_sources);
        true
    }
}

#[derive(Debug, Default)]
struct Loaded {
    data: DependencyData,
    ids: HashMap<String, u32>,
}

impl Loaded {
    fn new(data: DependencyData) -> Self {
        let ids = data
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i as u32))
            .collect();
        Self { data, ids }
    }
}

/// Cross-run symbol definitions and references.
#[derive(Debug)]
pub struct DependencyCache {
    path: PathBuf,
    state: Option<Loaded>,
    dirty: bool,
}

impl DependencyCache {
    /// Creates a cache stored under `caches_dir`. Nothing is read until first use.
    pub fn new(caches_dir: &Path) -> Self {
        Self {
            path: caches_dir.join(DEPENDENCY_FILE),
            state: None,
            dirty: false,
        }
    }

    fn state(&mut self) -> &mut Loaded {
        let path = &self.path;
        self.state.get_or_insert_with(|| {
            persist::read::<DependencyData>(path)
                .map(Loaded::new)
                .unwrap_or_default()
        })
    }

    /// Returns the id of `name`, allocating one if needed.
    pub fn symbol_id(&mut self, name: &str) -> u32 {
        let state = self.state();
        if let Some(&id) = state.ids.get(name) {
            return id;
        }
        let id = state.data.names.len() as u32;
        state.data.names.push(name.to_string());
        state.ids.insert(name.to_string(), id);
        self.dirty = true;
        id
    }

    /// The name behind a symbol id.
    pub fn symbol_name(&mut self, id: u32) -> Option<String> {
        self.state().data.names.get(id as usize).cloned()
    }

    /// Replaces the set of symbols defined by `source`.
    pub fn record_definitions<S: AsRef<str>>(&mut self, source: &FileUrl, symbols: &[S]) {
        let ids: BTreeSet<u32> = symbols.iter().map(|s| self.symbol_id(s.as_ref())).collect();
        let data = &mut self.state().data;
        let current: BTreeSet<u32> = data
            .definitions
            .iter()
            .filter(|(_, def)| *def == source)
            .map(|(id, _)| *id)
            .collect();
        if current == ids {
            return;
        }
        data.definitions.retain(|_, def| *def != *source);
        for id in ids {
            data.definitions.insert(id, source.clone());
        }
        self.dirty = true;
    }

    /// Replaces the set of symbols referenced by `source`.
    pub fn record_references<S: AsRef<str>>(&mut self, source: &FileUrl, symbols: &[S]) {
        let ids: BTreeSet<u32> = symbols.iter().map(|s| self.symbol_id(s.as_ref())).collect();
        let data = &mut self.state().data;
        if data.references.get(source) == Some(&ids) {
            return;
        }
        if ids.is_empty() {
            if data.references.remove(source).is_none() {
                return;
            }
        } else {
            data.references.insert(source.clone(), ids);
        }
        self.dirty = true;
    }

    /// Symbols currently defined by `source`.
    pub fn definitions_of(&mut self, source: &FileUrl) -> Vec<u32> {
        self.state()
            .data
            .definitions
            .iter()
            .filter(|(_, def)| *def == source)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Drops everything `source` defines and references.
    pub fn forget_source(&mut self, source: &FileUrl) {
        let data = &mut self.state().data;
        let before = data.definitions.len();
        data.definitions.retain(|_, def| *def != *source);
        let removed_refs = data.references.remove(source).is_some();
        if removed_refs || before != data.definitions.len() {
            self.dirty = true;
        }
    }

    /// Marks a symbol whose defining outputs changed in this run.
    pub fn add_traverse_root(&mut self, id: u32) {
        if self.state().data.traverse_roots.insert(id) {
            self.dirty = true;
        }
    }

    /// Returns `true` if some symbol is waiting to be traversed.
    pub fn has_traverse_roots(&mut self) -> bool {
        !self.state().data.traverse_roots.is_empty()
    }

    /// Marks a symbol whose defining source no longer exists.
    pub fn mark_source_removed(&mut self, id: u32) {
        if self.state().data.removed_sources.insert(id) {
            self.dirty = true;
        }
    }

    /// Sources referencing any symbol defined by `source`, excluding `source`.
    pub fn dependents_of(&mut self, source: &FileUrl) -> BTreeSet<FileUrl> {
        let defined: BTreeSet<u32> = self.definitions_of(source).into_iter().collect();
        self.referencing(&defined)
            .into_iter()
            .filter(|u| u != source)
            .collect()
    }

    fn referencing(&mut self, ids: &BTreeSet<u32>) -> BTreeSet<FileUrl> {
        if ids.is_empty() {
            return BTreeSet::new();
        }
        self.state()
            .data
            .references
            .iter()
            .filter(|(_, refs)| !refs.is_disjoint(ids))
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Returns every source referencing a traverse root and clears the roots.
    ///
    /// Definitions of symbols whose source was removed are dropped at the same
    /// time.
    pub fn take_affected_files(&mut self) -> BTreeSet<FileUrl> {
        let roots = std::mem::take(&mut self.state().data.traverse_roots);
        let affected = self.referencing(&roots);
        let data = &mut self.state().data;
        let removed = std::mem::take(&mut data.removed_sources);
        for id in &removed {
            data.definitions.remove(id);
        }
        if !roots.is_empty() || !removed.is_empty() {
            self.dirty = true;
        }
        affected
    }

    /// Returns `true` if there are unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the graph if it changed.
    ///
    /// Symbol ids are renumbered when names fell out of use, so ids obtained
    /// before a save are not valid after it.
    pub fn save(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(state) = &mut self.state {
            let before = state.data.names.len();
            if state.data.compact() {
                *state = Loaded::new(std::mem::take(&mut state.data));
                tracing::debug!(before, after = state.data.names.len(), "compacted symbol table");
            }
            let bytes = persist::encode(&state.data)?;
            persist::write_atomic(&self.path, &bytes)?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Drops the whole graph and deletes the backing file.
    pub fn wipe(&mut self) -> Result<(), CacheError> {
        self.state = Some(Loaded::default());
        self.dirty = false;
        persist::remove_file(&self.path)
    }
}
