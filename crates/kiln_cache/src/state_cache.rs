//! The generic per-file state map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_common::FileUrl;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;
use crate::persist;
use crate::validity::ValidityState;

/// Last-compiled source modification time, in milliseconds.
pub type TimestampCache = StateCache<i64>;

/// Validity state of every generated output, keyed by absolute output path.
pub type GenerationCache = StateCache<ValidityState>;

/// A lazily loaded, persistently stored map from file to state.
///
/// The backing file is read on the first access of any kind. Mutations mark
/// the cache dirty only when they change the map, and only [`save`](Self::save)
/// clears the flag, so saving an untouched cache never rewrites the file.
#[derive(Debug)]
pub struct StateCache<V> {
    path: PathBuf,
    map: Option<BTreeMap<FileUrl, V>>,
    dirty: bool,
}

impl<V> StateCache<V>
where
    V: Serialize + DeserializeOwned + Clone + PartialEq,
{
    /// Creates a cache backed by `path`. Nothing is read until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map: None,
            dirty: false,
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn map(&mut self) -> &mut BTreeMap<FileUrl, V> {
        let path = &self.path;
        self.map
            .get_or_insert_with(|| persist::read(path).unwrap_or_default())
    }

    /// Returns the state stored for `url`.
    pub fn get(&mut self, url: &FileUrl) -> Option<V> {
        self.map().get(url).cloned()
    }

    /// Returns `true` if `url` has an entry.
    pub fn contains(&mut self, url: &FileUrl) -> bool {
        self.map().contains_key(url)
    }

    /// Stores (`Some`) or removes (`None`) the state for `url`.
    pub fn update(&mut self, url: &FileUrl, value: Option<V>) {
        match value {
            Some(value) => {
                let map = self.map();
                if map.get(url) == Some(&value) {
                    return;
                }
                map.insert(url.clone(), value);
                self.dirty = true;
            }
            None => {
                self.remove(url);
            }
        }
    }

    /// Removes the entry for `url`, returning the old state.
    pub fn remove(&mut self, url: &FileUrl) -> Option<V> {
        let old = self.map().remove(url);
        if old.is_some() {
            self.dirty = true;
        }
        old
    }

    /// All keys, in order.
    pub fn urls(&mut self) -> Vec<FileUrl> {
        self.map().keys().cloned().collect()
    }

    /// All entries, in key order.
    pub fn entries(&mut self) -> Vec<(FileUrl, V)> {
        self.map()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of entries.
    pub fn len(&mut self) -> usize {
        self.map().len()
    }

    /// Returns `true` if the cache has no entries.
    pub fn is_empty(&mut self) -> bool {
        self.map().is_empty()
    }

    /// Returns `true` if there are changes not yet written to disk.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the map to disk if it changed since it was loaded or last saved.
    pub fn save(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(map) = &self.map {
            let bytes = persist::encode(map)?;
            persist::write_atomic(&self.path, &bytes)?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Drops every entry and deletes the backing file.
    pub fn wipe(&mut self) -> Result<(), CacheError> {
        self.map = Some(BTreeMap::new());
        self.dirty = false;
        persist::remove_file(&self.path)
    }
}
