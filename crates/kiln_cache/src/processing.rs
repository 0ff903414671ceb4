//! State of file-processing stages (instrumenting, post-processing, packaging,
//! validating).

use std::path::PathBuf;

use kiln_common::FileUrl;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::state_cache::StateCache;
use crate::validity::ValidityState;

/// What a file-processing stage remembers about one processed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    /// File timestamp when it was processed.
    pub timestamp: i64,
    /// Stage-defined fingerprint at processing time.
    pub validity: Option<ValidityState>,
}

/// Per-file processing state of one stage.
#[derive(Debug)]
pub struct FileProcessingCache {
    inner: StateCache<ProcessingRecord>,
}

impl FileProcessingCache {
    /// Creates a cache backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: StateCache::new(path),
        }
    }

    /// The record for `url`, if the file was processed before.
    pub fn get(&mut self, url: &FileUrl) -> Option<ProcessingRecord> {
        self.inner.get(url)
    }

    /// Returns `true` if `url` was processed with exactly this timestamp and
    /// validity.
    pub fn is_up_to_date(
        &mut self,
        url: &FileUrl,
        timestamp: i64,
        validity: Option<&ValidityState>,
    ) -> bool {
        match self.inner.get(url) {
            Some(record) => record.timestamp == timestamp && record.validity.as_ref() == validity,
            None => false,
        }
    }

    /// Records that `url` was processed.
    pub fn update(&mut self, url: &FileUrl, timestamp: i64, validity: Option<ValidityState>) {
        self.inner.update(
            url,
            Some(ProcessingRecord {
                timestamp,
                validity,
            }),
        );
    }

    /// Forgets `url`.
    pub fn remove(&mut self, url: &FileUrl) -> Option<ProcessingRecord> {
        self.inner.remove(url)
    }

    /// Every processed file.
    pub fn urls(&mut self) -> Vec<FileUrl> {
        self.inner.urls()
    }

    /// See [`StateCache::is_dirty`].
    pub fn is_dirty(&self) -> bool {
        self.inner.is_dirty()
    }

    /// See [`StateCache::save`].
    pub fn save(&mut self) -> Result<(), CacheError> {
        self.inner.save()
    }

    /// See [`StateCache::wipe`].
    pub fn wipe(&mut self) -> Result<(), CacheError> {
        self.inner.wipe()
    }
}
