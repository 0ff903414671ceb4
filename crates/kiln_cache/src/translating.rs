//! The source-to-output mapping of a translating stage.

use std::collections::BTreeSet;
use std::path::Path;

use kiln_common::FileUrl;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::state_cache::{StateCache, TimestampCache};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SourceRecord {
    outputs: BTreeSet<FileUrl>,
    marked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct OutputRecord {
    source: FileUrl,
    symbol: String,
}

/// Bidirectional source ⇄ output mapping with per-source timestamps.
///
/// Three backing files share a stem: `<stem>_timestamps.dat`,
/// `<stem>_sources.dat` and `<stem>_outputs.dat`. For every output `o`
/// recorded for source `s`, `source_for(o) == Some(s)`.
#[derive(Debug)]
pub struct TranslatingCache {
    timestamps: TimestampCache,
    sources: StateCache<SourceRecord>,
    outputs: StateCache<OutputRecord>,
}

impl TranslatingCache {
    /// Creates a cache whose files live in `dir` and start with `stem`.
    pub fn new(dir: &Path, stem: &str) -> Self {
        Self {
            timestamps: StateCache::new(dir.join(format!("{stem}_timestamps.dat"))),
            sources: StateCache::new(dir.join(format!("{stem}_sources.dat"))),
            outputs: StateCache::new(dir.join(format!("{stem}_outputs.dat"))),
        }
    }

    /// Outputs last produced from `source`.
    pub fn outputs_for(&mut self, source: &FileUrl) -> Vec<FileUrl> {
        self.sources
            .get(source)
            .map(|r| r.outputs.into_iter().collect())
            .unwrap_or_default()
    }

    /// The source an output was produced from.
    pub fn source_for(&mut self, output: &FileUrl) -> Option<FileUrl> {
        self.outputs.get(output).map(|r| r.source)
    }

    /// The symbol the stage derived for an output.
    pub fn symbol_for(&mut self, output: &FileUrl) -> Option<String> {
        self.outputs.get(output).map(|r| r.symbol)
    }

    /// Source timestamp at the last successful translation.
    pub fn timestamp(&mut self, source: &FileUrl) -> Option<i64> {
        self.timestamps.get(source)
    }

    /// Returns `true` if `source` must be recompiled regardless of timestamps.
    pub fn is_marked(&mut self, source: &FileUrl) -> bool {
        self.sources.get(source).is_some_and(|r| r.marked)
    }

    /// Records a successful translation of `source`.
    ///
    /// Replaces the previous output set and clears the recompilation mark.
    /// Outputs that were recorded for `source` before but are not produced any
    /// more lose their reverse mapping.
    pub fn record(
        &mut self,
        source: &FileUrl,
        timestamp: i64,
        outputs: impl IntoIterator<Item = (FileUrl, String)>,
    ) {
        let previous = self.sources.get(source).unwrap_or_default();
        let mut record = SourceRecord::default();
        for (output, symbol) in outputs {
            if let Some(old) = self.outputs.get(&output) {
                if &old.source != source {
                    self.detach(&old.source, &output);
                }
            }
            self.outputs.update(
                &output,
                Some(OutputRecord {
                    source: source.clone(),
                    symbol,
                }),
            );
            record.outputs.insert(output);
        }
        for stale in previous.outputs.difference(&record.outputs) {
            if self.source_for(stale).as_ref() == Some(source) {
                self.outputs.remove(stale);
            }
        }
        self.sources.update(source, Some(record));
        self.timestamps.update(source, Some(timestamp));
    }

    /// Forces `source` to be recompiled on the next run.
    pub fn mark_for_recompilation(&mut self, source: &FileUrl) {
        let mut record = self.sources.get(source).unwrap_or_default();
        if !record.marked {
            record.marked = true;
            self.sources.update(source, Some(record));
        }
    }

    /// Forgets one output. Returns the source it belonged to.
    pub fn remove_output(&mut self, output: &FileUrl) -> Option<FileUrl> {
        let record = self.outputs.remove(output)?;
        self.detach(&record.source, output);
        Some(record.source)
    }

    fn detach(&mut self, source: &FileUrl, output: &FileUrl) {
        if let Some(mut record) = self.sources.get(source) {
            if record.outputs.remove(output) {
                self.sources.update(source, Some(record));
            }
        }
    }

    /// Forgets `source`, its timestamp and every output mapped to it.
    pub fn remove_source(&mut self, source: &FileUrl) {
        if let Some(record) = self.sources.remove(source) {
            for output in record.outputs {
                if self.source_for(&output).as_ref() == Some(source) {
                    self.outputs.remove(&output);
                }
            }
        }
        self.timestamps.remove(source);
    }

    /// Every (output, source) pair, in output order.
    pub fn output_entries(&mut self) -> Vec<(FileUrl, FileUrl)> {
        self.outputs
            .entries()
            .into_iter()
            .map(|(output, record)| (output, record.source))
            .collect()
    }

    /// Every source with a timestamp, output or recompilation mark.
    pub fn source_urls(&mut self) -> Vec<FileUrl> {
        let mut urls: BTreeSet<FileUrl> = self.sources.urls().into_iter().collect();
        urls.extend(self.timestamps.urls());
        urls.into_iter().collect()
    }

    /// Returns `true` if any backing map has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.timestamps.is_dirty() || self.sources.is_dirty() || self.outputs.is_dirty()
    }

    /// Saves every dirty backing map.
    pub fn save(&mut self) -> Result<(), CacheError> {
        self.timestamps.save()?;
        self.sources.save()?;
        self.outputs.save()
    }

    /// Drops all state and deletes the backing files.
    pub fn wipe(&mut self) -> Result<(), CacheError> {
        self.timestamps.wipe()?;
        self.sources.wipe()?;
        self.outputs.wipe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(p: &str) -> FileUrl {
        FileUrl::from_path(Path::new(p))
    }

    fn cache(dir: &Path) -> TranslatingCache {
        TranslatingCache::new(dir, "translating_copy")
    }

    #[test]
    fn record_maps_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cache(dir.path());
        let src = url("/p/src/A.src");
        c.record(
            &src,
            100,
            [
                (url("/p/out/A.obj"), "A".to_string()),
                (url("/p/out/A$1.obj"), "A$1".to_string()),
            ],
        );
        for out in c.outputs_for(&src) {
            assert_eq!(c.source_for(&out), Some(src.clone()));
        }
        assert_eq!(c.symbol_for(&url("/p/out/A.obj")).as_deref(), Some("A"));
        assert_eq!(c.timestamp(&src), Some(100));
        assert!(!c.is_marked(&src));
    }

    #[test]
    fn re_record_drops_outputs_no_longer_produced() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cache(dir.path());
        let src = url("/p/src/A.src");
        c.record(
            &src,
            1,
            [
                (url("/p/out/A.obj"), "A".to_string()),
                (url("/p/out/Old.obj"), "Old".to_string()),
            ],
        );
        c.record(&src, 2, [(url("/p/out/A.obj"), "A".to_string())]);
        assert_eq!(c.outputs_for(&src), vec![url("/p/out/A.obj")]);
        assert!(c.source_for(&url("/p/out/Old.obj")).is_none());
    }

    #[test]
    fn output_moving_to_another_source_is_detached() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cache(dir.path());
        let out = url("/p/out/Shared.obj");
        c.record(&url("/p/src/A.src"), 1, [(out.clone(), "S".to_string())]);
        c.record(&url("/p/src/B.src"), 1, [(out.clone(), "S".to_string())]);
        assert_eq!(c.source_for(&out), Some(url("/p/src/B.src")));
        assert!(c.outputs_for(&url("/p/src/A.src")).is_empty());
    }

    #[test]
    fn mark_and_record_clears_mark() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cache(dir.path());
        let src = url("/p/src/B.src");
        c.mark_for_recompilation(&src);
        assert!(c.is_marked(&src));
        assert!(c.outputs_for(&src).is_empty());
        assert_eq!(c.source_urls(), vec![src.clone()]);

        c.record(&src, 5, [(url("/p/out/B.obj"), "B".to_string())]);
        assert!(!c.is_marked(&src));
    }

    #[test]
    fn remove_output_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cache(dir.path());
        let src = url("/p/src/A.src");
        c.record(
            &src,
            1,
            [
                (url("/p/out/A.obj"), "A".to_string()),
                (url("/p/out/A2.obj"), "A2".to_string()),
            ],
        );
        assert_eq!(c.remove_output(&url("/p/out/A.obj")), Some(src.clone()));
        assert_eq!(c.outputs_for(&src), vec![url("/p/out/A2.obj")]);

        c.remove_source(&src);
        assert!(c.output_entries().is_empty());
        assert!(c.timestamp(&src).is_none());
        assert!(c.source_urls().is_empty());
    }

    #[test]
    fn persisted_mapping_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let src = url("/p/src/A.src");
        {
            let mut c = cache(dir.path());
            c.record(&src, 42, [(url("/p/out/A.obj"), "A".to_string())]);
            assert!(c.is_dirty());
            c.save().unwrap();
            assert!(!c.is_dirty());
        }
        let mut c = cache(dir.path());
        assert_eq!(c.timestamp(&src), Some(42));
        assert_eq!(
            c.output_entries(),
            vec![(url("/p/out/A.obj"), src.clone())]
        );
        c.wipe().unwrap();
        assert!(!dir.path().join("translating_copy_outputs.dat").exists());
    }
}
