//! The compile status files: cache format version and the in-progress marker.
//!
//! `version.dat` holds the cache format version as a big-endian `i32`.
//! `in_progress.dat` exists while a run is active; finding it at the start of
//! a run means the previous run did not finish.

use std::path::Path;

use crate::error::CacheError;
use crate::persist;

/// Version of the on-disk cache layout. Bump on any incompatible change.
pub const CACHE_FORMAT_VERSION: i32 = 1;

const VERSION_FILE: &str = "version.dat";
const IN_PROGRESS_FILE: &str = "in_progress.dat";

/// Persisted state of the last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileStatus {
    /// Cache format version the caches were written with.
    pub version: i32,
    /// Whether a run was in progress.
    pub in_progress: bool,
}

impl CompileStatus {
    /// Status for the current format version.
    pub fn current(in_progress: bool) -> Self {
        Self {
            version: CACHE_FORMAT_VERSION,
            in_progress,
        }
    }
}

/// Reads the status from `cache_dir`.
///
/// Returns `None` if `version.dat` is missing or is not exactly four bytes.
pub fn read_status(cache_dir: &Path) -> Option<CompileStatus> {
    let bytes = std::fs::read(cache_dir.join(VERSION_FILE)).ok()?;
    let version = i32::from_be_bytes(bytes.as_slice().try_into().ok()?);
    Some(CompileStatus {
        version,
        in_progress: cache_dir.join(IN_PROGRESS_FILE).exists(),
    })
}

/// Writes the status into `cache_dir`, creating the directory if needed.
pub fn write_status(cache_dir: &Path, status: &CompileStatus) -> Result<(), CacheError> {
    persist::write_atomic(&cache_dir.join(VERSION_FILE), &status.version.to_be_bytes())?;
    let marker = cache_dir.join(IN_PROGRESS_FILE);
    if status.in_progress {
        std::fs::write(&marker, []).map_err(|e| CacheError::io(&marker, e))
    } else {
        persist::remove_file(&marker)
    }
}
