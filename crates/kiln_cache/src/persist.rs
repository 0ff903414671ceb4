//! Shared read/write helpers for cache files.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::CacheError;

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })
}

/// Reads and decodes a cache file.
///
/// Returns `None` when the file is missing. An undecodable file (including
/// one with trailing bytes) is logged and also yields `None`.
pub(crate) fn read<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    match bincode::serde::decode_from_slice::<T, _>(&bytes, bincode::config::standard()) {
        Ok((value, read)) if read == bytes.len() => Some(value),
        Ok(_) => {
            warn!(path = %path.display(), "discarding cache file with trailing data");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding unreadable cache file");
            None
        }
    }
}

/// Writes `bytes` to `path` through a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|e| CacheError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))
}

/// Removes a file, treating "not found" as success.
pub(crate) fn remove_file(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.dat");
        write_atomic(&path, b"abc").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        assert!(!dir.path().join("nested/state.dat.tmp").exists());
    }

    #[test]
    fn read_missing_and_garbage_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.dat");
        assert!(read::<BTreeMap<String, i64>>(&path).is_none());

        let mut bytes = encode(&BTreeMap::from([("a".to_string(), 1i64)])).unwrap();
        bytes.extend_from_slice(b"junk");
        std::fs::write(&path, &bytes).unwrap();
        assert!(read::<BTreeMap<String, i64>>(&path).is_none());

        std::fs::write(&path, [0xff, 0xff, 0xff]).unwrap();
        assert!(read::<BTreeMap<String, i64>>(&path).is_none());
    }

    #[test]
    fn remove_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove_file(&dir.path().join("absent")).unwrap();
    }
}
