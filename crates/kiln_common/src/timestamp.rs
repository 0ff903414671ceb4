//! File modification timestamps in milliseconds since the Unix epoch.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the modification time of `path` in milliseconds since the epoch.
///
/// Returns `None` if the file does not exist or its metadata can't be read.
/// Times before the epoch are reported as negative values.
pub fn file_timestamp(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(system_time_millis(modified))
}

/// Returns the current wall-clock time in milliseconds since the epoch.
pub fn current_millis() -> i64 {
    system_time_millis(SystemTime::now())
}

fn system_time_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_file_has_no_timestamp() {
        assert!(file_timestamp(Path::new("/nonexistent/kiln/file.txt")).is_none());
    }

    #[test]
    fn reflects_set_modified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "x").unwrap();
        let when = UNIX_EPOCH + Duration::from_millis(1_600_000_000_123);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(when)
            .unwrap();
        assert_eq!(file_timestamp(&path), Some(1_600_000_000_123));
    }

    #[test]
    fn current_millis_is_after_2020() {
        assert!(current_millis() > 1_577_836_800_000);
    }
}
