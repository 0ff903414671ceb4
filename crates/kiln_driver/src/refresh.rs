//! Notifications about files the driver changed on disk.

use std::path::PathBuf;

use tracing::debug;

/// Receives batches of paths that were created, rewritten or deleted.
pub trait RefreshSink: Send + Sync {
    /// Called once per batch.
    fn refresh(&self, paths: &[PathBuf]);
}

/// Logs each batch at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRefreshSink;

impl RefreshSink for LogRefreshSink {
    fn refresh(&self, paths: &[PathBuf]) {
        if paths.is_empty() {
            return;
        }
        debug!(count = paths.len(), "refreshed paths");
        for path in paths {
            debug!(path = %path.display(), "refreshed");
        }
    }
}
