//! Error types for driver runs.

use kiln_cache::CacheError;

/// Error type returned by stage implementations.
pub type StageError = Box<dyn std::error::Error + Send + Sync>;

/// Faults that abort a run.
///
/// Ordinary compilation problems are not errors at this level: they are
/// reported as messages and the run finishes with an error status. A
/// `DriverError` means the run could not complete at all.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// A stage returned an error instead of reporting messages.
    #[error("stage '{stage}' failed: {source}")]
    StageFault {
        /// Id of the failing stage.
        stage: String,
        /// The stage's error.
        source: StageError,
    },

    /// Persistent state could not be written.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_fault_display() {
        let err = DriverError::StageFault {
            stage: "copy".to_string(),
            source: "disk full".into(),
        };
        assert_eq!(err.to_string(), "stage 'copy' failed: disk full");
    }

    #[test]
    fn cache_error_is_transparent() {
        let err = DriverError::from(CacheError::Serialization {
            reason: "bad".to_string(),
        });
        assert_eq!(err.to_string(), "serialization error: bad");
    }
}
