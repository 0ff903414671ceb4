//! Run outcomes and the summary line shown to the user.

use std::fmt;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Cancelled by the user or a before/after task.
    Cancelled,
    /// At least one error message was reported.
    Errors,
    /// Something was compiled and no errors were reported.
    Success,
    /// No stage had anything to do.
    UpToDate,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitStatus::Cancelled => "CANCELLED",
            ExitStatus::Errors => "ERRORS",
            ExitStatus::Success => "SUCCESS",
            ExitStatus::UpToDate => "UP_TO_DATE",
        };
        f.write_str(name)
    }
}

/// The one-line summary of a run.
pub fn status_message(status: ExitStatus, warnings: usize, errors: usize) -> String {
    match status {
        ExitStatus::Cancelled => "Compilation aborted".to_string(),
        ExitStatus::UpToDate => "All files are up-to-date".to_string(),
        ExitStatus::Success if warnings == 0 => "Compilation completed successfully".to_string(),
        ExitStatus::Success => {
            format!("Compilation completed successfully with {warnings} warning(s)")
        }
        ExitStatus::Errors => {
            format!("Compilation completed with {errors} error(s) and {warnings} warning(s)")
        }
    }
}
