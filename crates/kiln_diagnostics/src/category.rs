//! Message categories ordered from least to most severe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The category of a compiler message.
///
/// Ordered from least severe (`Information`) to most severe (`Error`),
/// matching the derived `PartialOrd`/`Ord` implementation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum MessageCategory {
    /// Progress or status information, such as the reason a rebuild was forced.
    Information,
    /// A potential issue that does not fail the run.
    Warning,
    /// A problem that fails the run and stops later stage categories.
    Error,
}

impl MessageCategory {
    /// All categories, least severe first.
    pub const ALL: [MessageCategory; 3] = [
        MessageCategory::Information,
        MessageCategory::Warning,
        MessageCategory::Error,
    ];

    /// Returns `true` if this category is [`Error`](MessageCategory::Error).
    pub fn is_error(self) -> bool {
        self == MessageCategory::Error
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageCategory::Information => write!(f, "info"),
            MessageCategory::Warning => write!(f, "warning"),
            MessageCategory::Error => write!(f, "error"),
        }
    }
}
